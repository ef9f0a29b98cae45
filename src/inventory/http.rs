use super::{keep_reachable, DeviceInventory, InventoryError};
use crate::models::DeviceRecord;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Device catalog served as a JSON array over HTTP(S).
pub struct HttpInventory {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpInventory {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl DeviceInventory for HttpInventory {
    async fn list_active_devices(
        &self,
        timeout: Duration,
    ) -> Result<Vec<DeviceRecord>, InventoryError> {
        let mut request = self.client.get(&self.url).timeout(timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| map_timeout(e, timeout))?;
        let devices: Vec<DeviceRecord> = response
            .error_for_status()?
            .json()
            .await
            .map_err(|e| map_timeout(e, timeout))?;

        Ok(keep_reachable(devices))
    }
}

fn map_timeout(error: reqwest::Error, timeout: Duration) -> InventoryError {
    if error.is_timeout() {
        InventoryError::Timeout(timeout)
    } else {
        InventoryError::Request(error)
    }
}
