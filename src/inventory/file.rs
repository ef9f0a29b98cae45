use super::{keep_reachable, DeviceInventory, InventoryError};
use crate::models::DeviceRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Default)]
struct InventoryFile {
    #[serde(default)]
    devices: Vec<DeviceRecord>,
}

/// Device list kept in a local TOML file, re-read on every call.
///
/// ```toml
/// [[devices]]
/// id = "bng-01"
/// address = "10.0.0.1"
/// name = "bng-01"
/// status_icmp = "up"
/// snmp = { community = "n0c", version = "2c" }
/// ```
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DeviceInventory for FileInventory {
    async fn list_active_devices(
        &self,
        timeout: Duration,
    ) -> Result<Vec<DeviceRecord>, InventoryError> {
        let contents = tokio::time::timeout(timeout, tokio::fs::read_to_string(&self.path))
            .await
            .map_err(|_| InventoryError::Timeout(timeout))?
            .map_err(|source| InventoryError::Read {
                path: self.path.clone(),
                source,
            })?;

        let file: InventoryFile = toml::from_str(&contents).map_err(|source| InventoryError::Parse {
            path: self.path.clone(),
            source,
        })?;

        Ok(keep_reachable(file.devices))
    }
}
