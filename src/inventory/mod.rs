//! Sources of the device list polled each cycle.
pub mod file;
pub mod http;

use crate::models::DeviceRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use file::FileInventory;
pub use http::HttpInventory;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("inventory request timed out after {0:?}")]
    Timeout(Duration),
    #[error("inventory request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to read inventory file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse inventory file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Read-only provider of the devices to poll.
#[async_trait]
pub trait DeviceInventory: Send + Sync {
    /// Devices currently flagged as reachable. Fails as a whole; a partial list is never returned.
    async fn list_active_devices(
        &self,
        timeout: Duration,
    ) -> Result<Vec<DeviceRecord>, InventoryError>;
}

fn keep_reachable(devices: Vec<DeviceRecord>) -> Vec<DeviceRecord> {
    devices.into_iter().filter(DeviceRecord::is_reachable).collect()
}
