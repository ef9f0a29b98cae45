pub mod anomaly;
pub mod influx;
pub mod state;

use crate::models::TrafficResult;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use anomaly::{AnomalyFilter, Verdict};
pub use influx::InfluxSink;
pub use state::{RateEngine, RateOutcome};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid data point for {device}/{interface}: {reason}")]
    Point {
        device: String,
        interface: String,
        reason: String,
    },
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("write failed: {0}")]
    Write(String),
}

/// Persists computed traffic results. One call per device per cycle.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write_batch(&self, results: &[TrafficResult]) -> Result<(), SinkError>;
}
