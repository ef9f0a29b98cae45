use super::{MetricsSink, SinkError};
use crate::models::TrafficResult;
use async_trait::async_trait;
use futures::stream;
use influxdb2::api::write::TimestampPrecision;
use influxdb2::models::DataPoint;
use influxdb2::Client;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_MEASUREMENT: &str = "network_traffic";

/// Writes traffic results to an InfluxDB 2.x bucket.
pub struct InfluxSink {
    client: Client,
    bucket: String,
    measurement: String,
    write_timeout: Duration,
}

impl InfluxSink {
    pub fn new(
        url: &str,
        org: &str,
        token: &str,
        bucket: impl Into<String>,
        measurement: impl Into<String>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(url, org, token),
            bucket: bucket.into(),
            measurement: measurement.into(),
            write_timeout,
        }
    }

    fn data_point(&self, result: &TrafficResult) -> Result<DataPoint, SinkError> {
        let invalid = |reason: String| SinkError::Point {
            device: result.device_id.clone(),
            interface: result.interface_id.clone(),
            reason,
        };
        let timestamp = result
            .timestamp
            .timestamp_nanos_opt()
            .ok_or_else(|| invalid(format!("timestamp {} out of range", result.timestamp)))?;

        DataPoint::builder(self.measurement.as_str())
            .tag("device", result.device_id.clone())
            .tag("interface", result.interface_id.clone())
            .field("in_rate_mbps", result.in_rate_mbps)
            .field("out_rate_mbps", result.out_rate_mbps)
            .field("in_bytes", clamp_i64(result.in_bytes))
            .field("out_bytes", clamp_i64(result.out_bytes))
            .timestamp(timestamp)
            .build()
            .map_err(|e| invalid(e.to_string()))
    }
}

// Influx integers are signed.
fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn write_batch(&self, results: &[TrafficResult]) -> Result<(), SinkError> {
        if results.is_empty() {
            return Ok(());
        }
        let points = results
            .iter()
            .map(|result| self.data_point(result))
            .collect::<Result<Vec<_>, _>>()?;
        let count = points.len();

        let write = self.client.write_with_precision(
            &self.bucket,
            stream::iter(points),
            TimestampPrecision::Nanoseconds,
        );
        tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| SinkError::Timeout(self.write_timeout))?
            .map_err(|e| SinkError::Write(e.to_string()))?;

        info!(points = count, bucket = %self.bucket, "Wrote traffic metrics.");
        Ok(())
    }
}
