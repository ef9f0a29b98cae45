use crate::models::DeviceRecord;
use crate::snmp::InterfaceCollector;
use crate::storage::{AnomalyFilter, MetricsSink, RateEngine, RateOutcome};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to one device during a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceReport {
    pub device: String,
    pub connect_failed: bool,
    pub interfaces: usize,
    pub skipped_down: usize,
    /// Interfaces for which the rate engine had no usable rate.
    pub no_rate: usize,
    pub rejected: usize,
    pub results: usize,
    pub written: bool,
}

/// Collect, rate, filter and persist the interfaces of a single device.
pub struct DevicePipeline {
    collector: Arc<dyn InterfaceCollector>,
    rates: Arc<RateEngine>,
    filter: AnomalyFilter,
    sink: Arc<dyn MetricsSink>,
}

impl DevicePipeline {
    pub fn new(
        collector: Arc<dyn InterfaceCollector>,
        rates: Arc<RateEngine>,
        filter: AnomalyFilter,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            collector,
            rates,
            filter,
            sink,
        }
    }

    pub async fn process(&self, device: &DeviceRecord) -> DeviceReport {
        let mut report = DeviceReport {
            device: device.name.clone(),
            ..Default::default()
        };

        let collection = match self.collector.collect(device).await {
            Ok(collection) => collection,
            Err(e) => {
                debug!(device = %device.name, error = %e, "Skipping device, SNMP session failed.");
                report.connect_failed = true;
                return report;
            }
        };

        if collection.diagnostics.all_failed() {
            warn!(
                device = %device.name,
                address = %device.address,
                "Every interface table walk failed."
            );
        } else {
            for (column, reason) in collection.diagnostics.failures() {
                debug!(
                    device = %device.name,
                    column = column.name(),
                    error = reason,
                    "Partial walk failure."
                );
            }
        }

        let mut batch = Vec::new();
        for snapshot in collection.snapshots {
            report.interfaces += 1;
            if !snapshot.oper_up {
                report.skipped_down += 1;
                continue;
            }

            let capacity_mbps = snapshot.speed_mbps;
            let interface = snapshot.interface_id.clone();
            match self.rates.observe(snapshot) {
                RateOutcome::Computed(result) => {
                    if self.filter.accept(&result, capacity_mbps) {
                        batch.push(result);
                    } else {
                        report.rejected += 1;
                    }
                }
                outcome => {
                    report.no_rate += 1;
                    debug!(
                        device = %device.name,
                        interface = %interface,
                        reason = outcome.reason(),
                        "No rate this cycle."
                    );
                }
            }
        }

        report.results = batch.len();
        if !batch.is_empty() {
            match self.sink.write_batch(&batch).await {
                Ok(()) => report.written = true,
                Err(e) => warn!(
                    device = %device.name,
                    points = batch.len(),
                    error = %e,
                    "Failed to write traffic metrics, dropping batch."
                ),
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{device, snapshot, RecordingSink, ScriptedCollector};

    fn pipeline(collector: Arc<ScriptedCollector>, sink: Arc<RecordingSink>) -> DevicePipeline {
        DevicePipeline::new(
            collector,
            Arc::new(RateEngine::default()),
            AnomalyFilter::default(),
            sink,
        )
    }

    #[tokio::test]
    async fn test_second_poll_writes_one_batch() {
        let collector = Arc::new(ScriptedCollector::new(|_, poll| {
            let octets = poll as u64 * 12_500_000;
            Ok(vec![
                snapshot("uplink", octets, octets / 2, true, 1000, poll),
                snapshot("backup", octets, octets, true, 1000, poll),
            ])
        }));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(collector, sink.clone());

        let first = pipeline.process(&device("bng-01")).await;
        assert_eq!(first.no_rate, 2);
        assert!(!first.written);
        assert!(sink.batches().is_empty());

        let second = pipeline.process(&device("bng-01")).await;
        assert_eq!(second.results, 2);
        assert!(second.written);

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        // 12.5 MB over a 60 s poll interval.
        assert_eq!(batches[0][0].in_rate_mbps, 12_500_000.0 * 8.0 / 60_000_000.0);
    }

    #[tokio::test]
    async fn test_down_interfaces_are_skipped() {
        let collector = Arc::new(ScriptedCollector::new(|_, poll| {
            Ok(vec![snapshot("spare", poll as u64 * 1000, 0, false, 1000, poll)])
        }));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(collector, sink.clone());

        pipeline.process(&device("sw-02")).await;
        let report = pipeline.process(&device("sw-02")).await;

        assert_eq!(report.skipped_down, 1);
        assert_eq!(report.no_rate, 0);
        assert!(pipeline.rates.is_empty());
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_anomalies_are_dropped() {
        // 100 Mbps port reporting ~1.3 Gbps on the second poll.
        let collector = Arc::new(ScriptedCollector::new(|_, poll| {
            let octets = poll as u64 * 10_000_000_000;
            Ok(vec![
                snapshot("fe-0/1", octets, 0, true, 100, poll),
                snapshot("xe-0/2", octets, 0, true, 10_000, poll),
            ])
        }));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(collector, sink.clone());

        pipeline.process(&device("pe-01")).await;
        let report = pipeline.process(&device("pe-01")).await;

        assert_eq!(report.rejected, 1);
        assert_eq!(report.results, 1);
        assert_eq!(sink.batches()[0][0].interface_id, "xe-0/2");
    }

    #[tokio::test]
    async fn test_connect_failure_is_contained() {
        let collector = Arc::new(ScriptedCollector::unreachable());
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(collector, sink.clone());

        let report = pipeline.process(&device("dead-01")).await;
        assert!(report.connect_failed);
        assert_eq!(report.interfaces, 0);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_drops_batch() {
        let collector = Arc::new(ScriptedCollector::new(|_, poll| {
            Ok(vec![snapshot("uplink", poll as u64 * 1_000_000, 0, true, 1000, poll)])
        }));
        let sink = Arc::new(RecordingSink::failing());
        let pipeline = pipeline(collector, sink.clone());

        pipeline.process(&device("bng-01")).await;
        let report = pipeline.process(&device("bng-01")).await;

        assert_eq!(report.results, 1);
        assert!(!report.written);
        assert_eq!(sink.attempts(), 1);
    }
}
