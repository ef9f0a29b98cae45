//! In-memory collaborators for pool and orchestrator tests.
use crate::inventory::{DeviceInventory, InventoryError};
use crate::models::{DeviceRecord, RawInterfaceSnapshot, TrafficResult};
use crate::snmp::{CollectError, Collection, InterfaceCollector, SnmpError};
use crate::storage::{MetricsSink, SinkError};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

pub(crate) fn device(name: &str) -> DeviceRecord {
    DeviceRecord {
        id: format!("id-{name}"),
        address: "192.0.2.1".to_string(),
        name: name.to_string(),
        status_icmp: Some("up".to_string()),
        ..Default::default()
    }
}

/// Snapshot taken `poll` minutes into the test timeline.
pub(crate) fn snapshot(
    interface: &str,
    in_octets: u64,
    out_octets: u64,
    oper_up: bool,
    speed_mbps: u64,
    poll: usize,
) -> RawInterfaceSnapshot {
    RawInterfaceSnapshot {
        device_id: String::new(),
        interface_id: interface.to_string(),
        if_index: 1,
        in_octets,
        out_octets,
        oper_up,
        speed_mbps,
        captured_at: Utc.timestamp_opt(1_700_000_000 + poll as i64 * 60, 0).unwrap(),
    }
}

type ScriptResult = Result<Vec<RawInterfaceSnapshot>, CollectError>;
type Script = dyn Fn(&DeviceRecord, usize) -> ScriptResult + Send + Sync;

/// Answers each poll from a closure given the device and how many times it was polled before.
pub(crate) struct ScriptedCollector {
    script: Box<Script>,
    polls: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedCollector {
    pub(crate) fn new<F>(script: F) -> Self
    where
        F: Fn(&DeviceRecord, usize) -> ScriptResult + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            polls: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self::new(|device, _| {
            Err(CollectError::Connect {
                device: device.name.clone(),
                address: device.address.clone(),
                source: SnmpError::Resolve(device.address.clone()),
            })
        })
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InterfaceCollector for ScriptedCollector {
    async fn collect(&self, device: &DeviceRecord) -> Result<Collection, CollectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let poll = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(device.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let mut snapshots = (self.script)(device, poll)?;
        for snapshot in &mut snapshots {
            snapshot.device_id = device.name.clone();
        }
        Ok(Collection {
            snapshots,
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    batches: Mutex<Vec<Vec<TrafficResult>>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingSink {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub(crate) fn batches(&self) -> Vec<Vec<TrafficResult>> {
        self.batches.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn write_batch(&self, results: &[TrafficResult]) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SinkError::Write("connection refused".to_string()));
        }
        self.batches.lock().unwrap().push(results.to_vec());
        Ok(())
    }
}

/// Inventory returning a fixed list, optionally held until released.
pub(crate) struct StaticInventory {
    devices: Vec<DeviceRecord>,
    fail: bool,
    gate: Option<Semaphore>,
    calls: AtomicUsize,
}

impl StaticInventory {
    pub(crate) fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices,
            fail: false,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// Every fetch blocks until [`release`](Self::release) is called.
    pub(crate) fn gated(devices: Vec<DeviceRecord>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(devices)
        }
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceInventory for StaticInventory {
    async fn list_active_devices(
        &self,
        timeout: Duration,
    ) -> Result<Vec<DeviceRecord>, InventoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.fail {
            return Err(InventoryError::Timeout(timeout));
        }
        Ok(self.devices.clone())
    }
}
