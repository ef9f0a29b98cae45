//! Walks the interface tables of one device and merges the columns into
//! per-interface snapshots.
use super::ber::{Oid, VarBind};
use super::session::{resolve_version, SessionOptions, SnmpError, SnmpSession, WalkError};
use crate::models::{DeviceRecord, RawInterfaceSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Interface table columns read on every poll, in walk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceColumn {
    HcInOctets,
    HcOutOctets,
    HighSpeed,
    OperStatus,
    Alias,
    InOctets,
    OutOctets,
}

impl InterfaceColumn {
    /// High-capacity counters first: the 32-bit columns only fill gaps they leave.
    pub const WALK_ORDER: [InterfaceColumn; 7] = [
        InterfaceColumn::HcInOctets,
        InterfaceColumn::HcOutOctets,
        InterfaceColumn::HighSpeed,
        InterfaceColumn::OperStatus,
        InterfaceColumn::Alias,
        InterfaceColumn::InOctets,
        InterfaceColumn::OutOctets,
    ];

    pub fn root(self) -> Oid {
        let arcs: &[u32] = match self {
            InterfaceColumn::HcInOctets => &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 6],
            InterfaceColumn::HcOutOctets => &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 10],
            InterfaceColumn::HighSpeed => &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 15],
            InterfaceColumn::OperStatus => &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8],
            InterfaceColumn::Alias => &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18],
            InterfaceColumn::InOctets => &[1, 3, 6, 1, 2, 1, 2, 2, 1, 10],
            InterfaceColumn::OutOctets => &[1, 3, 6, 1, 2, 1, 2, 2, 1, 16],
        };
        Oid::from_trusted(arcs)
    }

    pub fn name(self) -> &'static str {
        match self {
            InterfaceColumn::HcInOctets => "ifHCInOctets",
            InterfaceColumn::HcOutOctets => "ifHCOutOctets",
            InterfaceColumn::HighSpeed => "ifHighSpeed",
            InterfaceColumn::OperStatus => "ifOperStatus",
            InterfaceColumn::Alias => "ifAlias",
            InterfaceColumn::InOctets => "ifInOctets",
            InterfaceColumn::OutOctets => "ifOutOctets",
        }
    }
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("cannot open SNMP session with {device} ({address}): {source}")]
    Connect {
        device: String,
        address: String,
        #[source]
        source: SnmpError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalkStatus {
    Complete { rows: usize },
    /// `rows` counts the bindings received before the walk broke off.
    Failed { rows: usize, reason: String },
}

/// Per-subtree outcome of one poll. Failed subtrees do not fail the poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalkDiagnostics {
    pub walks: Vec<(InterfaceColumn, WalkStatus)>,
}

impl WalkDiagnostics {
    pub fn record(&mut self, column: InterfaceColumn, status: WalkStatus) {
        self.walks.push((column, status));
    }

    pub fn failures(&self) -> impl Iterator<Item = (InterfaceColumn, &str)> {
        self.walks.iter().filter_map(|(column, status)| match status {
            WalkStatus::Failed { reason, .. } => Some((*column, reason.as_str())),
            WalkStatus::Complete { .. } => None,
        })
    }

    pub fn all_failed(&self) -> bool {
        !self.walks.is_empty() && self.failures().count() == self.walks.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub snapshots: Vec<RawInterfaceSnapshot>,
    pub diagnostics: WalkDiagnostics,
}

/// Produces the interface snapshots of a device for the current poll.
#[async_trait]
pub trait InterfaceCollector: Send + Sync {
    async fn collect(&self, device: &DeviceRecord) -> Result<Collection, CollectError>;
}

#[derive(Debug)]
struct InterfaceAccumulator {
    alias: String,
    in_octets: u64,
    out_octets: u64,
    speed_mbps: u64,
    oper_up: bool,
    first_seen: DateTime<Utc>,
}

impl InterfaceAccumulator {
    fn new(first_seen: DateTime<Utc>) -> Self {
        Self {
            alias: String::new(),
            in_octets: 0,
            out_octets: 0,
            speed_mbps: 0,
            oper_up: false,
            first_seen,
        }
    }

    fn is_absent(&self) -> bool {
        self.in_octets == 0 && self.out_octets == 0 && !self.oper_up
    }
}

/// Rows of the interface table keyed by ifIndex, filled column by column.
#[derive(Debug)]
pub struct InterfaceTable {
    device_id: String,
    rows: BTreeMap<u32, InterfaceAccumulator>,
}

impl InterfaceTable {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            rows: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, column: InterfaceColumn, varbind: &VarBind, seen_at: DateTime<Utc>) {
        let Some(if_index) = varbind.oid.last_arc() else {
            return;
        };
        let row = self
            .rows
            .entry(if_index)
            .or_insert_with(|| InterfaceAccumulator::new(seen_at));
        let value = &varbind.value;

        match column {
            InterfaceColumn::HcInOctets => row.in_octets = value.as_u64(),
            InterfaceColumn::HcOutOctets => row.out_octets = value.as_u64(),
            // A zero counter is indistinguishable from an unset one here, so an
            // idle 64-bit counter lets the 32-bit reading through.
            InterfaceColumn::InOctets => {
                if row.in_octets == 0 {
                    row.in_octets = value.as_u64();
                }
            }
            InterfaceColumn::OutOctets => {
                if row.out_octets == 0 {
                    row.out_octets = value.as_u64();
                }
            }
            InterfaceColumn::HighSpeed => row.speed_mbps = value.as_u64(),
            InterfaceColumn::OperStatus => row.oper_up = value.as_i64() == Some(1),
            InterfaceColumn::Alias => row.alias = value.to_text(),
        }
    }

    /// Emits one snapshot per interface, skipping rows with no traffic that are not up.
    pub fn into_snapshots(self) -> Vec<RawInterfaceSnapshot> {
        let device_id = self.device_id;
        self.rows
            .into_iter()
            .filter(|(_, row)| !row.is_absent())
            .map(|(if_index, row)| RawInterfaceSnapshot {
                device_id: device_id.clone(),
                interface_id: if row.alias.is_empty() {
                    if_index.to_string()
                } else {
                    row.alias
                },
                if_index,
                in_octets: row.in_octets,
                out_octets: row.out_octets,
                oper_up: row.oper_up,
                speed_mbps: row.speed_mbps,
                captured_at: row.first_seen,
            })
            .collect()
    }
}

/// Collector speaking SNMP v1/v2c over UDP.
#[derive(Debug, Clone, Default)]
pub struct SnmpCollector {
    options: SessionOptions,
}

impl SnmpCollector {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl InterfaceCollector for SnmpCollector {
    async fn collect(&self, device: &DeviceRecord) -> Result<Collection, CollectError> {
        let connect_error = |source: SnmpError| CollectError::Connect {
            device: device.name.clone(),
            address: device.address.clone(),
            source,
        };

        let version = resolve_version(device.version()).map_err(connect_error)?;
        if !device.transport().eq_ignore_ascii_case("udp") {
            warn!(
                device = %device.name,
                transport = %device.transport(),
                "Only UDP transport is supported, polling over UDP."
            );
        }

        let session = SnmpSession::connect(
            &device.address,
            device.port(),
            version,
            device.community(),
            self.options.clone(),
        )
        .await
        .map_err(connect_error)?;

        let mut table = InterfaceTable::new(device.name.clone());
        let mut diagnostics = WalkDiagnostics::default();

        for column in InterfaceColumn::WALK_ORDER {
            // Rows received before a failure are kept; the missing ones stay absent.
            let (rows, status) = match session.walk(&column.root()).await {
                Ok(rows) => {
                    let status = WalkStatus::Complete { rows: rows.len() };
                    (rows, status)
                }
                Err(WalkError { rows, source }) => {
                    debug!(
                        device = %device.name,
                        target_addr = %session.target(),
                        column = column.name(),
                        rows = rows.len(),
                        error = %source,
                        "Subtree walk failed."
                    );
                    let status = WalkStatus::Failed {
                        rows: rows.len(),
                        reason: source.to_string(),
                    };
                    (rows, status)
                }
            };
            let seen_at = Utc::now();
            for varbind in &rows {
                table.apply(column, varbind, seen_at);
            }
            diagnostics.record(column, status);
        }

        Ok(Collection {
            snapshots: table.into_snapshots(),
            diagnostics,
        })
    }
}
