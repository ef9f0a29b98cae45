use chrono::{DateTime, Utc};

/// Counters of one interface as read during a single poll.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInterfaceSnapshot {
    pub device_id: String,
    /// Interface alias when the device reports one, the numeric ifIndex otherwise.
    pub interface_id: String,
    pub if_index: u32,
    pub in_octets: u64,
    pub out_octets: u64,
    pub oper_up: bool,
    /// Declared link speed in Mbps, 0 when unknown.
    pub speed_mbps: u64,
    pub captured_at: DateTime<Utc>,
}

/// Bandwidth computed from two consecutive snapshots of the same interface.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficResult {
    pub device_id: String,
    pub interface_id: String,
    pub in_rate_mbps: f64,
    pub out_rate_mbps: f64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub timestamp: DateTime<Utc>,
}
