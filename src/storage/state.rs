use crate::models::{RawInterfaceSnapshot, TrafficResult};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Polls closer together than this would turn counter jitter into huge rates.
pub const MIN_INTERVAL_SECS: f64 = 1.0;
/// Anything above 200 Gbps is a device or counter glitch, not traffic.
pub const DEFAULT_MAX_VALID_RATE_MBPS: f64 = 200_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceKey {
    pub device_id: String,
    pub interface_id: String,
}

impl From<&RawInterfaceSnapshot> for InterfaceKey {
    fn from(snapshot: &RawInterfaceSnapshot) -> Self {
        Self {
            device_id: snapshot.device_id.clone(),
            interface_id: snapshot.interface_id.clone(),
        }
    }
}

/// What the rate engine made of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum RateOutcome {
    Computed(TrafficResult),
    /// First sighting of the interface; the snapshot only seeds the baseline.
    Baseline,
    IntervalTooShort { elapsed_secs: f64 },
    /// A counter went backwards: wrap, reset or reboot.
    CounterRegression,
    Implausible { in_rate_mbps: f64, out_rate_mbps: f64 },
}

impl RateOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, RateOutcome::Computed(_))
    }

    pub fn into_result(self) -> Option<TrafficResult> {
        match self {
            RateOutcome::Computed(result) => Some(result),
            _ => None,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            RateOutcome::Computed(_) => "computed",
            RateOutcome::Baseline => "baseline",
            RateOutcome::IntervalTooShort { .. } => "interval_too_short",
            RateOutcome::CounterRegression => "counter_regression",
            RateOutcome::Implausible { .. } => "implausible_rate",
        }
    }
}

/// Turns consecutive snapshots of an interface into bandwidth.
///
/// Holds the latest snapshot per (device, interface). Every observed snapshot
/// replaces the stored one, whether or not it produced a usable rate, so a
/// rejected reading still becomes the baseline for the next poll. The table is
/// sharded; the lookup-and-replace for one key happens under that key's shard
/// lock.
#[derive(Debug)]
pub struct RateEngine {
    previous: DashMap<InterfaceKey, RawInterfaceSnapshot>,
    max_valid_rate_mbps: f64,
}

impl Default for RateEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VALID_RATE_MBPS)
    }
}

impl RateEngine {
    pub fn new(max_valid_rate_mbps: f64) -> Self {
        Self {
            previous: DashMap::new(),
            max_valid_rate_mbps,
        }
    }

    pub fn observe(&self, snapshot: RawInterfaceSnapshot) -> RateOutcome {
        let previous = match self.previous.entry(InterfaceKey::from(&snapshot)) {
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
                return RateOutcome::Baseline;
            }
            Entry::Occupied(mut slot) => slot.insert(snapshot.clone()),
        };
        self.compute(&previous, &snapshot)
    }

    fn compute(
        &self,
        previous: &RawInterfaceSnapshot,
        current: &RawInterfaceSnapshot,
    ) -> RateOutcome {
        let elapsed_secs =
            (current.captured_at - previous.captured_at).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs < MIN_INTERVAL_SECS {
            return RateOutcome::IntervalTooShort { elapsed_secs };
        }

        if current.in_octets < previous.in_octets || current.out_octets < previous.out_octets {
            return RateOutcome::CounterRegression;
        }

        let in_bytes = current.in_octets - previous.in_octets;
        let out_bytes = current.out_octets - previous.out_octets;
        let in_rate_mbps = to_mbps(in_bytes, elapsed_secs);
        let out_rate_mbps = to_mbps(out_bytes, elapsed_secs);

        if in_rate_mbps > self.max_valid_rate_mbps || out_rate_mbps > self.max_valid_rate_mbps {
            return RateOutcome::Implausible {
                in_rate_mbps,
                out_rate_mbps,
            };
        }

        RateOutcome::Computed(TrafficResult {
            device_id: current.device_id.clone(),
            interface_id: current.interface_id.clone(),
            in_rate_mbps,
            out_rate_mbps,
            in_bytes,
            out_bytes,
            timestamp: current.captured_at,
        })
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// Drops baselines whose latest snapshot was captured before `cutoff`.
    /// Returns how many entries were removed.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.previous.retain(|_, snapshot| {
            let keep = snapshot.captured_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

fn to_mbps(bytes: u64, elapsed_secs: f64) -> f64 {
    (bytes as f64 * 8.0) / (elapsed_secs * 1_000_000.0)
}
