use crate::models::TrafficResult;
use tracing::warn;

pub const DEFAULT_CAPACITY_MBPS: f64 = 1000.0;
pub const DEFAULT_BURST_TOLERANCE: f64 = 1.5;
pub const DEFAULT_GLOBAL_CAP_MBPS: f64 = 20_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accepted,
    AboveCeiling { ceiling_mbps: f64 },
    AboveGlobalCap { cap_mbps: f64 },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Rejects rates that the link could not physically carry.
#[derive(Debug, Clone)]
pub struct AnomalyFilter {
    default_capacity_mbps: f64,
    burst_tolerance: f64,
    global_cap_mbps: f64,
}

impl Default for AnomalyFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_CAPACITY_MBPS,
            DEFAULT_BURST_TOLERANCE,
            DEFAULT_GLOBAL_CAP_MBPS,
        )
    }
}

impl AnomalyFilter {
    pub fn new(default_capacity_mbps: f64, burst_tolerance: f64, global_cap_mbps: f64) -> Self {
        Self {
            default_capacity_mbps,
            burst_tolerance,
            global_cap_mbps,
        }
    }

    /// Unknown (zero) capacity is treated as the default capacity, not as unlimited.
    pub fn effective_capacity(&self, declared_capacity_mbps: u64) -> f64 {
        if declared_capacity_mbps == 0 {
            self.default_capacity_mbps
        } else {
            declared_capacity_mbps as f64
        }
    }

    pub fn ceiling(&self, declared_capacity_mbps: u64) -> f64 {
        self.effective_capacity(declared_capacity_mbps) * self.burst_tolerance
    }

    pub fn evaluate(&self, result: &TrafficResult, declared_capacity_mbps: u64) -> Verdict {
        let peak = result.in_rate_mbps.max(result.out_rate_mbps);
        let ceiling_mbps = self.ceiling(declared_capacity_mbps);

        if peak > ceiling_mbps {
            Verdict::AboveCeiling { ceiling_mbps }
        } else if peak > self.global_cap_mbps {
            Verdict::AboveGlobalCap {
                cap_mbps: self.global_cap_mbps,
            }
        } else {
            Verdict::Accepted
        }
    }

    /// Same as [`evaluate`](Self::evaluate), logging the rejected reading.
    pub fn accept(&self, result: &TrafficResult, declared_capacity_mbps: u64) -> bool {
        let verdict = self.evaluate(result, declared_capacity_mbps);
        match verdict {
            Verdict::Accepted => {}
            Verdict::AboveCeiling { ceiling_mbps } => warn!(
                device = %result.device_id,
                interface = %result.interface_id,
                in_mbps = result.in_rate_mbps,
                out_mbps = result.out_rate_mbps,
                capacity_mbps = self.effective_capacity(declared_capacity_mbps),
                ceiling_mbps,
                "Anomalous rate above link capacity, discarding."
            ),
            Verdict::AboveGlobalCap { cap_mbps } => warn!(
                device = %result.device_id,
                interface = %result.interface_id,
                in_mbps = result.in_rate_mbps,
                out_mbps = result.out_rate_mbps,
                capacity_mbps = self.effective_capacity(declared_capacity_mbps),
                cap_mbps,
                "Anomalous rate above global cap, discarding."
            ),
        }
        verdict.is_accepted()
    }
}
