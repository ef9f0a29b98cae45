use super::completion::CompletionCounter;
use super::pool::{Job, JobQueue};
use crate::inventory::DeviceInventory;
use crate::storage::RateEngine;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The previous cycle still held the guard.
    Skipped,
    InventoryFailed,
    Cancelled { dispatched: usize },
    Completed { devices: usize, elapsed: Duration },
}

/// Drives one polling pass over the inventory at a time.
pub struct CycleOrchestrator {
    inventory: Arc<dyn DeviceInventory>,
    queue: JobQueue,
    rates: Arc<RateEngine>,
    inventory_timeout: Duration,
    state_retention: Option<Duration>,
    running: Mutex<()>,
}

impl CycleOrchestrator {
    pub fn new(
        inventory: Arc<dyn DeviceInventory>,
        queue: JobQueue,
        rates: Arc<RateEngine>,
        inventory_timeout: Duration,
    ) -> Self {
        Self {
            inventory,
            queue,
            rates,
            inventory_timeout,
            state_retention: None,
            running: Mutex::new(()),
        }
    }

    /// Baselines not refreshed within `retention` are evicted after each completed cycle.
    pub fn with_state_retention(mut self, retention: Option<Duration>) -> Self {
        self.state_retention = retention;
        self
    }

    pub async fn run_cycle(&self, mut cancel: watch::Receiver<bool>) -> CycleOutcome {
        // Released on every return path when `_running` drops.
        let Ok(_running) = self.running.try_lock() else {
            warn!("Previous polling cycle is still running, skipping this one.");
            return CycleOutcome::Skipped;
        };

        let started = Instant::now();
        let devices = match self.inventory.list_active_devices(self.inventory_timeout).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "Failed to fetch device inventory, skipping cycle.");
                return CycleOutcome::InventoryFailed;
            }
        };

        let total = devices.len();
        info!(devices = total, "Starting polling cycle.");

        let completion = CompletionCounter::new();
        for (dispatched, device) in devices.into_iter().enumerate() {
            let job = Job::new(device, completion.ticket());
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    warn!(dispatched, total, "Polling cycle cancelled during dispatch.");
                    return CycleOutcome::Cancelled { dispatched };
                }
                submitted = self.queue.submit(job) => {
                    if let Err(e) = submitted {
                        warn!(dispatched, total, error = %e, "Job queue closed during dispatch.");
                        return CycleOutcome::Cancelled { dispatched };
                    }
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                warn!(
                    dispatched = total,
                    outstanding = completion.outstanding(),
                    "Polling cycle cancelled while jobs were draining."
                );
                return CycleOutcome::Cancelled { dispatched: total };
            }
            _ = completion.wait() => {}
        }

        let elapsed = started.elapsed();
        let avg_ms = if total > 0 {
            elapsed.as_millis() as f64 / total as f64
        } else {
            0.0
        };
        info!(
            devices = total,
            elapsed_ms = elapsed.as_millis() as u64,
            avg_ms_per_device = avg_ms,
            "Polling cycle finished."
        );

        self.evict_stale_baselines();
        CycleOutcome::Completed {
            devices: total,
            elapsed,
        }
    }

    fn evict_stale_baselines(&self) {
        let Some(retention) = self.state_retention else {
            return;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let removed = self.rates.evict_older_than(Utc::now() - retention);
        if removed > 0 {
            info!(removed, remaining = self.rates.len(), "Evicted stale interface baselines.");
        }
    }
}

/// Resolves once cancellation is requested. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
