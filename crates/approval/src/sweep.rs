//! Background expiry sweep

use crate::engine::CustodyEngine;
use custody_core::TransactionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Result of one or more sweep passes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Transactions moved to `Expired`
    pub expired: Vec<TransactionId>,
    /// Unused challenges deleted after their expiry
    pub challenges_pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.challenges_pruned == 0
    }

    fn merge(&mut self, other: SweepReport) {
        self.expired.extend(other.expired);
        self.challenges_pruned += other.challenges_pruned;
    }
}

/// Sweep every `interval` until `shutdown` flips to true or its sender is
/// dropped. Returns everything swept while running.
///
/// A failed pass is logged and retried on the next tick.
pub async fn run_expiry_sweep(
    engine: Arc<CustodyEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> SweepReport {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut total = SweepReport::default();

    tracing::info!(interval_ms = interval.as_millis() as u64, "Expiry sweep started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match engine.sweep_expired() {
                    Ok(report) => {
                        if !report.is_empty() {
                            tracing::info!(
                                expired = report.expired.len(),
                                challenges_pruned = report.challenges_pruned,
                                "Sweep pass"
                            );
                        }
                        total.merge(report);
                    }
                    Err(e) => tracing::error!(error = %e, "Sweep pass failed"),
                }
            }
        }
    }
    tracing::info!(expired = total.expired.len(), "Expiry sweep stopped");
    total
}
