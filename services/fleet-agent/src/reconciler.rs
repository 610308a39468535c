//! Reconciliation loop for keeping image registries in sync with the backend.
//!
//! The reconciler:
//! - Periodically reconciles every image of the fleet
//! - Logs failed passes, escalating after repeated failures per image
//! - Leaves retries to the next tick

use std::sync::Arc;
use std::time::Duration;

use taskfleet_reconcile::{FailureStreak, DEFAULT_ESCALATION_THRESHOLD, DEFAULT_RECONCILE_INTERVAL};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::coordinator::FleetCoordinator;

/// Reconciliation loop configuration.
pub struct ReconcilerConfig {
    /// Interval between passes.
    pub reconcile_interval: Duration,

    /// Consecutive failures per image tolerated before logging at error level.
    pub escalation_threshold: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
        }
    }
}

/// Reconciler for the whole fleet.
pub struct Reconciler {
    coordinator: Arc<FleetCoordinator>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(coordinator: Arc<FleetCoordinator>, config: ReconcilerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            reconcile_interval_secs = self.config.reconcile_interval.as_secs(),
            image_count = self.coordinator.images().len(),
            "Starting reconciliation loop"
        );

        let mut failures = FailureStreak::new(self.config.escalation_threshold);
        let mut reconcile_interval = tokio::time::interval(self.config.reconcile_interval);
        // A slow pass delays the next one instead of stacking passes.
        reconcile_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = reconcile_interval.tick() => {
                    self.reconcile_once(&mut failures).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single pass over every image. Returns the number of images that failed.
    pub async fn reconcile_once(&self, failures: &mut FailureStreak) -> usize {
        debug!("Starting reconciliation");

        let outcomes = self.coordinator.populate_all().await;
        let mut failed = 0;

        for outcome in outcomes {
            match outcome.result {
                Ok(()) => {
                    if let Some(streak) = failures.record_success(&outcome.image_id) {
                        info!(
                            image_id = %outcome.image_id,
                            failed_passes = streak,
                            "Image reconciliation recovered"
                        );
                    }
                }
                Err(e) => {
                    failed += 1;
                    let consecutive_failures = failures.record_failure(&outcome.image_id);
                    if failures.is_escalated(consecutive_failures) {
                        error!(
                            image_id = %outcome.image_id,
                            error = %e,
                            reason_code = e.reason_code(),
                            consecutive_failures,
                            "Image reconciliation failed repeatedly"
                        );
                    } else {
                        warn!(
                            image_id = %outcome.image_id,
                            error = %e,
                            consecutive_failures,
                            "Image reconciliation failed"
                        );
                    }
                }
            }
        }

        debug!(
            failed,
            total_instances = self.coordinator.total_instance_count(),
            "Reconciliation finished"
        );
        failed
    }
}
