//! Background sweep for stuck workflows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cluster::{IdempotencyTracker, LeaseCoordinator};
use event_store::EventStore;
use tokio::sync::watch;

use crate::dispatch::StepDispatcher;
use crate::orchestrator::Orchestrator;

/// Default interval between overdue sweeps.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Periodically re-drives workflows whose step deadline has passed.
///
/// Each tick it asks the orchestrator to sweep, which re-dispatches stuck
/// steps still inside their retry budget and compensates the rest. Only
/// workflows in partitions this node owns are touched, so running one
/// monitor per node is safe.
pub struct TimeoutMonitor<S, D, T, C>
where
    S: EventStore + Clone,
    D: StepDispatcher,
    T: IdempotencyTracker,
    C: LeaseCoordinator,
{
    orchestrator: Arc<Orchestrator<S, D, T, C>>,
    scan_interval: Duration,
}

impl<S, D, T, C> TimeoutMonitor<S, D, T, C>
where
    S: EventStore + Clone,
    D: StepDispatcher,
    T: IdempotencyTracker,
    C: LeaseCoordinator,
{
    /// Creates a monitor with the default scan interval.
    pub fn new(orchestrator: Arc<Orchestrator<S, D, T, C>>) -> Self {
        Self {
            orchestrator,
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    /// Replaces the scan interval.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Runs one sweep immediately.
    pub async fn tick(&self) -> crate::error::Result<u32> {
        self.orchestrator.sweep_overdue(Utc::now()).await
    }

    /// Sweeps on an interval until the shutdown signal flips to true.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(swept) => {
                            tracing::info!(swept, "overdue sweep re-drove workflows");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "overdue sweep failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("timeout monitor shutting down");
                        return;
                    }
                }
            }
        }
    }
}
