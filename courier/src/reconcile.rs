//! Periodic re-dispatch of records that have no backend id.
//!
//! A record is left without a backend id when it was scheduled for later or
//! when its inline push failed. Each cycle snapshots the due, undispatched
//! records and runs each one through the [`DispatchEngine`]; the lease inside
//! the engine makes a stale snapshot harmless.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::config::ReconcilerConfig;
use crate::dispatch::{DispatchEngine, DispatchOutcome};
use crate::error::{DispatchError, StoreError};
use crate::runtime::ShutdownToken;
use crate::telemetry::{self, DispatchPath};

/// Counts from one reconciliation cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records in the snapshot.
    pub candidates: usize,
    /// Records this cycle pushed.
    pub dispatched: usize,
    /// Records another caller dispatched first, or that vanished.
    pub skipped: usize,
    /// Records whose dispatch failed; they stay eligible.
    pub failed: usize,
}

#[derive(Debug)]
pub struct Reconciler {
    engine: DispatchEngine,
    config: ReconcilerConfig,
    cycles: AtomicU64,
}

impl Reconciler {
    pub fn new(engine: DispatchEngine, config: ReconcilerConfig) -> Self {
        Self {
            engine,
            config,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one cycle against the current time.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle treating `now` as the current time.
    ///
    /// Only a failure to take the snapshot aborts the cycle. A failure on one
    /// record is logged and the cycle moves on to the next.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        self.cycle(now).instrument(telemetry::reconcile_span(cycle)).await
    }

    async fn cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        let candidates = self
            .engine
            .store()
            .due_undispatched(now, self.config.batch_size)
            .await?;
        telemetry::record_reconcile_candidates(candidates.len());

        let mut report = CycleReport {
            candidates: candidates.len(),
            ..CycleReport::default()
        };

        for id in candidates {
            match self
                .engine
                .dispatch_at(id, DispatchPath::Reconcile, now)
                .await
            {
                Ok(DispatchOutcome::Dispatched(_)) => report.dispatched += 1,
                Ok(DispatchOutcome::AlreadyDispatched(_) | DispatchOutcome::NotDue(_)) => {
                    report.skipped += 1
                }
                Err(DispatchError::Store(StoreError::NotFound)) => {
                    debug!(job_id = %id, "candidate vanished before dispatch");
                    report.skipped += 1;
                }
                Err(err) if err.is_transient() => {
                    debug!(job_id = %id, reason = err.reason(), "will retry next cycle: {err}");
                    report.failed += 1;
                }
                Err(err) => {
                    warn!(job_id = %id, reason = err.reason(), "dispatch failed: {err}");
                    report.failed += 1;
                }
            }
        }

        if report.candidates > 0 {
            info!(
                candidates = report.candidates,
                dispatched = report.dispatched,
                skipped = report.skipped,
                failed = report.failed,
                "reconcile cycle complete"
            );
        }

        Ok(report)
    }

    /// Run cycles every `interval` until `shutdown` fires.
    ///
    /// A cycle in progress when shutdown fires runs to completion.
    pub fn spawn(self: Arc<Self>, shutdown: ShutdownToken) -> JoinHandle<()> {
        let interval = self.config.interval();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Reconciler shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = self.run_cycle().await {
                            warn!("reconcile snapshot error: {err}");
                        }
                    }
                }
            }
        })
    }
}
