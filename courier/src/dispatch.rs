//! At-most-once assignment of backend ids.
//!
//! Both the inline enqueue path and the reconciliation loop dispatch through
//! [`DispatchEngine::dispatch`]. The engine takes the record's exclusive
//! lease, re-reads it, and only pushes when the re-read shows no backend id.
//! Concurrent callers for the same record serialize on the lease; every one
//! after the winner observes the assigned id and does nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, Instrument};

use crate::error::{DispatchError, StoreError};
use crate::job::{JobId, JobRecord};
use crate::persistence::JobStore;
use crate::queue::QueueAdapter;
use crate::telemetry::{self, DispatchPath};

/// Result of a dispatch call that did not fail.
#[derive(Clone, Debug)]
pub enum DispatchOutcome {
    /// This call pushed the message and persisted its backend id.
    Dispatched(JobRecord),
    /// Another caller had already dispatched the record.
    AlreadyDispatched(JobRecord),
    /// The record is scheduled in the future; the lease was released.
    NotDue(JobRecord),
}

impl DispatchOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            DispatchOutcome::Dispatched(r)
            | DispatchOutcome::AlreadyDispatched(r)
            | DispatchOutcome::NotDue(r) => r,
        }
    }

    pub fn into_record(self) -> JobRecord {
        match self {
            DispatchOutcome::Dispatched(r)
            | DispatchOutcome::AlreadyDispatched(r)
            | DispatchOutcome::NotDue(r) => r,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched(_))
    }
}

/// Pushes job records to the backend queue under their row lease.
#[derive(Clone)]
pub struct DispatchEngine {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueAdapter>,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("backend", &self.queue.backend())
            .finish()
    }
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn QueueAdapter>) -> Self {
        Self { store, queue }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn QueueAdapter> {
        &self.queue
    }

    /// Dispatch `id` if it is due and has no backend id yet.
    pub async fn dispatch(
        &self,
        id: JobId,
        path: DispatchPath,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatch_at(id, path, Utc::now()).await
    }

    /// Same as [`dispatch`](Self::dispatch) with an explicit notion of "now".
    pub async fn dispatch_at(
        &self,
        id: JobId,
        path: DispatchPath,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, DispatchError> {
        telemetry::instrument_dispatch(id, path, self.dispatch_locked(id, path, now)).await
    }

    async fn dispatch_locked(
        &self,
        id: JobId,
        path: DispatchPath,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let lock = self.store.lock(id).await?.ok_or(StoreError::NotFound)?;
        let record = lock.record().clone();

        if record.is_dispatched() {
            lock.release().await?;
            debug!("already dispatched");
            return Ok(DispatchOutcome::AlreadyDispatched(record));
        }

        if !record.is_due(now) {
            lock.release().await?;
            debug!(scheduled_at = %record.scheduled_at, "not due yet");
            return Ok(DispatchOutcome::NotDue(record));
        }

        let delay = dispatch_delay(record.scheduled_at, now);

        let started = Instant::now();
        let pushed = self
            .queue
            .push(&record.queue_name, &record.payload, delay)
            .in_current_span()
            .await;
        observe_push(self.queue.backend(), started);

        match pushed {
            Ok(envelope) => {
                let updated = lock.assign_backend_id(envelope.id.as_str()).await?;
                telemetry::record_dispatched(&updated.queue_name, envelope.id.as_str(), path);
                Ok(DispatchOutcome::Dispatched(updated))
            }
            Err(push_err) => {
                let err = DispatchError::from(push_err);
                if let Err(store_err) = lock.record_failure(&err.to_string()).await {
                    error!(job_id = %id, "failed to record dispatch failure: {store_err}");
                }
                telemetry::record_dispatch_failed(&record.queue_name, err.reason(), &err);
                Err(err)
            }
        }
    }
}

/// Visibility delay for a record scheduled at `scheduled_at`, never negative.
///
/// The engine only pushes due records, so this is always zero in practice and
/// a backend's delay limit cannot reject a dispatch.
pub fn dispatch_delay(scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (scheduled_at - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(feature = "metrics")]
fn observe_push(backend: &'static str, started: Instant) {
    crate::metrics::observe_push_duration(backend, started.elapsed().as_secs_f64());
}

#[cfg(not(feature = "metrics"))]
fn observe_push(_backend: &'static str, _started: Instant) {}
