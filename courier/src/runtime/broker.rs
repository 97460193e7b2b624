use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use super::shutdown::ShutdownToken;
use crate::config::BrokerConfig;
use crate::dispatch::DispatchEngine;
use crate::envelope::Envelope;
use crate::error::BrokerError;
use crate::job::{JobRecord, JobStatus, NewJob};
use crate::persistence::JobStore;
use crate::queue::QueueAdapter;
use crate::reconcile::Reconciler;
use crate::telemetry::{self, DispatchPath};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Entry point for the transport layer.
///
/// Every operation is a thin pass-through to the job store or the dispatch
/// engine; the broker itself holds no job state, so several brokers may
/// share one store.
pub struct Broker {
    config: BrokerConfig,
    engine: DispatchEngine,
    reconciler: Arc<Reconciler>,
    shutdown_token: ShutdownToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.config)
            .field("backend", &self.engine.queue().backend())
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl Broker {
    pub(crate) fn new(
        config: BrokerConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueAdapter>,
    ) -> Self {
        let engine = DispatchEngine::new(store, queue);
        let reconciler = Arc::new(Reconciler::new(engine.clone(), config.reconciler.clone()));
        Self {
            config,
            engine,
            reconciler,
            shutdown_token: ShutdownToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown_token.clone()
    }

    /// Create a job and, when it is already due, dispatch it inline.
    ///
    /// A transient dispatch failure (backend unreachable, lock wait exceeded)
    /// is not an error for the caller: the record is returned without a
    /// backend id and the reconciler picks it up on a later cycle.
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: Value,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<JobRecord, BrokerError> {
        self.enqueue_inner(queue, payload, scheduled_at)
            .instrument(telemetry::enqueue_span(queue))
            .await
    }

    async fn enqueue_inner(
        &self,
        queue: &str,
        payload: Value,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<JobRecord, BrokerError> {
        let new_job = match scheduled_at {
            Some(at) => NewJob::scheduled(queue, payload, at),
            None => NewJob::immediate(queue, payload),
        };

        let record = self.engine.store().create(new_job).await?;
        // An immediate job is due at whatever timestamp the store persisted,
        // which may be rounded past the local clock.
        let now = match scheduled_at {
            Some(_) => Utc::now(),
            None => Utc::now().max(record.scheduled_at),
        };
        let due = record.is_due(now);
        telemetry::record_job_enqueued(&record.queue_name, !due);

        if !due {
            return Ok(record);
        }

        match self
            .engine
            .dispatch_at(record.id, DispatchPath::Inline, now)
            .await
        {
            Ok(outcome) => Ok(outcome.into_record()),
            Err(err) if err.is_transient() => {
                warn!(job_id = %record.id, "inline dispatch deferred: {err}");
                let current = self.engine.store().get(record.id).await?;
                Ok(current.unwrap_or(record))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a consumer-reported status and optional result.
    pub async fn report_status(
        &self,
        backend_id: &str,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<JobRecord, BrokerError> {
        async {
            let record = self
                .engine
                .store()
                .report_status(backend_id, &status, result.as_deref())
                .await?
                .ok_or(BrokerError::NotFound)?;
            telemetry::record_status_report(status.as_str());
            Ok::<_, BrokerError>(record)
        }
        .instrument(telemetry::report_status_span(backend_id))
        .await
    }

    /// Read back a record by the backend id it was dispatched under.
    pub async fn get(&self, backend_id: &str) -> Result<JobRecord, BrokerError> {
        self.engine
            .store()
            .find_by_backend_id(backend_id)
            .await?
            .ok_or(BrokerError::NotFound)
    }

    /// Most recent records first, capped at the configured listing limit.
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>, BrokerError> {
        Ok(self.engine.store().list(self.config.list_limit).await?)
    }

    /// Pop one message from the backend queue.
    ///
    /// Consumer pull path. Never touches job records.
    pub async fn pop(&self, queue: &str) -> Result<Option<Envelope>, BrokerError> {
        let adapter = self.engine.queue();
        Ok(adapter
            .pop(queue)
            .instrument(telemetry::pop_span(queue, adapter.backend()))
            .await?)
    }

    /// Probe the store.
    pub async fn health(&self) -> Result<(), BrokerError> {
        Ok(self.engine.store().ping().await?)
    }

    /// Start the reconciliation loop as a background task.
    pub async fn spawn_reconciler(&self) {
        let handle = self.reconciler.clone().spawn(self.shutdown_token.clone());
        self.handles.lock().await.push(handle);
        info!(
            interval_ms = self.config.reconciler.interval_ms,
            batch_size = self.config.reconciler.batch_size,
            "reconciler started"
        );
    }

    /// Stop background tasks, letting an in-flight cycle finish.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!("Initiating graceful shutdown of broker");

        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task failed: {:?}", e),
                Err(_) => warn!("Background task timed out during shutdown"),
            }
        }

        info!("Broker shutdown complete");
        Ok(())
    }
}
