//! Tracing and telemetry instrumentation for courier.
//!
//! Span constructors for the broker's operations plus `record_*` helpers
//! that log a structured event and, with the `metrics` feature, bump the
//! matching Prometheus series. Every helper works without the feature.
//!
//! # Example
//!
//! ```ignore
//! use courier::telemetry::{dispatch_span, record_dispatched, DispatchPath};
//!
//! let span = dispatch_span(job_id, DispatchPath::Inline);
//! let _enter = span.enter();
//! // ... push to the backend
//! record_dispatched("emails", backend_id, DispatchPath::Inline);
//! ```

use std::future::Future;
use tracing::{info_span, Instrument, Span};

/// Which code path dispatched a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchPath {
    /// Pushed synchronously by the enqueue call.
    Inline,
    /// Pushed by the reconciliation loop.
    Reconcile,
}

impl DispatchPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchPath::Inline => "inline",
            DispatchPath::Reconcile => "reconcile",
        }
    }
}

/// Create a tracing span for an enqueue call.
#[must_use]
pub fn enqueue_span(queue: impl AsRef<str>) -> Span {
    info_span!("courier.enqueue", queue = %queue.as_ref())
}

/// Create a tracing span for one dispatch attempt.
///
/// # Arguments
/// * `job_id` - The durable job key
/// * `path` - Which path is dispatching
#[must_use]
pub fn dispatch_span(job_id: impl std::fmt::Display, path: DispatchPath) -> Span {
    info_span!(
        "courier.dispatch",
        job_id = %job_id,
        path = path.as_str(),
    )
}

/// Create a tracing span for one reconciliation cycle.
#[must_use]
pub fn reconcile_span(cycle: u64) -> Span {
    info_span!("courier.reconcile", cycle = cycle)
}

/// Create a tracing span for a pop from a backend queue.
#[must_use]
pub fn pop_span(queue: impl AsRef<str>, backend: &'static str) -> Span {
    info_span!("courier.pop", queue = %queue.as_ref(), backend = backend)
}

/// Create a tracing span for a consumer status report.
#[must_use]
pub fn report_status_span(backend_id: impl AsRef<str>) -> Span {
    info_span!("courier.report_status", backend_id = %backend_id.as_ref())
}

/// Instrument a future with a dispatch span.
pub fn instrument_dispatch<F>(
    job_id: impl std::fmt::Display,
    path: DispatchPath,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(dispatch_span(job_id, path))
}

/// Record a newly created job.
pub fn record_job_enqueued(queue: impl AsRef<str>, scheduled: bool) {
    tracing::info!(queue = %queue.as_ref(), scheduled, "job enqueued");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_enqueued(queue.as_ref());
}

/// Record a successful push to the backend.
pub fn record_dispatched(queue: impl AsRef<str>, backend_id: impl AsRef<str>, path: DispatchPath) {
    tracing::info!(
        queue = %queue.as_ref(),
        backend_id = %backend_id.as_ref(),
        path = path.as_str(),
        "job dispatched"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_dispatched(queue.as_ref(), path.as_str());
}

/// Record a failed dispatch attempt. The job stays eligible for retry.
pub fn record_dispatch_failed(queue: impl AsRef<str>, reason: &'static str, error: impl std::fmt::Display) {
    tracing::warn!(
        queue = %queue.as_ref(),
        reason,
        "dispatch failed, left for reconciliation: {error}"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_dispatch_failure(queue.as_ref(), reason);
}

/// Record the size of a reconciliation snapshot.
pub fn record_reconcile_candidates(count: usize) {
    tracing::debug!(candidates = count, "reconcile snapshot taken");

    #[cfg(feature = "metrics")]
    crate::metrics::set_reconcile_candidates(count as f64);
}

/// Record a consumer-reported status.
pub fn record_status_report(status: impl AsRef<str>) {
    tracing::info!(status = %status.as_ref(), "status reported");

    #[cfg(feature = "metrics")]
    crate::metrics::record_status_report(status.as_ref());
}
