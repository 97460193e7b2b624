//! Prometheus metrics for courier.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `courier_jobs_enqueued_total` - Jobs accepted by the broker
//! - `courier_jobs_dispatched_total` - Successful pushes, by dispatch path
//! - `courier_dispatch_failures_total` - Failed dispatch attempts, by reason
//! - `courier_status_reports_total` - Consumer status reports, by status
//!
//! ## Gauges
//! - `courier_reconcile_candidates` - Size of the last reconcile snapshot
//!
//! ## Histograms
//! - `courier_push_duration_seconds` - Backend push latency
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, Gauge, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for courier metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `queue`.
pub static JOBS_ENQUEUED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("courier_jobs_enqueued_total", "Total number of jobs enqueued");
    CounterVec::new(opts, &["queue"]).expect("courier_jobs_enqueued_total metric creation failed")
});

/// Labels: `queue`, `path` (inline, reconcile).
pub static JOBS_DISPATCHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "courier_jobs_dispatched_total",
        "Total number of jobs pushed to a backend queue",
    );
    CounterVec::new(opts, &["queue", "path"])
        .expect("courier_jobs_dispatched_total metric creation failed")
});

/// Labels: `queue`, `reason`.
pub static DISPATCH_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "courier_dispatch_failures_total",
        "Total number of failed dispatch attempts",
    );
    CounterVec::new(opts, &["queue", "reason"])
        .expect("courier_dispatch_failures_total metric creation failed")
});

/// Labels: `status`.
pub static STATUS_REPORTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "courier_status_reports_total",
        "Total number of consumer status reports",
    );
    CounterVec::new(opts, &["status"])
        .expect("courier_status_reports_total metric creation failed")
});

pub static RECONCILE_CANDIDATES: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new(
        "courier_reconcile_candidates",
        "Undispatched due jobs found by the last reconcile cycle",
    )
    .expect("courier_reconcile_candidates metric creation failed")
});

/// Labels: `backend`.
pub static PUSH_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "courier_push_duration_seconds",
        "Backend push latency in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["backend"])
        .expect("courier_push_duration_seconds metric creation failed")
});

/// Register all metrics with the global registry.
///
/// Idempotent.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_ENQUEUED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_DISPATCHED_TOTAL.clone()),
        Box::new(DISPATCH_FAILURES_TOTAL.clone()),
        Box::new(STATUS_REPORTS_TOTAL.clone()),
        Box::new(RECONCILE_CANDIDATES.clone()),
        Box::new(PUSH_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_enqueued(queue: &str) {
    JOBS_ENQUEUED_TOTAL.with_label_values(&[queue]).inc();
}

pub fn record_job_dispatched(queue: &str, path: &str) {
    JOBS_DISPATCHED_TOTAL.with_label_values(&[queue, path]).inc();
}

pub fn record_dispatch_failure(queue: &str, reason: &str) {
    DISPATCH_FAILURES_TOTAL
        .with_label_values(&[queue, reason])
        .inc();
}

pub fn record_status_report(status: &str) {
    STATUS_REPORTS_TOTAL.with_label_values(&[status]).inc();
}

pub fn set_reconcile_candidates(count: f64) {
    RECONCILE_CANDIDATES.set(count);
}

pub fn observe_push_duration(backend: &str, duration_secs: f64) {
    PUSH_DURATION_SECONDS
        .with_label_values(&[backend])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
