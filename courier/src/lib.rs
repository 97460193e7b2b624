//! Courier - durable job dispatch to interchangeable backend queues.
//!
//! Clients enqueue jobs addressed to named queues, optionally for a later
//! time. Each job is persisted as a [`JobRecord`] and pushed to a backend
//! queue exactly once, either inline by the enqueue call or later by the
//! [`Reconciler`]. Consumers pop payloads from the backend and report their
//! status back by the backend id the job was dispatched under.
//!
//! # Core Concepts
//!
//! - **Envelope**: [`Envelope`] wraps a payload with a fresh id for the wire.
//!
//! - **Queue**: [`QueueAdapter`] abstracts the backend, with a list-based
//!   [`ListQueue`] (immediate only) and a delay-capable [`DelayQueue`].
//!
//! - **Store**: [`JobStore`] persists records and grants the per-record
//!   exclusive lease that makes dispatch at-most-once.
//!
//! - **Dispatch**: [`DispatchEngine`] pushes a record under its lease and
//!   persists the backend id, or records the failure.
//!
//! - **Runtime**: [`Broker`] is the facade a transport layer talks to.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL job store via sqlx
//! - `redis` - Redis list backend for [`ListQueue`]
//! - `sqs` - Amazon SQS backend for [`DelayQueue`]
//! - `metrics` - Prometheus metrics support

/// Configuration structures for persistence, backends and the reconciler.
pub mod config;

/// Dispatch of one record under its exclusive lease.
pub mod dispatch;

/// Wire envelope codec.
pub mod envelope;

/// Error types for every layer.
pub mod error;

/// Job record, status and identifiers.
pub mod job;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

/// Job store trait and the PostgreSQL implementation.
pub mod persistence;

/// Queue adapter trait, list and delay variants, backend clients.
pub mod queue;

/// Periodic dispatch of due records left without a backend id.
pub mod reconcile;

/// Broker facade, builder and shutdown signaling.
pub mod runtime;

/// Tracing spans and structured events.
pub mod telemetry;

pub use config::*;
pub use dispatch::{DispatchEngine, DispatchOutcome};
pub use envelope::{Envelope, EnvelopeId};
pub use error::*;
pub use job::*;
pub use persistence::{JobLock, JobStore};
pub use queue::*;
pub use reconcile::{CycleReport, Reconciler};
pub use runtime::{Broker, BrokerBuilder, ShutdownToken};
pub use telemetry::DispatchPath;
