//! Queue adapters.
//!
//! A [`QueueAdapter`] hands envelopes to a backend queue and pops them back
//! out. Two variants exist:
//!
//! - [`ListQueue`] speaks a blocking-pop list protocol (push = prepend,
//!   pop = blocking remove-from-tail). It has no notion of delay.
//! - [`DelayQueue`] speaks a message-queue protocol with delayed visibility
//!   and explicit delete-after-receive.
//!
//! Each variant is generic over a thin backend client trait
//! ([`ListBackend`], [`MessageBackend`]) so that the envelope and delay rules
//! live here while the wire clients live behind feature flags.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::QueueError;

mod delay;
mod list;

#[cfg(feature = "redis")]
pub mod redis_list;
#[cfg(feature = "sqs")]
pub mod sqs;

pub use delay::{DelayQueue, MessageBackend, ReceivedMessage};
pub use list::{ListBackend, ListQueue};

/// Capability shared by every backend queue variant.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Wrap `payload` and enqueue it on `queue`, visible after `delay`.
    ///
    /// Returns the envelope actually sent so the caller can record its id.
    async fn push(
        &self,
        queue: &str,
        payload: &Value,
        delay: Duration,
    ) -> Result<Envelope, QueueError>;

    /// Wait a bounded interval for one message and remove it from the backend.
    ///
    /// Returns `Ok(None)` when nothing arrives within the wait window.
    async fn pop(&self, queue: &str) -> Result<Option<Envelope>, QueueError>;

    /// Backend name used in logs.
    fn backend(&self) -> &'static str;
}

/// Replace characters a backend forbids in queue names.
///
/// The substitution is deterministic: `/` becomes `_`, `.` becomes `-`,
/// and anything outside `[A-Za-z0-9_-]` becomes `-`.
pub fn sanitize_queue_name(queue: &str) -> String {
    queue
        .chars()
        .map(|c| match c {
            '/' => '_',
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => c,
            _ => '-',
        })
        .collect()
}
