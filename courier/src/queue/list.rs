use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::QueueAdapter;
use crate::envelope::Envelope;
use crate::error::QueueError;

/// Client for a list-based backend (prepend on push, blocking tail pop).
#[async_trait]
pub trait ListBackend: Send + Sync {
    /// Prepend `body` to the list stored at `key`.
    async fn push_front(&self, key: &str, body: String) -> anyhow::Result<()>;

    /// Remove and return the tail of `key`, waiting up to `timeout`.
    async fn pop_back(&self, key: &str, timeout: Duration) -> anyhow::Result<Option<String>>;
}

/// Immediate-only queue adapter over a [`ListBackend`].
///
/// Lists have no visibility delay, so a non-zero delay is ignored and the
/// message is visible at once.
#[derive(Debug)]
pub struct ListQueue<B> {
    backend: B,
    pop_timeout: Duration,
}

impl<B: ListBackend> ListQueue<B> {
    pub fn new(backend: B, pop_timeout: Duration) -> Self {
        Self {
            backend,
            pop_timeout,
        }
    }
}

#[async_trait]
impl<B: ListBackend> QueueAdapter for ListQueue<B> {
    async fn push(
        &self,
        queue: &str,
        payload: &Value,
        delay: Duration,
    ) -> Result<Envelope, QueueError> {
        if !delay.is_zero() {
            debug!(queue, delay_secs = delay.as_secs(), "list backend ignores delay");
        }

        let envelope = Envelope::wrap(payload.clone());
        let wire = envelope.to_wire()?;
        self.backend
            .push_front(queue, wire)
            .await
            .map_err(|e| QueueError::push(queue, e))?;
        Ok(envelope)
    }

    async fn pop(&self, queue: &str) -> Result<Option<Envelope>, QueueError> {
        let body = self
            .backend
            .pop_back(queue, self.pop_timeout)
            .await
            .map_err(|e| QueueError::pop(queue, e))?;

        let Some(body) = body else {
            return Ok(None);
        };

        match Envelope::from_wire(&body) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(err) => {
                warn!(queue, "discarding malformed message: {err}");
                Err(err.into())
            }
        }
    }

    fn backend(&self) -> &'static str {
        "list"
    }
}
