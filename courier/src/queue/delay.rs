use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{sanitize_queue_name, QueueAdapter};
use crate::envelope::Envelope;
use crate::error::QueueError;

/// A message received from a [`MessageBackend`], not yet deleted.
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    pub body: String,
    /// Opaque handle used to delete the message.
    pub receipt: String,
}

/// Client for a message-queue backend with delayed visibility.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Send `body` to `queue`, invisible for `delay`.
    async fn send(&self, queue: &str, body: String, delay: Duration) -> anyhow::Result<()>;

    /// Long-poll `queue` for at most `wait`.
    async fn receive(&self, queue: &str, wait: Duration)
        -> anyhow::Result<Option<ReceivedMessage>>;

    /// Delete a received message so it is not redelivered.
    async fn delete(&self, queue: &str, receipt: &str) -> anyhow::Result<()>;

    /// Longest visibility delay the backend accepts.
    fn max_delay(&self) -> Duration;
}

/// Delay-capable queue adapter over a [`MessageBackend`].
///
/// Queue names are sanitized before use. A received message is deleted
/// before it is decoded; a crash between receive and delete, or a message
/// that fails to decode, loses that message.
#[derive(Debug)]
pub struct DelayQueue<B> {
    backend: B,
    pop_wait: Duration,
}

impl<B: MessageBackend> DelayQueue<B> {
    pub fn new(backend: B, pop_wait: Duration) -> Self {
        Self { backend, pop_wait }
    }

    fn check_delay(&self, delay: Duration) -> Result<(), QueueError> {
        let max = self.backend.max_delay();
        if delay > max {
            return Err(QueueError::UnsupportedDelay {
                requested_secs: delay.as_secs(),
                max_secs: max.as_secs(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<B: MessageBackend> QueueAdapter for DelayQueue<B> {
    async fn push(
        &self,
        queue: &str,
        payload: &Value,
        delay: Duration,
    ) -> Result<Envelope, QueueError> {
        self.check_delay(delay)?;

        let envelope = Envelope::wrap(payload.clone());
        let wire = envelope.to_wire()?;
        self.backend
            .send(&sanitize_queue_name(queue), wire, delay)
            .await
            .map_err(|e| QueueError::push(queue, e))?;
        Ok(envelope)
    }

    async fn pop(&self, queue: &str) -> Result<Option<Envelope>, QueueError> {
        let name = sanitize_queue_name(queue);
        let received = self
            .backend
            .receive(&name, self.pop_wait)
            .await
            .map_err(|e| QueueError::pop(queue, e))?;

        let Some(message) = received else {
            return Ok(None);
        };

        self.backend
            .delete(&name, &message.receipt)
            .await
            .map_err(|e| QueueError::pop(queue, e))?;

        match Envelope::from_wire(&message.body) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(err) => {
                warn!(queue, "discarding malformed message: {err}");
                Err(err.into())
            }
        }
    }

    fn backend(&self) -> &'static str {
        "delay"
    }
}
