use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier::{Envelope, QueueAdapter, QueueError};
use parking_lot::Mutex;
use serde_json::Value;

/// One push accepted by a [`MockQueue`].
#[derive(Clone, Debug)]
pub struct PushRecord {
    pub queue: String,
    pub envelope: Envelope,
    pub delay: Duration,
}

/// Queue adapter that records every push and can be told to fail.
///
/// A push latency widens the window in which concurrent dispatchers race,
/// which is what the at-most-once tests need.
#[derive(Clone, Default)]
pub struct MockQueue {
    pushes: Arc<Mutex<Vec<PushRecord>>>,
    pending: Arc<Mutex<HashMap<String, VecDeque<Envelope>>>>,
    failing_pushes: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    push_latency: Option<Duration>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue whose first `n` pushes fail.
    pub fn failing(n: usize) -> Self {
        let queue = Self::new();
        queue.fail_next_pushes(n);
        queue
    }

    pub fn with_push_latency(mut self, latency: Duration) -> Self {
        self.push_latency = Some(latency);
        self
    }

    pub fn fail_next_pushes(&self, n: usize) {
        self.failing_pushes.store(n, Ordering::SeqCst);
    }

    pub fn pushes(&self) -> Vec<PushRecord> {
        self.pushes.lock().clone()
    }

    /// Successful pushes.
    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    /// Push attempts, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn assert_push_count_eq(&self, expected: usize) {
        let actual = self.push_count();
        assert_eq!(
            actual, expected,
            "Expected {} pushes, got {}",
            expected, actual
        );
    }
}

#[async_trait]
impl QueueAdapter for MockQueue {
    async fn push(
        &self,
        queue: &str,
        payload: &Value,
        delay: Duration,
    ) -> Result<Envelope, QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.push_latency {
            tokio::time::sleep(latency).await;
        }

        let should_fail = self
            .failing_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(QueueError::Push {
                queue: queue.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let envelope = Envelope::wrap(payload.clone());
        self.pushes.lock().push(PushRecord {
            queue: queue.to_string(),
            envelope: envelope.clone(),
            delay,
        });
        self.pending
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(envelope.clone());
        Ok(envelope)
    }

    async fn pop(&self, queue: &str) -> Result<Option<Envelope>, QueueError> {
        Ok(self.pending.lock().get_mut(queue).and_then(VecDeque::pop_front))
    }

    fn backend(&self) -> &'static str {
        "mock"
    }
}
