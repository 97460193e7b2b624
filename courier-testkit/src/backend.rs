use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use courier::{ListBackend, MessageBackend, ReceivedMessage};
use parking_lot::Mutex;
use tokio::time::Instant;

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory list backend: push prepends, pop removes from the tail.
///
/// Pops never block; an empty list returns `None` at once.
#[derive(Clone, Default)]
pub struct InMemoryListBackend {
    lists: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
    failing_pushes: Arc<AtomicUsize>,
}

impl InMemoryListBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` pushes fail as if the server were unreachable.
    pub fn fail_next_pushes(&self, n: usize) {
        self.failing_pushes.store(n, Ordering::SeqCst);
    }

    /// Place a raw body at the head of `key`, bypassing the envelope codec.
    pub fn inject_raw(&self, key: &str, body: impl Into<String>) {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_front(body.into());
    }

    pub fn len(&self, key: &str) -> usize {
        self.lists.lock().get(key).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    /// Bodies in `key`, head first.
    pub fn bodies(&self, key: &str) -> Vec<String> {
        self.lists
            .lock()
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ListBackend for InMemoryListBackend {
    async fn push_front(&self, key: &str, body: String) -> anyhow::Result<()> {
        if take_one(&self.failing_pushes) {
            bail!("connection refused");
        }
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_front(body);
        Ok(())
    }

    async fn pop_back(&self, key: &str, _timeout: Duration) -> anyhow::Result<Option<String>> {
        Ok(self.lists.lock().get_mut(key).and_then(VecDeque::pop_back))
    }
}

#[derive(Clone, Debug)]
struct StoredMessage {
    body: String,
    visible_at: Instant,
    delay: Duration,
}

#[derive(Default)]
struct MessageState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<String, (String, StoredMessage)>,
    next_receipt: u64,
    deleted: usize,
}

/// In-memory message backend with delayed visibility and explicit delete.
///
/// Visibility uses `tokio::time::Instant`, so paused-clock tests can step
/// past a delay with `tokio::time::advance`.
#[derive(Clone)]
pub struct InMemoryMessageBackend {
    state: Arc<Mutex<MessageState>>,
    max_delay: Duration,
    failing_sends: Arc<AtomicUsize>,
}

impl InMemoryMessageBackend {
    pub fn new() -> Self {
        Self::with_max_delay(Duration::from_secs(900))
    }

    pub fn with_max_delay(max_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MessageState::default())),
            max_delay,
            failing_sends: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_next_sends(&self, n: usize) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }

    pub fn inject_raw(&self, queue: &str, body: impl Into<String>) {
        self.state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                body: body.into(),
                visible_at: Instant::now(),
                delay: Duration::ZERO,
            });
    }

    /// Messages waiting in `queue`, visible or not.
    pub fn queued(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Names of queues that have received at least one message.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delays requested for each message in `queue`, in send order.
    pub fn delays(&self, queue: &str) -> Vec<Duration> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.delay).collect())
            .unwrap_or_default()
    }

    /// Received but not yet deleted.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn deleted(&self) -> usize {
        self.state.lock().deleted
    }
}

impl Default for InMemoryMessageBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBackend for InMemoryMessageBackend {
    async fn send(&self, queue: &str, body: String, delay: Duration) -> anyhow::Result<()> {
        if take_one(&self.failing_sends) {
            bail!("service unavailable");
        }
        if delay > self.max_delay {
            bail!("delay {}s exceeds {}s", delay.as_secs(), self.max_delay.as_secs());
        }
        self.state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                body,
                visible_at: Instant::now() + delay,
                delay,
            });
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        _wait: Duration,
    ) -> anyhow::Result<Option<ReceivedMessage>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let Some(messages) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        let Some(pos) = messages.iter().position(|m| m.visible_at <= now) else {
            return Ok(None);
        };
        let Some(message) = messages.remove(pos) else {
            return Ok(None);
        };

        state.next_receipt += 1;
        let receipt = format!("receipt-{}", state.next_receipt);
        let body = message.body.clone();
        state
            .in_flight
            .insert(receipt.clone(), (queue.to_string(), message));
        Ok(Some(ReceivedMessage { body, receipt }))
    }

    async fn delete(&self, _queue: &str, receipt: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.in_flight.remove(receipt).is_none() {
            bail!("unknown receipt {receipt}");
        }
        state.deleted += 1;
        Ok(())
    }

    fn max_delay(&self) -> Duration {
        self.max_delay
    }
}
