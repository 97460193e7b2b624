use std::fmt;
use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::persistence::JobStore;
use crate::queue::QueueAdapter;

use super::broker::Broker;

/// Builder for constructing a [`Broker`] with explicit dependencies.
///
/// # Example
///
/// ```ignore
/// use courier::*;
///
/// let broker = BrokerBuilder::new(BrokerConfig::default())
///     .with_store(Arc::new(store))
///     .with_queue(Arc::new(ListQueue::new(backend, Duration::from_secs(10))))
///     .build()?;
/// broker.spawn_reconciler().await;
/// ```
pub struct BrokerBuilder {
    config: BrokerConfig,
    store: Option<Arc<dyn JobStore>>,
    queue: Option<Arc<dyn QueueAdapter>>,
}

impl fmt::Debug for BrokerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("BrokerBuilder");
        debug.field("config", &self.config);
        debug.field("store_set", &self.store.is_some());
        debug.field("queue_set", &self.queue.is_some());
        if let Some(queue) = &self.queue {
            debug.field("backend", &queue.backend());
        }
        debug.finish()
    }
}

impl BrokerBuilder {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            store: None,
            queue: None,
        }
    }

    /// Set the job store.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the queue adapter.
    pub fn with_queue(mut self, queue: Arc<dyn QueueAdapter>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Build the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the queue is missing.
    pub fn build(self) -> anyhow::Result<Broker> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        let queue = self
            .queue
            .ok_or_else(|| anyhow::anyhow!("queue dependency missing"))?;

        Ok(Broker::new(self.config, store, queue))
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}
