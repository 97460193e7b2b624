//! Amazon SQS message backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client;
use parking_lot::RwLock;
use tracing::debug;

use super::{MessageBackend, ReceivedMessage};

/// SQS caps `DelaySeconds` at 15 minutes.
pub const SQS_MAX_DELAY: Duration = Duration::from_secs(900);

/// SQS caps long polling at 20 seconds.
const SQS_MAX_WAIT_SECS: u64 = 20;

/// [`MessageBackend`] backed by Amazon SQS.
///
/// Queues are created on first use (`CreateQueue` is idempotent) and their
/// URLs cached for the lifetime of the backend.
#[derive(Debug)]
pub struct SqsBackend {
    client: Client,
    queue_urls: RwLock<HashMap<String, String>>,
}

impl SqsBackend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            queue_urls: RwLock::new(HashMap::new()),
        }
    }

    /// Build a client from the standard AWS environment, optionally pinning
    /// the region.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }

    async fn queue_url(&self, queue: &str) -> anyhow::Result<String> {
        if let Some(url) = self.queue_urls.read().get(queue) {
            return Ok(url.clone());
        }

        let output = self
            .client
            .create_queue()
            .queue_name(queue)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("create_queue {queue}: {}", DisplayErrorContext(&e)))?;
        let url = output
            .queue_url()
            .ok_or_else(|| anyhow::anyhow!("create_queue {queue}: no queue url returned"))?
            .to_string();

        debug!(queue, url = %url, "resolved sqs queue url");
        self.queue_urls
            .write()
            .insert(queue.to_string(), url.clone());
        Ok(url)
    }
}

#[async_trait]
impl MessageBackend for SqsBackend {
    async fn send(&self, queue: &str, body: String, delay: Duration) -> anyhow::Result<()> {
        let url = self.queue_url(queue).await?;
        self.client
            .send_message()
            .queue_url(url)
            .message_body(body)
            .delay_seconds(delay.as_secs() as i32)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("send_message {queue}: {}", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        wait: Duration,
    ) -> anyhow::Result<Option<ReceivedMessage>> {
        let url = self.queue_url(queue).await?;
        let output = self
            .client
            .receive_message()
            .queue_url(url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait.as_secs().min(SQS_MAX_WAIT_SECS) as i32)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("receive_message {queue}: {}", DisplayErrorContext(&e)))?;

        let Some(message) = output.messages().first() else {
            return Ok(None);
        };

        let body = message
            .body()
            .ok_or_else(|| anyhow::anyhow!("receive_message {queue}: message without body"))?;
        let receipt = message
            .receipt_handle()
            .ok_or_else(|| anyhow::anyhow!("receive_message {queue}: message without receipt"))?;

        Ok(Some(ReceivedMessage {
            body: body.to_string(),
            receipt: receipt.to_string(),
        }))
    }

    async fn delete(&self, queue: &str, receipt: &str) -> anyhow::Result<()> {
        let url = self.queue_url(queue).await?;
        self.client
            .delete_message()
            .queue_url(url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("delete_message {queue}: {}", DisplayErrorContext(&e)))?;
        Ok(())
    }

    fn max_delay(&self) -> Duration {
        SQS_MAX_DELAY
    }
}
