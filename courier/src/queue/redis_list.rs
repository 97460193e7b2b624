//! Redis list backend (`LPUSH` / `BRPOP`).

use std::time::Duration;

use async_trait::async_trait;

use super::ListBackend;

/// [`ListBackend`] backed by a Redis server.
///
/// `BRPOP` blocks its connection, so each pop opens its own multiplexed
/// connection instead of stalling pushes sharing one.
#[derive(Debug, Clone)]
pub struct RedisListBackend {
    client: redis::Client,
}

impl RedisListBackend {
    /// Create a backend for `redis_url` (e.g. `redis://localhost:6379`).
    pub fn new(redis_url: impl AsRef<str>) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ListBackend for RedisListBackend {
    async fn push_front(&self, key: &str, body: String) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(body)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_back(&self, key: &str, timeout: Duration) -> anyhow::Result<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // A zero timeout would block forever.
        let secs = timeout.as_secs().max(1);
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(key)
            .arg(secs)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, body)| body))
    }
}
