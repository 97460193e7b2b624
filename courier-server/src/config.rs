use std::env;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use courier::{BrokerConfig, PersistenceConfig, QueueBackendConfig, ReconcilerConfig};
use dotenvy::dotenv;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub persistence: PersistenceConfig,
    pub backend: QueueBackendConfig,
    pub broker: BrokerConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let mut persistence = PersistenceConfig::new(database_url);
        persistence.max_connections = parse_or(&var, "DB_MAX_CONNECTIONS", 10)?;
        persistence.lock_timeout_ms = parse_or(&var, "LOCK_TIMEOUT_MS", 5000)?;

        let pop_wait_seconds = parse_or(&var, "POP_WAIT_SECONDS", 10)?;
        let engine = var("QUEUE_ENGINE").unwrap_or_else(|| "REDIS".to_string());
        let backend = match engine.to_ascii_uppercase().as_str() {
            "REDIS" => {
                let host = var("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
                let port: u16 = parse_or(&var, "REDIS_PORT", 6379)?;
                QueueBackendConfig::Redis {
                    url: format!("redis://{host}:{port}"),
                    pop_timeout_seconds: pop_wait_seconds,
                }
            }
            "SQS" => QueueBackendConfig::Sqs {
                region: var("AWS_REGION"),
                pop_wait_seconds,
            },
            other => bail!("QUEUE_ENGINE must be REDIS or SQS, got {other}"),
        };

        let reconciler = ReconcilerConfig::default()
            .with_interval(parse_or(&var, "RECONCILE_INTERVAL_MS", 1000)?)
            .with_batch_size(parse_or(&var, "RECONCILE_BATCH_SIZE", 100)?);

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&var, "PORT", 80)?,
            persistence,
            backend,
            broker: BrokerConfig {
                reconciler,
                ..BrokerConfig::default()
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        None => Ok(default),
    }
}
