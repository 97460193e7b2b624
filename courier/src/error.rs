use thiserror::Error;

use crate::job::JobId;

/// Failure to encode or decode a wire envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Failures raised by a queue adapter.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend was unreachable or rejected the message.
    #[error("push to queue `{queue}` failed: {message}")]
    Push { queue: String, message: String },

    /// The requested visibility delay exceeds what the backend supports.
    #[error("delay of {requested_secs}s exceeds backend maximum of {max_secs}s")]
    UnsupportedDelay { requested_secs: u64, max_secs: u64 },

    /// A received message could not be decoded. The message has already
    /// been removed from the backend.
    #[error(transparent)]
    Malformed(#[from] EnvelopeError),

    #[error("pop from queue `{queue}` failed: {message}")]
    Pop { queue: String, message: String },
}

impl QueueError {
    pub(crate) fn push(queue: &str, message: impl ToString) -> Self {
        Self::Push {
            queue: queue.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn pop(queue: &str, message: impl ToString) -> Self {
        Self::Pop {
            queue: queue.to_string(),
            message: message.to_string(),
        }
    }
}

/// Failures raised by a job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found")]
    NotFound,

    /// The row lock could not be acquired within the configured wait.
    #[error("timed out waiting for lock on job {0}")]
    LockTimeout(JobId),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a job record.
    #[error("corrupt job row: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single dispatch attempt.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Whether the next reconciliation cycle may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::Queue(QueueError::Push { .. })
                | DispatchError::Store(StoreError::LockTimeout(_))
        )
    }

    /// Short label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DispatchError::Queue(QueueError::Push { .. }) => "push",
            DispatchError::Queue(QueueError::UnsupportedDelay { .. }) => "unsupported_delay",
            DispatchError::Queue(_) => "queue",
            DispatchError::Store(StoreError::LockTimeout(_)) => "lock_timeout",
            DispatchError::Store(_) => "store",
        }
    }
}

/// Errors surfaced by the broker facade to its transport layer.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("job not found")]
    NotFound,

    #[error("delay of {requested_secs}s exceeds backend maximum of {max_secs}s")]
    UnsupportedDelay { requested_secs: u64, max_secs: u64 },

    #[error(transparent)]
    Malformed(#[from] EnvelopeError),

    #[error(transparent)]
    Queue(QueueError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<QueueError> for BrokerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::UnsupportedDelay {
                requested_secs,
                max_secs,
            } => BrokerError::UnsupportedDelay {
                requested_secs,
                max_secs,
            },
            QueueError::Malformed(inner) => BrokerError::Malformed(inner),
            other => BrokerError::Queue(other),
        }
    }
}

impl From<StoreError> for BrokerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => BrokerError::NotFound,
            other => BrokerError::Store(other),
        }
    }
}

impl From<DispatchError> for BrokerError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Queue(e) => e.into(),
            DispatchError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let push = DispatchError::from(QueueError::push("emails", "connection refused"));
        assert!(push.is_transient());
        assert_eq!(push.reason(), "push");

        let lock = DispatchError::from(StoreError::LockTimeout(JobId(7)));
        assert!(lock.is_transient());
        assert_eq!(lock.reason(), "lock_timeout");

        let delay = DispatchError::from(QueueError::UnsupportedDelay {
            requested_secs: 1000,
            max_secs: 900,
        });
        assert!(!delay.is_transient());
    }

    #[test]
    fn test_broker_error_translation() {
        let err: BrokerError = QueueError::UnsupportedDelay {
            requested_secs: 1000,
            max_secs: 900,
        }
        .into();
        assert!(matches!(err, BrokerError::UnsupportedDelay { max_secs: 900, .. }));

        let err: BrokerError = DispatchError::Store(StoreError::NotFound).into();
        assert!(matches!(err, BrokerError::NotFound));

        let err: BrokerError = QueueError::Malformed(EnvelopeError::Malformed("x".into())).into();
        assert!(matches!(err, BrokerError::Malformed(_)));
    }
}
