use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Maximum length of a stored status string.
pub const MAX_STATUS_LEN: usize = 32;

/// Durable numeric key of a job record. Unrelated to the backend id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing status of a job.
///
/// `Pending` and `Processing` are broker-managed. Anything a consumer
/// reports beyond the well-known values is kept verbatim in `Other`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Other(s) => s,
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a reported status cannot be stored.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InvalidStatus {
    #[error("status must not be empty")]
    Empty,
    #[error("status longer than {MAX_STATUS_LEN} characters")]
    TooLong,
}

impl FromStr for JobStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(InvalidStatus::Empty);
        }
        if trimmed.chars().count() > MAX_STATUS_LEN {
            return Err(InvalidStatus::TooLong);
        }
        Ok(match trimmed {
            "PENDING" => JobStatus::Pending,
            "PROCESSING" => JobStatus::Processing,
            "DONE" => JobStatus::Done,
            "FAILED" => JobStatus::Failed,
            other => JobStatus::Other(other.to_string()),
        })
    }
}

impl Serialize for JobStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A unit of work addressed to a named backend queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Target backend queue. Write-once.
    pub queue_name: String,
    /// Data delivered to the consumer. Write-once.
    pub payload: Value,
    /// Envelope id assigned when the payload was handed to the backend.
    pub backend_id: Option<String>,
    pub status: JobStatus,
    pub result: Option<String>,
    /// Earliest moment the job may be dispatched.
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Failed push attempts so far.
    pub dispatch_attempts: u32,
    /// Error from the most recent failed push.
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn is_dispatched(&self) -> bool {
        self.backend_id.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// Eligible for dispatch: not yet handed to the backend and due.
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        !self.is_dispatched() && self.is_due(now)
    }
}

/// Attributes of a job about to be created.
#[derive(Clone, Debug, PartialEq)]
pub struct NewJob {
    pub queue_name: String,
    pub payload: Value,
    pub scheduled_at: DateTime<Utc>,
}

impl NewJob {
    /// A job due immediately.
    pub fn immediate(queue_name: impl Into<String>, payload: Value) -> Self {
        Self {
            queue_name: queue_name.into(),
            payload,
            scheduled_at: Utc::now(),
        }
    }

    pub fn scheduled(
        queue_name: impl Into<String>,
        payload: Value,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            payload,
            scheduled_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn record(scheduled_at: DateTime<Utc>, backend_id: Option<&str>) -> JobRecord {
        JobRecord {
            id: JobId(1),
            queue_name: "emails".into(),
            payload: json!({}),
            backend_id: backend_id.map(str::to_string),
            status: JobStatus::Pending,
            result: None,
            scheduled_at,
            created_at: Utc::now(),
            dispatch_attempts: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_status_parse_known_and_free_form() {
        assert_eq!("DONE".parse::<JobStatus>(), Ok(JobStatus::Done));
        assert_eq!(" PENDING ".parse::<JobStatus>(), Ok(JobStatus::Pending));
        assert_eq!(
            "RETRYING".parse::<JobStatus>(),
            Ok(JobStatus::Other("RETRYING".into()))
        );
        assert_eq!("".parse::<JobStatus>(), Err(InvalidStatus::Empty));
        assert_eq!(
            "X".repeat(MAX_STATUS_LEN + 1).parse::<JobStatus>(),
            Err(InvalidStatus::TooLong)
        );
    }

    #[test]
    fn test_status_serializes_as_plain_string() {
        assert_eq!(serde_json::to_value(JobStatus::Processing).unwrap(), json!("PROCESSING"));
        let back: JobStatus = serde_json::from_value(json!("weird")).unwrap();
        assert_eq!(back, JobStatus::Other("weird".into()));
    }

    #[test]
    fn test_dispatchable_requires_due_and_unassigned() {
        let now = Utc::now();
        assert!(record(now - Duration::seconds(1), None).is_dispatchable(now));
        assert!(record(now, None).is_dispatchable(now));
        assert!(!record(now + Duration::seconds(60), None).is_dispatchable(now));
        assert!(!record(now - Duration::seconds(1), Some("abc")).is_dispatchable(now));
    }
}
