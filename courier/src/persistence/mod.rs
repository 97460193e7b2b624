//! Job record persistence.
//!
//! [`JobStore`] is everything the broker needs from durable storage. The
//! critical piece is [`JobStore::lock`]: an exclusive lease on one record
//! that lasts until the returned [`JobLock`] is consumed. While a lease is
//! held no other caller, in this process or another, can lease the same
//! record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{JobId, JobRecord, JobStatus, NewJob};

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;

/// Durable storage for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record with status `PENDING` and no backend id.
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    async fn find_by_backend_id(&self, backend_id: &str)
        -> Result<Option<JobRecord>, StoreError>;

    /// Most recently created records first.
    async fn list(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError>;

    /// Unlocked snapshot of records with no backend id and
    /// `scheduled_at <= now`, oldest schedule first.
    async fn due_undispatched(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobId>, StoreError>;

    /// Take the exclusive lease on `id`, re-reading the record under it.
    ///
    /// Returns `Ok(None)` if the record does not exist and
    /// [`StoreError::LockTimeout`] if the lease could not be obtained within
    /// the store's lock-wait bound.
    async fn lock(&self, id: JobId) -> Result<Option<Box<dyn JobLock>>, StoreError>;

    /// Set status and result on the record carrying `backend_id`.
    ///
    /// Returns `Ok(None)` when no record carries that backend id.
    async fn report_status(
        &self,
        backend_id: &str,
        status: &JobStatus,
        result: Option<&str>,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// An exclusive lease on one job record.
///
/// Every way of consuming the lease releases it; dropping it without
/// consuming it also releases it, discarding nothing but the lease.
#[async_trait]
pub trait JobLock: Send {
    /// The record as read after the lease was taken.
    fn record(&self) -> &JobRecord;

    /// Persist the backend id and release the lease.
    async fn assign_backend_id(self: Box<Self>, backend_id: &str)
        -> Result<JobRecord, StoreError>;

    /// Persist a failed push (attempt count and error) and release the lease.
    async fn record_failure(self: Box<Self>, error: &str) -> Result<JobRecord, StoreError>;

    /// Release the lease without changing the record.
    async fn release(self: Box<Self>) -> Result<(), StoreError>;
}
