use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier::*;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

type RowLocks = HashMap<JobId, Arc<tokio::sync::Mutex<()>>>;

/// In-memory [`JobStore`] with real per-record leases.
///
/// Each row has its own async mutex; a lease is the owned guard, held until
/// the [`JobLock`] is consumed or dropped. Waiting longer than the lock
/// timeout yields [`StoreError::LockTimeout`].
#[derive(Clone)]
pub struct InMemoryJobStore {
    rows: Arc<Mutex<BTreeMap<JobId, JobRecord>>>,
    row_locks: Arc<Mutex<RowLocks>>,
    next_id: Arc<AtomicI64>,
    lock_timeout: Duration,
    lock_timeouts_to_inject: Arc<AtomicUsize>,
    lock_count: Arc<AtomicUsize>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            rows: Arc::new(Mutex::new(BTreeMap::new())),
            row_locks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            lock_timeout,
            lock_timeouts_to_inject: Arc::new(AtomicUsize::new(0)),
            lock_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `n` lease attempts fail with a lock timeout.
    pub fn inject_lock_timeouts(&self, n: usize) {
        self.lock_timeouts_to_inject.store(n, Ordering::SeqCst);
    }

    /// Number of leases granted so far.
    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.rows.lock().values().cloned().collect()
    }

    pub fn record(&self, id: JobId) -> Option<JobRecord> {
        self.rows.lock().get(&id).cloned()
    }

    fn row_lock(&self, id: JobId) -> Arc<tokio::sync::Mutex<()>> {
        self.row_locks
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn take_injected_timeout(&self) -> bool {
        self.lock_timeouts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = JobRecord {
            id,
            queue_name: job.queue_name,
            payload: job.payload,
            backend_id: None,
            status: JobStatus::Pending,
            result: None,
            scheduled_at: job.scheduled_at,
            created_at: Utc::now(),
            dispatch_attempts: 0,
            last_error: None,
        };
        self.rows.lock().insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.record(id))
    }

    async fn find_by_backend_id(
        &self,
        backend_id: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|r| r.backend_id.as_deref() == Some(backend_id))
            .cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let mut records = self.records();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    async fn due_undispatched(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut due: Vec<_> = self
            .rows
            .lock()
            .values()
            .filter(|r| r.is_dispatchable(now))
            .map(|r| (r.scheduled_at, r.id))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn lock(&self, id: JobId) -> Result<Option<Box<dyn JobLock>>, StoreError> {
        if self.take_injected_timeout() {
            return Err(StoreError::LockTimeout(id));
        }

        let guard = tokio::time::timeout(self.lock_timeout, self.row_lock(id).lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(id))?;

        let Some(record) = self.record(id) else {
            return Ok(None);
        };

        self.lock_count.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Box::new(InMemoryJobLock {
            rows: self.rows.clone(),
            record,
            _guard: guard,
        })))
    }

    async fn report_status(
        &self,
        backend_id: &str,
        status: &JobStatus,
        result: Option<&str>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let mut rows = self.rows.lock();
        let Some(record) = rows
            .values_mut()
            .find(|r| r.backend_id.as_deref() == Some(backend_id))
        else {
            return Ok(None);
        };

        record.status = status.clone();
        if let Some(result) = result {
            record.result = Some(result.to_string());
        }
        Ok(Some(record.clone()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct InMemoryJobLock {
    rows: Arc<Mutex<BTreeMap<JobId, JobRecord>>>,
    record: JobRecord,
    _guard: OwnedMutexGuard<()>,
}

impl InMemoryJobLock {
    fn update(&self, apply: impl FnOnce(&mut JobRecord)) -> Result<JobRecord, StoreError> {
        let mut rows = self.rows.lock();
        let row = rows.get_mut(&self.record.id).ok_or(StoreError::NotFound)?;
        apply(row);
        Ok(row.clone())
    }
}

#[async_trait]
impl JobLock for InMemoryJobLock {
    fn record(&self) -> &JobRecord {
        &self.record
    }

    async fn assign_backend_id(
        self: Box<Self>,
        backend_id: &str,
    ) -> Result<JobRecord, StoreError> {
        let mut rows = self.rows.lock();
        let row = rows.get_mut(&self.record.id).ok_or(StoreError::NotFound)?;
        if let Some(existing) = &row.backend_id {
            return Err(StoreError::Corrupt(format!(
                "job {} already carries backend id {existing}",
                self.record.id
            )));
        }
        row.backend_id = Some(backend_id.to_string());
        Ok(row.clone())
    }

    async fn record_failure(self: Box<Self>, error: &str) -> Result<JobRecord, StoreError> {
        self.update(|row| {
            row.dispatch_attempts += 1;
            row.last_error = Some(error.to_string());
        })
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
