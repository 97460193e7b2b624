use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};

use super::{JobLock, JobStore};
use crate::config::PersistenceConfig;
use crate::error::StoreError;
use crate::job::{JobId, JobRecord, JobStatus, NewJob};

const JOB_COLUMNS: &str = "id, backend_id, queue_name, status, result, payload, \
                           scheduled_at, created_at, dispatch_attempts, last_error";

/// PostgreSQL-backed job store.
///
/// The per-record lease is a transaction holding `SELECT ... FOR UPDATE` on
/// the row, with `lock_timeout` bounding how long a second claimant waits.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresJobStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Open a pool according to `config`.
    pub async fn connect(config: &PersistenceConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.connection_string)
            .await?;
        Ok(Self::new(pool, config.lock_timeout()))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn lock_timeout_setting(&self) -> String {
        format!("{}ms", self.lock_timeout.as_millis().max(1))
    }
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let id = JobId(row.try_get("id")?);

    let payload_text: String = row.try_get("payload")?;
    let payload = serde_json::from_str(&payload_text)
        .map_err(|e| StoreError::Corrupt(format!("payload of job {id}: {e}")))?;

    let status_text: String = row.try_get("status")?;
    let status: JobStatus = status_text
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("status of job {id}: {e}")))?;

    let attempts: i32 = row.try_get("dispatch_attempts")?;

    Ok(JobRecord {
        id,
        queue_name: row.try_get("queue_name")?,
        payload,
        backend_id: row.try_get("backend_id")?,
        status,
        result: row.try_get("result")?,
        scheduled_at: row.try_get("scheduled_at")?,
        created_at: row.try_get("created_at")?,
        dispatch_attempts: attempts.max(0) as u32,
        last_error: row.try_get("last_error")?,
    })
}

fn is_lock_timeout(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().map(|c| c.to_string()).as_deref() == Some("55P03")
        }
        _ => false,
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let payload_text = serde_json::to_string(&job.payload)
            .map_err(|e| StoreError::Corrupt(format!("payload: {e}")))?;

        let sql = format!(
            r#"
            INSERT INTO courier_jobs (queue_name, status, payload, scheduled_at, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&job.queue_name)
            .bind(JobStatus::Pending.as_str())
            .bind(&payload_text)
            .bind(job.scheduled_at)
            .fetch_one(&self.pool)
            .await?;

        let record = job_from_row(&row)?;
        debug!(job_id = %record.id, queue = %record.queue_name, "created job");
        Ok(record)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM courier_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_by_backend_id(
        &self,
        backend_id: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM courier_jobs WHERE backend_id = $1");
        let row = sqlx::query(&sql)
            .bind(backend_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<JobRecord>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM courier_jobs ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn due_undispatched(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM courier_jobs
            WHERE backend_id IS NULL
              AND scheduled_at <= $1
            ORDER BY scheduled_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<JobId, StoreError> { Ok(JobId(row.try_get("id")?)) })
            .collect()
    }

    async fn lock(&self, id: JobId) -> Result<Option<Box<dyn JobLock>>, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(self.lock_timeout_setting())
            .execute(&mut *tx)
            .await?;

        let sql = format!("SELECT {JOB_COLUMNS} FROM courier_jobs WHERE id = $1 FOR UPDATE");
        let row = match sqlx::query(&sql).bind(id.0).fetch_optional(&mut *tx).await {
            Ok(row) => row,
            Err(err) if is_lock_timeout(&err) => {
                warn!(job_id = %id, "lock wait exceeded {}", self.lock_timeout_setting());
                return Err(StoreError::LockTimeout(id));
            }
            Err(err) => return Err(err.into()),
        };

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let record = job_from_row(&row)?;
        Ok(Some(Box::new(PostgresJobLock { tx, record })))
    }

    async fn report_status(
        &self,
        backend_id: &str,
        status: &JobStatus,
        result: Option<&str>,
    ) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!(
            r#"
            UPDATE courier_jobs
            SET status = $2,
                result = COALESCE($3, result)
            WHERE backend_id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(backend_id)
            .bind(status.as_str())
            .bind(result)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Row lease held by an open transaction. Dropping it rolls back.
struct PostgresJobLock {
    tx: Transaction<'static, Postgres>,
    record: JobRecord,
}

#[async_trait]
impl JobLock for PostgresJobLock {
    fn record(&self) -> &JobRecord {
        &self.record
    }

    async fn assign_backend_id(
        self: Box<Self>,
        backend_id: &str,
    ) -> Result<JobRecord, StoreError> {
        let PostgresJobLock { mut tx, record } = *self;

        let sql = format!(
            r#"
            UPDATE courier_jobs
            SET backend_id = $2
            WHERE id = $1
              AND backend_id IS NULL
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(record.id.0)
            .bind(backend_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::Corrupt(format!(
                "job {} gained a backend id while locked",
                record.id
            )));
        };

        let updated = job_from_row(&row)?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn record_failure(self: Box<Self>, error: &str) -> Result<JobRecord, StoreError> {
        let PostgresJobLock { mut tx, record } = *self;

        let sql = format!(
            r#"
            UPDATE courier_jobs
            SET dispatch_attempts = dispatch_attempts + 1,
                last_error = $2
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(record.id.0)
            .bind(error)
            .fetch_one(&mut *tx)
            .await?;

        let updated = job_from_row(&row)?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
