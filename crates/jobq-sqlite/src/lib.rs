//! SQLite-backed [`jobq::Repository`].
//!
//! A file- or memory-based storage backend. Good for embedding `jobq`
//! directly into a single-process application without standing up an
//! external database.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id TEXT PRIMARY KEY,
//!     job_type TEXT NOT NULL,
//!     priority INTEGER NOT NULL,
//!     data TEXT NOT NULL,
//!     state TEXT NOT NULL,
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL,
//!     started_at TEXT,
//!     completed_at TEXT,
//!     failed_at TEXT,
//!     duration_ms INTEGER,
//!     progress INTEGER,
//!     logs TEXT NOT NULL
//! );
//!
//! CREATE INDEX idx_jobs_dispatch ON jobs (job_type, state, priority, created_at);
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobq::{Queue, StorageOptions};
//! use jobq_sqlite::SqliteRepository;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let repo = SqliteRepository::connect(&StorageOptions {
//!     in_memory: true,
//!     ..Default::default()
//! }).await?;
//! let queue = Queue::create(Arc::new(repo)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobq::{JobRecord, JobState, Priority, Repository, StorageOptions};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

/// SQLite job repository.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open a pool against `options` and run schema setup unless
    /// `options.autoload` is `false` (for deployments that manage the
    /// `jobs` table's migration externally).
    pub async fn connect(options: &StorageOptions) -> anyhow::Result<Self> {
        let url = if options.in_memory {
            "sqlite::memory:".to_string()
        } else {
            let path = options
                .path
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("StorageOptions.path is required unless in_memory is set"))?;
            format!("sqlite:{}?mode=rwc", path.display())
        };

        let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;
        let repo = Self { pool };
        if options.autoload {
            repo.run_migrations().await?;
        }
        Ok(repo)
    }

    /// Wrap an already-configured pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                priority INTEGER NOT NULL,
                data TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                failed_at TEXT,
                duration_ms INTEGER,
                progress INTEGER,
                logs TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_dispatch ON jobs (job_type, state, priority, created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct Row {
    id: String,
    job_type: String,
    priority: i64,
    data: String,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    progress: Option<i64>,
    logs: String,
}

fn state_to_str(state: JobState) -> &'static str {
    match state {
        JobState::Inactive => "INACTIVE",
        JobState::Active => "ACTIVE",
        JobState::Complete => "COMPLETE",
        JobState::Failure => "FAILURE",
    }
}

fn state_from_str(s: &str) -> anyhow::Result<JobState> {
    match s {
        "INACTIVE" => Ok(JobState::Inactive),
        "ACTIVE" => Ok(JobState::Active),
        "COMPLETE" => Ok(JobState::Complete),
        "FAILURE" => Ok(JobState::Failure),
        other => anyhow::bail!("unknown job state in storage: {other}"),
    }
}

impl TryFrom<Row> for JobRecord {
    type Error = anyhow::Error;

    fn try_from(row: Row) -> anyhow::Result<Self> {
        Ok(JobRecord {
            id: row.id.parse()?,
            job_type: row.job_type,
            priority: Priority::from_raw(row.priority as i32),
            data: serde_json::from_str(&row.data)?,
            state: state_from_str(&row.state)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            duration_ms: row.duration_ms,
            progress: row.progress.map(|p| p as u8),
            logs: serde_json::from_str(&row.logs)?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, job_type, priority, data, state, created_at, updated_at, \
     started_at, completed_at, failed_at, duration_ms, progress, logs";

#[async_trait]
impl Repository for SqliteRepository {
    async fn init(&self) -> anyhow::Result<()> {
        self.run_migrations().await
    }

    async fn list(&self, state: Option<JobState>) -> anyhow::Result<Vec<JobRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM jobs {} ORDER BY created_at ASC",
            if state.is_some() { "WHERE state = ?" } else { "" }
        );
        let mut q = sqlx::query_as::<_, Row>(&query);
        if let Some(state) = state {
            q = q.bind(state_to_str(state));
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, Row>(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn find_next_inactive_by_type(&self, job_type: &str) -> anyhow::Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, Row>(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs \
             WHERE job_type = ? AND state = 'INACTIVE' \
             ORDER BY priority ASC, created_at ASC LIMIT 1"
        ))
        .bind(job_type)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn exists(&self, id: Uuid) -> anyhow::Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, record: &JobRecord) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, priority, data, state, created_at, updated_at,
                started_at, completed_at, failed_at, duration_ms, progress, logs
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.job_type)
        .bind(record.priority.as_raw())
        .bind(serde_json::to_string(&record.data)?)
        .bind(state_to_str(record.state))
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.failed_at)
        .bind(record.duration_ms)
        .bind(record.progress.map(|p| p as i64))
        .bind(serde_json::to_string(&record.logs)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                anyhow::bail!("job {} already exists", record.id)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, record: &JobRecord) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                priority = ?, data = ?, state = ?, updated_at = ?,
                started_at = ?, completed_at = ?, failed_at = ?,
                duration_ms = ?, progress = ?, logs = ?
            WHERE id = ?
            "#,
        )
        .bind(record.priority.as_raw())
        .bind(serde_json::to_string(&record.data)?)
        .bind(state_to_str(record.state))
        .bind(record.updated_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.failed_at)
        .bind(record.duration_ms)
        .bind(record.progress.map(|p| p as i64))
        .bind(serde_json::to_string(&record.logs)?)
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            anyhow::bail!("update affected {} rows for job {}", result.rows_affected(), record.id);
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
