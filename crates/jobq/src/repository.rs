//! Persistence facade over the (external, out-of-scope) embedded document
//! store. Owns the on-disk schema; exposes CRUD plus the one specialized
//! query the dispatch core needs.

use std::path::PathBuf;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::record::JobRecord;
use crate::state::JobState;

/// Opaque storage configuration, passed through to a `Repository`
/// implementation without interpretation by the dispatch core.
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    pub path: Option<PathBuf>,
    pub in_memory: bool,
    pub autoload: bool,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Load or create the backing store. Idempotent.
    async fn init(&self) -> anyhow::Result<()>;

    /// All jobs, optionally filtered by state, sorted by `created_at` ascending.
    async fn list(&self, state: Option<JobState>) -> anyhow::Result<Vec<JobRecord>>;

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<JobRecord>>;

    /// The single highest-priority (smallest numeric priority), oldest-first
    /// inactive job of the given type, or none. Must deterministically
    /// return the same row under equal priority+created_at ties so repeated
    /// calls without mutation are stable.
    async fn find_next_inactive_by_type(&self, job_type: &str) -> anyhow::Result<Option<JobRecord>>;

    async fn exists(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Persist a new row. Fails if the id collides.
    async fn insert(&self, record: &JobRecord) -> anyhow::Result<()>;

    /// Replace mutable fields by id. Fails if exactly one row is not
    /// affected (i.e. the row is missing).
    async fn update(&self, record: &JobRecord) -> anyhow::Result<()>;

    /// Delete by id. Silent if absent.
    async fn remove(&self, id: Uuid) -> anyhow::Result<()>;
}

/// Reference in-memory `Repository`. Useful for tests and for callers who
/// accept losing the queue across restarts (no crash-recovery guarantee
/// without a durable backend — see `jobq-sqlite` for a persistent one).
#[derive(Default)]
pub struct MemoryRepository {
    rows: RwLock<IndexMap<Uuid, JobRecord>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list(&self, state: Option<JobState>) -> anyhow::Result<Vec<JobRecord>> {
        let rows = self.rows.read().await;
        let mut out: Vec<JobRecord> = rows
            .values()
            .filter(|r| state.map(|s| r.state == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<JobRecord>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_next_inactive_by_type(&self, job_type: &str) -> anyhow::Result<Option<JobRecord>> {
        let rows = self.rows.read().await;
        // IndexMap iterates in insertion order; a stable sort on top of that
        // preserves insertion order as the tie-break for equal
        // (priority, created_at) pairs.
        let mut candidates: Vec<&JobRecord> = rows
            .values()
            .filter(|r| r.job_type == job_type && r.state == JobState::Inactive)
            .collect();
        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(candidates.into_iter().next().cloned())
    }

    async fn exists(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.rows.read().await.contains_key(&id))
    }

    async fn insert(&self, record: &JobRecord) -> anyhow::Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&record.id) {
            anyhow::bail!("job {} already exists", record.id);
        }
        rows.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, record: &JobRecord) -> anyhow::Result<()> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&record.id) {
            anyhow::bail!("update affected 0 rows for job {}", record.id);
        }
        rows.insert(record.id, record.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> anyhow::Result<()> {
        self.rows.write().await.shift_remove(&id);
        Ok(())
    }
}
