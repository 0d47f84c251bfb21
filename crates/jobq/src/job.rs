//! The `Job` entity: identity, data, state, timestamps, progress, log
//! buffer. Owns the allowed state transitions; delegates persistence to the
//! `Repository` through the owning `Queue`.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::JobEvent;
use crate::priority::Priority;
use crate::queue::Queue;
use crate::record::JobRecord;
use crate::state::JobState;

struct JobMutable {
    record: JobRecord,
    persisted: bool,
}

/// A handle to a job. Cheap to clone — clones share the same underlying
/// state through an `Arc<RwLock<_>>`, which is what lets a `Worker`'s
/// shutdown-timeout path and a still-running (orphaned) processor race
/// safely: whichever transition lands first wins, and the other observes a
/// non-ACTIVE state and is rejected.
#[derive(Clone)]
pub struct Job {
    id: Uuid,
    job_type: String,
    pub(crate) queue: Queue,
    inner: Arc<RwLock<JobMutable>>,
}

impl Job {
    fn with_persisted(queue: Queue, record: JobRecord, persisted: bool) -> Self {
        Self {
            id: record.id,
            job_type: record.job_type.clone(),
            queue,
            inner: Arc::new(RwLock::new(JobMutable { record, persisted })),
        }
    }

    /// A freshly constructed job that has not yet been `save()`d.
    pub(crate) fn unsaved(queue: Queue, record: JobRecord) -> Self {
        Self::with_persisted(queue, record, false)
    }

    /// A handle over a row that is already known to be persisted (loaded
    /// from storage, or just claimed by `find_next_inactive_by_type`).
    pub(crate) fn from_persisted(queue: Queue, record: JobRecord) -> Self {
        Self::with_persisted(queue, record, true)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// A consistent snapshot of the job's current in-memory fields.
    pub async fn record(&self) -> JobRecord {
        self.inner.read().await.record.clone()
    }

    pub async fn state(&self) -> JobState {
        self.inner.read().await.record.state
    }

    async fn persist(&self, mutable: &JobMutable) -> Result<()> {
        self.queue.0.repo.update(&mutable.record).await.map_err(Error::Storage)
    }

    /// First call inserts; subsequent calls fail with `AlreadySaved`.
    pub async fn save(&self) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.persisted {
            return Err(Error::AlreadySaved(self.id));
        }
        self.queue.0.repo.insert(&guard.record).await.map_err(Error::Storage)?;
        guard.persisted = true;
        let record = guard.record.clone();
        drop(guard);

        self.queue.0.events.emit(JobEvent::Enqueue { job: record });
        self.queue.handle_insert_handoff(self.clone()).await;
        Ok(())
    }

    /// Persist current in-memory attributes. Fails if not yet saved.
    pub async fn update(&self) -> Result<()> {
        let guard = self.inner.read().await;
        if !guard.persisted {
            return Err(Error::NotSaved(self.id));
        }
        self.persist(&guard).await
    }

    /// Delete from storage. Fails if not saved.
    pub async fn remove(&self) -> Result<()> {
        let guard = self.inner.read().await;
        if !guard.persisted {
            return Err(Error::NotSaved(self.id));
        }
        self.queue.0.repo.remove(self.id).await.map_err(Error::Storage)?;
        let record = guard.record.clone();
        drop(guard);
        self.queue.0.events.emit(JobEvent::Remove { job: record });
        Ok(())
    }

    /// Legal only from INACTIVE.
    pub async fn set_state_to_active(&self) -> Result<()> {
        let mut guard = self.inner.write().await;
        let from = guard.record.state;
        if !from.can_transition_to(JobState::Active) {
            return Err(Error::IllegalTransition {
                id: self.id,
                from,
                to: JobState::Active,
            });
        }
        let now = Utc::now();
        guard.record.state = JobState::Active;
        guard.record.started_at = Some(now);
        guard.record.updated_at = now;
        self.persist(&guard).await?;
        let record = guard.record.clone();
        drop(guard);
        self.queue.0.events.emit(JobEvent::Start { job: record });
        Ok(())
    }

    /// Legal only from ACTIVE.
    pub async fn set_state_to_complete(&self, result: Option<serde_json::Value>) -> Result<()> {
        let mut guard = self.inner.write().await;
        let from = guard.record.state;
        if !from.can_transition_to(JobState::Complete) {
            return Err(Error::IllegalTransition {
                id: self.id,
                from,
                to: JobState::Complete,
            });
        }
        let now = Utc::now();
        let started = guard.record.started_at.unwrap_or(now);
        guard.record.state = JobState::Complete;
        guard.record.completed_at = Some(now);
        guard.record.duration_ms = Some((now - started).num_milliseconds());
        guard.record.updated_at = now;
        self.persist(&guard).await?;
        let record = guard.record.clone();
        drop(guard);
        self.queue.0.events.emit(JobEvent::Complete { job: record, result });
        Ok(())
    }

    /// Legal from ACTIVE (including as part of crash recovery).
    pub async fn set_state_to_failure(&self, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let mut guard = self.inner.write().await;
        let from = guard.record.state;
        if !from.can_transition_to(JobState::Failure) {
            return Err(Error::IllegalTransition {
                id: self.id,
                from,
                to: JobState::Failure,
            });
        }
        let now = Utc::now();
        let started = guard.record.started_at.unwrap_or(now);
        guard.record.state = JobState::Failure;
        guard.record.failed_at = Some(now);
        guard.record.duration_ms = Some((now - started).num_milliseconds());
        guard.record.updated_at = now;
        guard.record.logs.push(error.clone());
        self.persist(&guard).await?;
        let record = guard.record.clone();
        drop(guard);
        self.queue.0.events.emit(JobEvent::Failure { job: record, error });
        Ok(())
    }

    /// Legal only from ACTIVE. Clamps to 0..=100.
    pub async fn set_progress(&self, done: u32, total: u32) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.record.state != JobState::Active {
            return Err(Error::InvalidState {
                id: self.id,
                expected: JobState::Active,
                actual: guard.record.state,
            });
        }
        let pct = if total == 0 {
            0
        } else {
            ((done as u64 * 100) / total as u64).min(100) as u8
        };
        guard.record.progress = Some(pct);
        guard.record.updated_at = Utc::now();
        self.persist(&guard).await?;
        let record = guard.record.clone();
        drop(guard);
        self.queue.0.events.emit(JobEvent::Progress {
            job: record,
            done,
            total,
        });
        Ok(())
    }

    /// Legal from INACTIVE only.
    pub async fn set_priority(&self, priority: Priority) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.record.state != JobState::Inactive {
            return Err(Error::InvalidState {
                id: self.id,
                expected: JobState::Inactive,
                actual: guard.record.state,
            });
        }
        guard.record.priority = priority;
        guard.record.updated_at = Utc::now();
        self.persist(&guard).await
    }

    pub async fn log(&self, message: impl Into<String>) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.record.logs.push(message.into());
        guard.record.updated_at = Utc::now();
        self.persist(&guard).await
    }
}
