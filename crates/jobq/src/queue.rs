//! The dispatch core: waiter handoff, priority-ordered fetch, the worker
//! registry, and crash recovery.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventBus, JobEvent};
use crate::job::Job;
use crate::priority::Priority;
use crate::record::JobRecord;
use crate::repository::Repository;
use crate::state::JobState;
use crate::worker::{Processor, WorkerHandle};

struct Waiter {
    still_interested: CancellationToken,
    sender: oneshot::Sender<Option<JobRecord>>,
}

/// Shared queue state. Never constructed directly — see [`Queue::create`].
pub(crate) struct QueueInner {
    pub(crate) repo: Arc<dyn Repository>,
    pub(crate) events: EventBus,
    waiters: StdMutex<HashMap<String, VecDeque<Waiter>>>,
    /// Guards the INACTIVE -> ACTIVE claim, extended (per DESIGN.md) to also
    /// cover the addJob-side handoff's check-and-claim sequence.
    dispatch_lock: AsyncMutex<()>,
    workers: AsyncMutex<Vec<WorkerHandle>>,
}

/// The coordinator: holds the per-type waiter list, the dispatch mutex, and
/// the worker registry. Cheap to clone (shares one [`QueueInner`]).
#[derive(Clone)]
pub struct Queue(pub(crate) Arc<QueueInner>);

impl Queue {
    /// Initializes the repository and runs crash recovery exactly once.
    pub async fn create(repo: Arc<dyn Repository>) -> Result<Queue> {
        repo.init().await.map_err(Error::Storage)?;
        let inner = Arc::new(QueueInner {
            repo,
            events: EventBus::new(),
            waiters: StdMutex::new(HashMap::new()),
            dispatch_lock: AsyncMutex::new(()),
            workers: AsyncMutex::new(Vec::new()),
        });
        let queue = Queue(inner);
        queue.cleanup_after_unexpected_termination().await?;
        Ok(queue)
    }

    pub fn events(&self) -> &EventBus {
        &self.0.events
    }

    /// Marks every job that was ACTIVE at startup as FAILURE. Any such row
    /// indicates a previous process died mid-run; its progress and
    /// processor context are not recoverable, so it is not resumed.
    async fn cleanup_after_unexpected_termination(&self) -> Result<()> {
        let active = self.0.repo.list(Some(JobState::Active)).await.map_err(Error::Storage)?;
        for record in active {
            let job = Job::from_persisted(self.clone(), record);
            if let Err(err) = job.set_state_to_failure("unexpectedly terminated").await {
                tracing::warn!(job = %job.id(), error = %err, "crash recovery failed to mark job as failed");
            }
        }
        Ok(())
    }

    /// Generates a fresh id, stamps timestamps, defaults priority to
    /// NORMAL, and saves — which triggers the addJob-side handoff.
    pub async fn create_job(
        &self,
        job_type: impl Into<String>,
        priority: Option<Priority>,
        data: Option<serde_json::Value>,
    ) -> Result<Job> {
        let record = JobRecord::new(
            job_type,
            priority.unwrap_or_default(),
            data.unwrap_or(serde_json::Value::Null),
        );
        let job = Job::unsaved(self.clone(), record);
        self.wrap(job.save().await, Some(&job)).await?;
        Ok(job)
    }

    pub async fn find_job(&self, id: Uuid) -> Result<Option<Job>> {
        let record = self.0.repo.find(id).await.map_err(Error::Storage)?;
        Ok(record.map(|r| Job::from_persisted(self.clone(), r)))
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let records = self.0.repo.list(state).await.map_err(Error::Storage)?;
        Ok(records
            .into_iter()
            .map(|r| Job::from_persisted(self.clone(), r))
            .collect())
    }

    pub async fn remove_job_by_id(&self, id: Uuid) -> Result<()> {
        let job = match self.find_job(id).await? {
            Some(job) => job,
            None => return self.wrap(Err(Error::NotFound(id)), None).await,
        };
        self.wrap(job.remove().await, Some(&job)).await
    }

    /// Lists all jobs, invokes `predicate` on each materialized job, and
    /// removes every job for which it returns true. Removal of an ACTIVE
    /// job is permitted; the owning worker's subsequent terminal-transition
    /// write will then fail and surface as an `Error` event.
    pub async fn remove_jobs_by_callback<F>(&self, mut predicate: F) -> Result<Vec<Job>>
    where
        F: FnMut(&Job) -> bool,
    {
        let jobs = self.list_jobs(None).await?;
        let mut removed = Vec::new();
        for job in jobs {
            if predicate(&job) {
                self.wrap(job.remove().await, Some(&job)).await?;
                removed.push(job);
            }
        }
        Ok(removed)
    }

    /// Spawns `concurrency` workers processing jobs of `job_type`.
    pub async fn process(
        &self,
        job_type: impl Into<String>,
        processor: Arc<dyn Processor>,
        concurrency: usize,
    ) {
        let job_type = job_type.into();
        let mut workers = self.0.workers.lock().await;
        for _ in 0..concurrency {
            workers.push(WorkerHandle::spawn(self.clone(), job_type.clone(), processor.clone()));
        }
    }

    /// Shuts down workers matching `job_type` (or all workers if `None`),
    /// waiting up to `timeout` each, sequentially.
    pub async fn shutdown(&self, timeout: Duration, job_type: Option<&str>) -> Result<()> {
        let mut workers = self.0.workers.lock().await;
        let mut remaining = Vec::new();
        let mut targeted = Vec::new();
        for handle in workers.drain(..) {
            if job_type.map(|t| t == handle.job_type()).unwrap_or(true) {
                targeted.push(handle);
            } else {
                remaining.push(handle);
            }
        }
        *workers = remaining;
        drop(workers);

        for handle in targeted {
            if let Err(err) = handle.shutdown(timeout).await {
                self.0.events.emit(JobEvent::Error {
                    message: err.to_string(),
                    job: None,
                });
            }
        }
        Ok(())
    }

    /// `requestJobForProcessing`: returns a job in ACTIVE state whose claim
    /// has been durably persisted, or `None` if the waiter lost interest
    /// before a job became available.
    pub(crate) async fn request_job_for_processing(
        &self,
        job_type: &str,
        still_interested: CancellationToken,
    ) -> Result<Option<Job>> {
        let guard = self.0.dispatch_lock.lock().await;

        // Fast-park: if anyone is already parked for this type, the newest
        // requester cannot jump the queue — fairness is FIFO within a type.
        let fast_park_rx = {
            let mut waiters = self.0.waiters.lock().unwrap();
            let list = waiters.entry(job_type.to_string()).or_default();
            if !list.is_empty() {
                let (sender, receiver) = oneshot::channel();
                list.push_back(Waiter {
                    still_interested: still_interested.clone(),
                    sender,
                });
                Some(receiver)
            } else {
                None
            }
        };
        if let Some(receiver) = fast_park_rx {
            drop(guard);
            return Ok(Self::resolve_waiter(self.clone(), receiver).await);
        }

        match self.0.repo.find_next_inactive_by_type(job_type).await.map_err(Error::Storage)? {
            None => {
                let (sender, receiver) = oneshot::channel();
                self.0
                    .waiters
                    .lock()
                    .unwrap()
                    .entry(job_type.to_string())
                    .or_default()
                    .push_back(Waiter {
                        still_interested,
                        sender,
                    });
                drop(guard);
                Ok(Self::resolve_waiter(self.clone(), receiver).await)
            }
            Some(record) => {
                if still_interested.is_cancelled() {
                    drop(guard);
                    Ok(None)
                } else {
                    let job = Job::from_persisted(self.clone(), record);
                    job.set_state_to_active().await?;
                    drop(guard);
                    Ok(Some(job))
                }
            }
        }
    }

    async fn resolve_waiter(queue: Queue, receiver: oneshot::Receiver<Option<JobRecord>>) -> Option<Job> {
        receiver
            .await
            .ok()
            .flatten()
            .map(|record| Job::from_persisted(queue, record))
    }

    /// The addJob-side handoff, run after a job's persistence write
    /// succeeds (from `Job::save`).
    pub(crate) async fn handle_insert_handoff(&self, job: Job) {
        let guard = self.0.dispatch_lock.lock().await;
        let winner = {
            let mut waiters = self.0.waiters.lock().unwrap();
            let list = match waiters.get_mut(job.job_type()) {
                Some(list) if !list.is_empty() => list,
                _ => return,
            };
            let mut winner = None;
            while let Some(waiter) = list.pop_front() {
                if !waiter.still_interested.is_cancelled() {
                    winner = Some(waiter);
                    break;
                }
                // Waiters that lost interest are discarded without
                // notification; dropping `sender` resolves their `.await`
                // to `None`.
            }
            winner
        };

        let Some(waiter) = winner else {
            drop(guard);
            return;
        };

        match job.set_state_to_active().await {
            Ok(()) => {
                drop(guard);
                // Sending on a oneshot channel only wakes the receiving
                // task's waker; the runtime schedules it on its own turn,
                // which is what gives us the "deferred to next scheduling
                // opportunity" handoff spec.md calls for.
                let _ = waiter.sender.send(Some(job.record().await));
            }
            Err(err) => {
                drop(guard);
                self.0.events.emit(JobEvent::Error {
                    message: err.to_string(),
                    job: Some(job.record().await),
                });
            }
        }
    }

    /// Queue-originated operations emit an `Error` event carrying the
    /// error (and job, when applicable) and re-raise to the caller.
    async fn wrap<T>(&self, result: Result<T>, job: Option<&Job>) -> Result<T> {
        if let Err(ref err) = result {
            let record = match job {
                Some(job) => Some(job.record().await),
                None => None,
            };
            self.0.events.emit(JobEvent::Error {
                message: err.to_string(),
                job: record,
            });
        }
        result
    }
}
