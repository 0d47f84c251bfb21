//! The per-type execution unit. Asks the [`Queue`] for work, invokes the
//! user processor, and reports results back through the claimed [`Job`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::JobEvent;
use crate::job::Job;
use crate::queue::Queue;

/// The opaque unit of work a caller supplies to `Queue::process`.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: Job) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Adapts any `Fn(Job) -> Future<Output = anyhow::Result<Option<Value>>>`
/// into a [`Processor`], so callers don't need to write a struct + impl for
/// simple cases.
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Option<serde_json::Value>>> + Send,
{
    async fn process(&self, job: Job) -> anyhow::Result<Option<serde_json::Value>> {
        (self.0)(job).await
    }
}

/// The registry-side view of a running worker task.
pub(crate) struct WorkerHandle {
    job_type: String,
    cancel: CancellationToken,
    current_job: Arc<AsyncMutex<Option<Job>>>,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn(queue: Queue, job_type: String, processor: Arc<dyn Processor>) -> Self {
        let cancel = CancellationToken::new();
        let current_job = Arc::new(AsyncMutex::new(None));

        let join_handle = tokio::spawn(run_worker_loop(
            queue,
            job_type.clone(),
            processor,
            cancel.clone(),
            current_job.clone(),
        ));

        Self {
            job_type,
            cancel,
            current_job,
            join_handle,
        }
    }

    pub(crate) fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Flips `still_interested` to false and waits up to `timeout` for the
    /// current processor (if any) to complete. If the deadline elapses
    /// while running, the current job is force-failed with "shutdown
    /// timeout" and the worker task is left to finish on its own.
    pub(crate) async fn shutdown(mut self, timeout: Duration) -> Result<()> {
        self.cancel.cancel();

        match tokio::time::timeout(timeout, &mut self.join_handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_err)) => Err(Error::WorkerTask(join_err.to_string())),
            Err(_elapsed) => {
                if let Some(job) = self.current_job.lock().await.take() {
                    let _ = job.set_state_to_failure("shutdown timeout").await;
                }
                // Dropping `join_handle` here detaches the task; it keeps
                // running in the background rather than being aborted, per
                // the "processor is not forcibly aborted" contract.
                Err(Error::ShutdownTimeout)
            }
        }
    }
}

async fn run_worker_loop(
    queue: Queue,
    job_type: String,
    processor: Arc<dyn Processor>,
    cancel: CancellationToken,
    current_job: Arc<AsyncMutex<Option<Job>>>,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let requested = queue.request_job_for_processing(&job_type, cancel.clone()).await;

        let job = match requested {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(err) => {
                queue.events().emit(JobEvent::Error {
                    message: err.to_string(),
                    job: None,
                });
                continue;
            }
        };

        *current_job.lock().await = Some(job.clone());

        let outcome = processor.process(job.clone()).await;

        // If the shutdown-timeout path already took the slot, this job was
        // force-failed; don't resurrect it with a late completion/failure.
        let mut slot = current_job.lock().await;
        if slot.take().is_some() {
            let result = match outcome {
                Ok(value) => job.set_state_to_complete(value).await,
                Err(err) => job.set_state_to_failure(err.to_string()).await,
            };
            if let Err(err) = result {
                queue.events().emit(JobEvent::Error {
                    message: err.to_string(),
                    job: Some(job.record().await),
                });
            }
        }
        drop(slot);

        if cancel.is_cancelled() {
            return;
        }
    }
}
