//! # jobq Demo
//!
//! Enqueues a few jobs, processes them with a closure-based processor, and
//! logs every lifecycle event through `tracing`. No storage backend beyond
//! the in-memory reference `Repository` - this is illustration, not a
//! deployment template.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use jobq::{EventKind, FnProcessor, MemoryRepository, Priority, Queue};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let queue = Queue::create(Arc::new(MemoryRepository::new())).await?;

    let _complete = queue.events().on(EventKind::Complete, |event| {
        if let jobq::JobEvent::Complete { job, .. } = event {
            tracing::info!(job = %job.id, "job complete");
        }
    });
    let _failure = queue.events().on(EventKind::Failure, |event| {
        if let jobq::JobEvent::Failure { job, error, .. } = event {
            tracing::warn!(job = %job.id, %error, "job failed");
        }
    });

    queue
        .create_job("send_email", Some(Priority::High), Some(serde_json::json!({"to": "a@b.com"})))
        .await?;
    queue.create_job("send_email", None, Some(serde_json::json!({"to": "c@d.com"}))).await?;

    queue
        .process(
            "send_email",
            Arc::new(FnProcessor(|job| async move {
                let data = job.record().await.data;
                println!("sending to {data:?}");
                Ok(None)
            })),
            2,
        )
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.shutdown(Duration::from_secs(1), None).await?;

    Ok(())
}
