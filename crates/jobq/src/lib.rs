//! # jobq
//!
//! An embeddable, persistent job queue: the dispatch and lifecycle core.
//!
//! `jobq` schedules typed units of work (`Job`s) against pluggable storage
//! (`Repository`) and hands them to user-supplied `Processor`s running on
//! one or more workers per job type. It owns:
//!
//! - the job lifecycle (`INACTIVE -> ACTIVE -> COMPLETE | FAILURE`)
//! - priority- and age-ordered dispatch, with FIFO handoff to any worker
//!   already parked waiting for work of that type
//! - crash recovery (jobs left `ACTIVE` by a prior process are marked
//!   `FAILURE` on the next `Queue::create`)
//! - graceful shutdown with a bounded grace period per worker
//! - a best-effort event bus for observing lifecycle transitions
//!
//! Storage is out of scope: implement `Repository` against whatever
//! document store fits your deployment. `jobq-sqlite` ships one such
//! implementation for local, file- or memory-backed use.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use jobq::{MemoryRepository, Queue, FnProcessor};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let queue = Queue::create(Arc::new(MemoryRepository::new())).await?;
//! queue.create_job("send_email", None, Some(serde_json::json!({"to": "a@b.com"}))).await?;
//!
//! queue.process("send_email", Arc::new(FnProcessor(|job| async move {
//!     println!("sending to {:?}", job.record().await.data);
//!     Ok(None)
//! })), 4).await;
//! # Ok(())
//! # }
//! ```

mod error;
mod events;
mod job;
mod priority;
mod queue;
mod record;
mod repository;
mod state;
mod worker;

pub use error::{Error, Result};
pub use events::{EventBus, EventKind, JobEvent, SubscriptionGuard};
pub use job::Job;
pub use priority::Priority;
pub use queue::Queue;
pub use record::JobRecord;
pub use repository::{MemoryRepository, Repository, StorageOptions};
pub use state::JobState;
pub use worker::{FnProcessor, Processor};

pub use async_trait::async_trait;
