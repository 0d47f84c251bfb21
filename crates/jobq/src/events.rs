//! Best-effort event subscription bus. Handlers are plain callbacks fanned
//! out to subscribers; a slow or absent subscriber never blocks dispatch —
//! backpressure is not modeled, matching spec.md §5's "event bus is
//! best-effort; subscribers must not block".

use std::fmt;

use tokio::sync::broadcast;

use crate::record::JobRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Error,
    Enqueue,
    Start,
    Progress,
    Complete,
    Failure,
    Remove,
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Error {
        message: String,
        job: Option<JobRecord>,
    },
    Enqueue {
        job: JobRecord,
    },
    Start {
        job: JobRecord,
    },
    Progress {
        job: JobRecord,
        done: u32,
        total: u32,
    },
    Complete {
        job: JobRecord,
        result: Option<serde_json::Value>,
    },
    Failure {
        job: JobRecord,
        error: String,
    },
    Remove {
        job: JobRecord,
    },
}

impl JobEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            JobEvent::Error { .. } => EventKind::Error,
            JobEvent::Enqueue { .. } => EventKind::Enqueue,
            JobEvent::Start { .. } => EventKind::Start,
            JobEvent::Progress { .. } => EventKind::Progress,
            JobEvent::Complete { .. } => EventKind::Complete,
            JobEvent::Failure { .. } => EventKind::Failure,
            JobEvent::Remove { .. } => EventKind::Remove,
        }
    }
}

const CHANNEL_CAPACITY: usize = 1024;

/// Fan-out bus. Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emit an event to all subscribers. Best-effort: if there are no
    /// subscribers, or a lagging subscriber misses events, this is not an
    /// error.
    pub fn emit(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe a callback for one event kind. The callback runs on a
    /// dedicated task so a slow handler never delays dispatch; it is
    /// dropped (unsubscribed) when the returned guard is dropped.
    pub fn on<F>(&self, kind: EventKind, mut handler: F) -> SubscriptionGuard
    where
        F: FnMut(&JobEvent) + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.kind() == kind => handler(&event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        SubscriptionGuard { task }
    }
}

/// Dropping this unsubscribes the handler.
pub struct SubscriptionGuard {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
