use uuid::Uuid;

use crate::state::JobState;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("job {0} was already saved")]
    AlreadySaved(Uuid),

    #[error("job {0} has not been saved")]
    NotSaved(Uuid),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: JobState,
        to: JobState,
    },

    #[error("job {id} must be {expected} for this operation, but is {actual}")]
    InvalidState {
        id: Uuid,
        expected: JobState,
        actual: JobState,
    },

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("shutdown timeout")]
    ShutdownTimeout,

    #[error("worker task panicked or was cancelled: {0}")]
    WorkerTask(String),
}

pub type Result<T> = std::result::Result<T, Error>;
