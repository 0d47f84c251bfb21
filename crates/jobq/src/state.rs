//! Job lifecycle state and the legal transition table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Inactive,
    Active,
    Complete,
    Failure,
}

impl JobState {
    /// `COMPLETE` and `FAILURE` are terminal: no outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failure)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Inactive, JobState::Active)
                | (JobState::Active, JobState::Complete)
                | (JobState::Active, JobState::Failure)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Inactive => "INACTIVE",
            JobState::Active => "ACTIVE",
            JobState::Complete => "COMPLETE",
            JobState::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}
