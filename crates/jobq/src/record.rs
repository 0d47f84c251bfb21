//! The persisted document schema: one document per job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::priority::Priority;
use crate::state::JobState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub job_type: String,
    pub priority: Priority,
    pub data: serde_json::Value,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub progress: Option<u8>,
    pub logs: Vec<String>,
}

impl JobRecord {
    pub fn new(job_type: impl Into<String>, priority: Priority, data: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            priority,
            data,
            state: JobState::Inactive,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            duration_ms: None,
            progress: None,
            logs: Vec::new(),
        }
    }
}
