use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Complete,
    Abandon,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Complete => write!(f, "complete"),
            SyncOperation::Abandon => write!(f, "abandon"),
        }
    }
}

/// One outbound operation waiting for the sync driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: String,
    pub interview_id: String,
    pub operation: SyncOperation,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl SyncQueueItem {
    pub fn new(interview_id: impl Into<String>, operation: SyncOperation, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            interview_id: interview_id.into(),
            operation,
            payload,
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
        }
    }
}
