//! Typed failure conditions carried inside `anyhow::Error`
//!
//! Most of the crate returns `anyhow::Result` with context attached. The
//! conditions a caller has to tell apart (an interview that could not be
//! persisted, a status change that was refused, a row the platform store can no
//! longer read) are raised as [`StoreError`] so they survive the trip through
//! `anyhow` and can be recovered with `downcast_ref`.

use std::fmt;

use crate::models::InterviewStatus;

/// Storage-level failures that change what the caller may assume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A value is larger than the store's per-key ceiling
    RowTooBig { key: String, bytes: usize, limit: usize },
    /// A single interview record is over the soft size ceiling and was not saved
    RecordTooLarge { id: String, bytes: usize, limit: usize },
    /// Persisting an interview failed for another reason
    SaveFailed { id: String, reason: String },
    /// A status change the lifecycle does not allow
    InvalidTransition {
        id: String,
        from: InterviewStatus,
        to: InterviewStatus,
    },
    /// The addressed record does not exist
    NotFound { what: &'static str, id: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::RowTooBig { key, bytes, limit } => write!(
                f,
                "Row too big: '{}' is {} bytes (limit {} bytes)",
                key, bytes, limit
            ),
            StoreError::RecordTooLarge { id, bytes, limit } => write!(
                f,
                "Interview '{}' is {} bytes which exceeds the {} byte limit; sync before continuing",
                id, bytes, limit
            ),
            StoreError::SaveFailed { id, reason } => {
                write!(f, "Failed to save interview '{}': {}", id, reason)
            }
            StoreError::InvalidTransition { id, from, to } => write!(
                f,
                "Invalid status transition for interview '{}': {} -> {}",
                id, from, to
            ),
            StoreError::NotFound { what, id } => write!(f, "{} '{}' not found", what, id),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// True when the failure means captured data may be lost unless the user acts
    pub fn is_data_at_risk(&self) -> bool {
        matches!(
            self,
            StoreError::RecordTooLarge { .. } | StoreError::SaveFailed { .. }
        )
    }
}

/// Returns true if `err` carries a [`StoreError::RowTooBig`]
pub fn is_row_too_big(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::RowTooBig { .. })
    )
}

/// How a UI should react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Nothing to show; fall back or display an empty state
    NoData,
    /// Captured data is not safely stored; warn before navigating away
    DataAtRisk,
    /// The request was refused by a lifecycle rule
    Rejected,
    /// Anything else (I/O, decode, remote)
    Other,
}

impl FailureKind {
    pub fn classify(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<StoreError>() {
            Some(store_err) if store_err.is_data_at_risk() => FailureKind::DataAtRisk,
            Some(StoreError::NotFound { .. }) => FailureKind::NoData,
            Some(StoreError::InvalidTransition { .. }) => FailureKind::Rejected,
            Some(StoreError::RowTooBig { .. }) => FailureKind::DataAtRisk,
            _ => FailureKind::Other,
        }
    }
}

/// Non-fatal conditions surfaced alongside a successful result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWarning {
    /// The interview manifest could not be read and was rebuilt from record keys
    IndexRebuilt { recovered: usize },
    /// The legacy single-blob collection was unreadable and has been discarded
    LegacyCollectionDiscarded { reason: String },
    /// Stored interviews are accumulating past the configured threshold
    CollectionBuildUp { total_bytes: usize, threshold: usize },
    /// The sync queue index could not be read and was rebuilt from item keys
    QueueIndexRebuilt { recovered: usize },
    /// Legacy queue content that could not be mapped was kept under `key`
    LegacyQueueSetAside { items: usize, key: String },
}

impl fmt::Display for StoreWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreWarning::IndexRebuilt { recovered } => write!(
                f,
                "Interview index was unreadable and has been rebuilt ({} records recovered)",
                recovered
            ),
            StoreWarning::LegacyCollectionDiscarded { reason } => write!(
                f,
                "Legacy interview collection was discarded: {}",
                reason
            ),
            StoreWarning::CollectionBuildUp {
                total_bytes,
                threshold,
            } => write!(
                f,
                "Offline interviews use {} bytes (warning threshold {} bytes); sync soon",
                total_bytes, threshold
            ),
            StoreWarning::QueueIndexRebuilt { recovered } => write!(
                f,
                "Sync queue index was unreadable and has been rebuilt ({} items recovered)",
                recovered
            ),
            StoreWarning::LegacyQueueSetAside { items, key } => write!(
                f,
                "{} legacy sync queue entries could not be imported and were kept under '{}'",
                items, key
            ),
        }
    }
}
