//! Remote data source seam
//!
//! The transport (HTTP, tokens) lives outside this crate. Implementations
//! return `Ok(RemoteResponse)` for anything the server answered, including
//! refusals, and `Err` for transport failures; callers treat both kinds of
//! failure the same way for logging.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::models::{AcData, CurrentUser, PollingGroups, PollingStations};

/// Server envelope: a success flag plus payload or message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> RemoteResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    /// The payload, or a [`RemoteError::Rejected`] naming the operation
    pub fn into_result(self, operation: &str) -> Result<T> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(RemoteError::Rejected {
                operation: operation.to_string(),
                message: "response carried no data".to_string(),
            }
            .into()),
            (false, _) => Err(RemoteError::Rejected {
                operation: operation.to_string(),
                message: self.message.unwrap_or_else(|| "request failed".to_string()),
            }
            .into()),
        }
    }

    /// Like [`into_result`](Self::into_result), for calls where a successful
    /// response may legitimately carry no payload
    pub fn into_optional_result(self, operation: &str) -> Result<Option<T>> {
        if self.success {
            return Ok(self.data);
        }
        Err(RemoteError::Rejected {
            operation: operation.to_string(),
            message: self.message.unwrap_or_else(|| "request failed".to_string()),
        }
        .into())
    }
}

/// Failures a remote implementation can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The server answered and said no
    Rejected { operation: String, message: String },
    /// No remote is configured or the device is offline
    Unavailable,
    /// Timeouts, dropped connections, 5xx and the like
    Transient(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Rejected { operation, message } => {
                write!(f, "{} was rejected: {}", operation, message)
            }
            RemoteError::Unavailable => write!(f, "Remote data source unavailable"),
            RemoteError::Transient(message) => write!(f, "Transient remote failure: {}", message),
        }
    }
}

impl std::error::Error for RemoteError {}

#[async_trait]
pub trait RemoteDataSource: Send + Sync {
    /// MP/MLA and by-election data for one AC
    async fn fetch_ac_data(&self, ac_name: &str) -> Result<RemoteResponse<AcData>>;

    async fn fetch_groups_by_ac(&self, state: &str, ac: &str) -> Result<RemoteResponse<PollingGroups>>;

    async fn fetch_stations_by_group(
        &self,
        state: &str,
        ac: &str,
        group: &str,
    ) -> Result<RemoteResponse<PollingStations>>;

    async fn fetch_gender_quota_counts(&self, survey_id: &str) -> Result<RemoteResponse<Value>>;

    /// `data` is absent when no set has been assigned yet
    async fn fetch_last_cati_set_number(&self, survey_id: &str) -> Result<RemoteResponse<i64>>;

    async fn fetch_current_user(&self, force_refresh: bool) -> Result<RemoteResponse<CurrentUser>>;
}

/// Remote used when running fully offline; every call fails with [`RemoteError::Unavailable`]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRemote;

#[async_trait]
impl RemoteDataSource for UnavailableRemote {
    async fn fetch_ac_data(&self, _ac_name: &str) -> Result<RemoteResponse<AcData>> {
        Err(RemoteError::Unavailable.into())
    }

    async fn fetch_groups_by_ac(&self, _state: &str, _ac: &str) -> Result<RemoteResponse<PollingGroups>> {
        Err(RemoteError::Unavailable.into())
    }

    async fn fetch_stations_by_group(
        &self,
        _state: &str,
        _ac: &str,
        _group: &str,
    ) -> Result<RemoteResponse<PollingStations>> {
        Err(RemoteError::Unavailable.into())
    }

    async fn fetch_gender_quota_counts(&self, _survey_id: &str) -> Result<RemoteResponse<Value>> {
        Err(RemoteError::Unavailable.into())
    }

    async fn fetch_last_cati_set_number(&self, _survey_id: &str) -> Result<RemoteResponse<i64>> {
        Err(RemoteError::Unavailable.into())
    }

    async fn fetch_current_user(&self, _force_refresh: bool) -> Result<RemoteResponse<CurrentUser>> {
        Err(RemoteError::Unavailable.into())
    }
}
