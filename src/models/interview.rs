use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a captured interview
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewStatus {
    #[default]
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl InterviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewStatus::Pending => "pending",
            InterviewStatus::Syncing => "syncing",
            InterviewStatus::Synced => "synced",
            InterviewStatus::Failed => "failed",
        }
    }

    /// Whether a record in this state is waiting to be uploaded
    pub fn is_pending(&self) -> bool {
        matches!(self, InterviewStatus::Pending | InterviewStatus::Failed)
    }

    /// Whether `self -> next` is an allowed change
    ///
    /// Re-setting the current state is allowed except for `synced`, which is
    /// terminal: the record is about to be deleted by the sync driver.
    pub fn can_transition_to(&self, next: InterviewStatus) -> bool {
        use InterviewStatus::*;
        match (self, next) {
            (Synced, _) => false,
            (a, b) if *a == b => true,
            (Pending, Syncing)
            | (Syncing, Synced)
            | (Syncing, Failed)
            | (Failed, Pending)
            | (Failed, Syncing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for InterviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterviewStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(InterviewStatus::Pending),
            "syncing" => Ok(InterviewStatus::Syncing),
            "synced" => Ok(InterviewStatus::Synced),
            "failed" => Ok(InterviewStatus::Failed),
            other => anyhow::bail!(
                "Invalid status '{}'. Must be one of: pending, syncing, synced, failed",
                other
            ),
        }
    }
}

// Records written by older builds may carry no status or a value this build
// does not know; both read as pending so the interview is not lost.
impl<'de> Deserialize<'de> for InterviewStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw {
            None => InterviewStatus::Pending,
            Some(s) => s.parse().unwrap_or_else(|_| {
                log::warn!("Unknown interview status '{}', treating as pending", s);
                InterviewStatus::Pending
            }),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterviewMode {
    #[default]
    #[serde(rename = "capi", alias = "CAPI")]
    Capi,
    #[serde(rename = "cati", alias = "CATI")]
    Cati,
}

impl InterviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewMode::Capi => "capi",
            InterviewMode::Cati => "cati",
        }
    }
}

impl FromStr for InterviewMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "capi" => Ok(InterviewMode::Capi),
            "cati" => Ok(InterviewMode::Cati),
            other => anyhow::bail!("Invalid interview mode '{}'. Must be capi or cati", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewResponse {
    pub question_id: String,
    #[serde(default)]
    pub question_text: Option<String>,
    #[serde(default)]
    pub response: Value,
    #[serde(default)]
    pub answered_at: Option<DateTime<Utc>>,
}

/// Administrative geography picked during the interview
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSelections {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub ac: Option<String>,
    #[serde(default)]
    pub polling_group: Option<String>,
    #[serde(default)]
    pub polling_station: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

/// Reference to an audio file on device; the audio itself is never inlined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRecording {
    pub uri: String,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// One captured survey response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineInterview {
    pub id: String,
    #[serde(default)]
    pub survey_id: String,
    /// Full survey body; always `None` once persisted
    #[serde(default)]
    pub survey: Option<Value>,
    #[serde(default)]
    pub interview_mode: InterviewMode,
    #[serde(default)]
    pub responses: Vec<InterviewResponse>,
    #[serde(default)]
    pub selections: LocationSelections,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub audio: Option<AudioRecording>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub status: InterviewStatus,
    #[serde(default)]
    pub sync_attempts: u32,
    #[serde(default)]
    pub last_sync_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OfflineInterview {
    pub fn new(survey_id: impl Into<String>, mode: InterviewMode) -> Self {
        let started_at = Utc::now();
        Self {
            id: generate_interview_id(started_at),
            survey_id: survey_id.into(),
            survey: None,
            interview_mode: mode,
            responses: Vec::new(),
            selections: LocationSelections::default(),
            location: None,
            audio: None,
            call_id: None,
            started_at,
            completed_at: None,
            duration_secs: None,
            is_completed: false,
            metadata: Map::new(),
            status: InterviewStatus::Pending,
            sync_attempts: 0,
            last_sync_attempt: None,
            error: None,
        }
    }

    /// Mark capture as finished and fill in the end time and duration
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_secs = Some((now - self.started_at).num_seconds().max(0) as u64);
        self.is_completed = true;
    }
}

/// `offline_<unix millis>_<9 base-36 chars>`
pub fn generate_interview_id(at: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("offline_{}_{}", at.timestamp_millis(), suffix)
}
