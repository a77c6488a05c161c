use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An interviewer's slice of a survey assignment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewerAssignment {
    #[serde(default, rename = "assignedACs")]
    pub assigned_acs: Vec<String>,
    #[serde(default, alias = "state")]
    pub selected_state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server-defined survey; fields the cache does not interpret are kept in `extra`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Survey {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub survey_name: Option<String>,
    /// "capi", "cati" or "multi_mode"
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, rename = "assignedACs")]
    pub assigned_acs: Vec<String>,
    #[serde(default)]
    pub ac_assignment_state: Option<String>,
    #[serde(default)]
    pub assigned_interviewers: Vec<InterviewerAssignment>,
    #[serde(default)]
    pub capi_interviewers: Vec<InterviewerAssignment>,
    #[serde(default)]
    pub cati_interviewers: Vec<InterviewerAssignment>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Survey {
    /// Every assignment entry regardless of mode
    pub fn assignments(&self) -> impl Iterator<Item = &InterviewerAssignment> {
        self.assigned_interviewers
            .iter()
            .chain(self.capi_interviewers.iter())
            .chain(self.cati_interviewers.iter())
    }
}
