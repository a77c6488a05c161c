//! Records persisted by the offline cache

pub mod interview;
pub mod reference;
pub mod survey;
pub mod sync;

pub use interview::{
    AudioRecording, GeoPoint, InterviewMode, InterviewResponse, InterviewStatus,
    LocationSelections, OfflineInterview,
};
pub use reference::{
    AcData, AcList, AcMetadata, AcRecord, AcSummary, Cached, GroupRecord, PollingGps, PollingGroups,
    PollingStations, Station,
};
pub use survey::{InterviewerAssignment, Survey};
pub use sync::{SyncOperation, SyncQueueItem};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Snapshot of the signed-in interviewer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub location_control_booster: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
