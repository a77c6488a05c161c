//! Administrative geography records as cached and as bundled

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached value with the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cached<T> {
    #[serde(flatten)]
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    pub fn now(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }
}

/// Elected representatives and status for one AC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcData {
    pub ac_name: String,
    #[serde(default)]
    pub canonical_name: Option<String>,
    #[serde(default)]
    pub mp_name: Option<String>,
    #[serde(default)]
    pub mla_name: Option<String>,
    #[serde(default)]
    pub bye_election: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcMetadata {
    pub ac_name: String,
    #[serde(default)]
    pub ac_no: Option<u32>,
    #[serde(default)]
    pub pc_name: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
}

/// Polling group names for one AC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingGroups {
    #[serde(flatten)]
    pub ac: AcMetadata,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    #[serde(default)]
    pub number: Option<u32>,
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Stations of one polling group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingStations {
    #[serde(default)]
    pub ac_name: Option<String>,
    pub group: String,
    #[serde(default)]
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollingGps {
    pub latitude: f64,
    pub longitude: f64,
}

/// Display-ready AC entry for pickers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcSummary {
    #[serde(default)]
    pub ac_code: Option<String>,
    #[serde(default)]
    pub ac_no: Option<u32>,
    pub ac_name: String,
    #[serde(default)]
    pub pc_name: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
}

/// Every AC of one state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcList {
    pub acs: Vec<AcSummary>,
}

/// An AC with its polling groups, as shipped in the bundled geography
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcRecord {
    pub id: String,
    pub ac_name: String,
    #[serde(default)]
    pub ac_no: Option<u32>,
    #[serde(default)]
    pub pc_name: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    #[serde(default)]
    pub stations: Vec<Station>,
}

impl AcRecord {
    pub fn metadata(&self) -> AcMetadata {
        AcMetadata {
            ac_name: self.ac_name.clone(),
            ac_no: self.ac_no,
            pc_name: self.pc_name.clone(),
            district: self.district.clone(),
        }
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }

    pub fn group(&self, name: &str) -> Option<&GroupRecord> {
        let wanted = name.trim();
        self.groups
            .iter()
            .find(|g| g.name == wanted)
            .or_else(|| self.groups.iter().find(|g| g.name.eq_ignore_ascii_case(wanted)))
    }
}
