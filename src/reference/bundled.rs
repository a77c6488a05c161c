//! Read-only geography shipped with the binary
//!
//! Two datasets: the nested state → AC → polling group → station tree, and the
//! flat per-state AC list used by pickers. Both are parsed once per loader, on
//! first use; concurrent first callers wait on the same load.

use anyhow::{Context, Result};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use include_dir::{Dir, include_dir};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;

use super::matching::{best_match, normalize_basic, normalize_name};
use crate::models::{AcRecord, AcSummary, Station};

static BUNDLED_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/data/reference");

pub const GEOGRAPHY_FILE: &str = "polling_stations.json";
pub const AC_LIST_FILE: &str = "assembly_constituencies.json";

#[derive(Debug, Clone, Default, Deserialize)]
struct GeographyFile {
    #[serde(default)]
    states: Vec<StateGeography>,
}

#[derive(Debug, Clone, Deserialize)]
struct StateGeography {
    name: String,
    #[serde(default)]
    acs: Vec<AcRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AcListFile {
    #[serde(default)]
    states: Vec<StateAcList>,
}

#[derive(Debug, Clone, Deserialize)]
struct StateAcList {
    name: String,
    #[serde(default)]
    acs: Vec<AcSummary>,
}

/// Parsed datasets
#[derive(Debug, Clone, Default)]
pub struct BundledDataset {
    geography: Vec<StateGeography>,
    ac_lists: Vec<StateAcList>,
}

impl BundledDataset {
    pub fn parse(geography_json: &str, ac_list_json: &str) -> Result<Self> {
        let geography: GeographyFile =
            serde_json::from_str(geography_json).context("Failed to parse bundled geography")?;
        let ac_lists: AcListFile =
            serde_json::from_str(ac_list_json).context("Failed to parse bundled AC list")?;

        Ok(Self {
            geography: geography.states,
            ac_lists: ac_lists.states,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.geography.is_empty() && self.ac_lists.is_empty()
    }

    fn acs_in(&self, state: &str) -> &[AcRecord] {
        let wanted = normalize_basic(state);
        self.geography
            .iter()
            .find(|s| normalize_basic(&s.name) == wanted)
            .map(|s| s.acs.as_slice())
            .unwrap_or_default()
    }

    fn ac_list(&self, state: &str) -> &[AcSummary] {
        let wanted = normalize_basic(state);
        self.ac_lists
            .iter()
            .find(|s| normalize_basic(&s.name) == wanted)
            .map(|s| s.acs.as_slice())
            .unwrap_or_default()
    }
}

/// Where the datasets come from
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// Files compiled into the binary
    Embedded,
    /// A directory holding the two files, overriding the embedded copy
    Directory(PathBuf),
    /// Raw JSON documents (geography, AC list)
    Inline { geography: String, ac_list: String },
}

impl DatasetSource {
    fn read(&self) -> Result<BundledDataset> {
        match self {
            DatasetSource::Embedded => {
                let read = |name: &str| -> Result<&'static str> {
                    BUNDLED_DIR
                        .get_file(name)
                        .with_context(|| format!("Bundled file {} is missing", name))?
                        .contents_utf8()
                        .with_context(|| format!("Bundled file {} is not UTF-8", name))
                };
                BundledDataset::parse(read(GEOGRAPHY_FILE)?, read(AC_LIST_FILE)?)
            }
            DatasetSource::Directory(dir) => {
                let read = |name: &str| -> Result<String> {
                    let path = dir.join(name);
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read dataset file: {}", path.display()))
                };
                BundledDataset::parse(&read(GEOGRAPHY_FILE)?, &read(AC_LIST_FILE)?)
            }
            DatasetSource::Inline {
                geography,
                ac_list,
            } => BundledDataset::parse(geography, ac_list),
        }
    }
}

/// Memoized access to the bundled datasets
pub struct BundledReferenceData {
    source: DatasetSource,
    dataset: OnceCell<Arc<BundledDataset>>,
    loads: AtomicUsize,
}

impl BundledReferenceData {
    pub fn new(source: DatasetSource) -> Self {
        Self {
            source,
            dataset: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn embedded() -> Self {
        Self::new(DatasetSource::Embedded)
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(DatasetSource::Directory(dir.into()))
    }

    pub fn from_json(geography: impl Into<String>, ac_list: impl Into<String>) -> Self {
        Self::new(DatasetSource::Inline {
            geography: geography.into(),
            ac_list: ac_list.into(),
        })
    }

    /// How many times the datasets have been parsed (0 or 1)
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// The parsed datasets; an unreadable source yields an empty dataset
    pub async fn dataset(&self) -> Arc<BundledDataset> {
        self.dataset
            .get_or_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                let source = self.source.clone();
                let parsed = tokio::task::spawn_blocking(move || source.read())
                    .await
                    .context("Dataset loader task failed")
                    .and_then(|r| r);

                match parsed {
                    Ok(dataset) => {
                        log::debug!(
                            "Loaded bundled reference data: {} states with geography, {} with AC lists",
                            dataset.geography.len(),
                            dataset.ac_lists.len()
                        );
                        Arc::new(dataset)
                    }
                    Err(e) => {
                        log::error!("Bundled reference data unavailable: {:#}", e);
                        Arc::new(BundledDataset::default())
                    }
                }
            })
            .await
            .clone()
    }

    /// Resolve a free-text AC name to its identifier
    pub async fn find_ac_by_name(&self, state: &str, name: &str) -> Option<String> {
        let dataset = self.dataset().await;
        let acs = dataset.acs_in(state);
        let names: Vec<&str> = acs.iter().map(|ac| ac.ac_name.as_str()).collect();

        let (index, tier) = best_match(name, &names)?;
        log::trace!("Resolved AC '{}' to '{}' ({:?})", name, acs[index].ac_name, tier);
        Some(acs[index].id.clone())
    }

    /// The AC record for an identifier or name
    pub async fn get_groups_for_ac(&self, state: &str, identifier: &str) -> Option<AcRecord> {
        let dataset = self.dataset().await;
        let acs = dataset.acs_in(state);
        let identifier = identifier.trim();

        if let Some(ac) = acs.iter().find(|ac| ac.id == identifier) {
            return Some(ac.clone());
        }

        if let Some(id) = self.find_ac_by_name(state, identifier).await {
            if let Some(ac) = acs.iter().find(|ac| ac.id == id) {
                return Some(ac.clone());
            }
        }

        let wanted = normalize_name(identifier);
        let found = acs.iter().find(|ac| {
            ac.id.eq_ignore_ascii_case(identifier)
                || ac.ac_name.eq_ignore_ascii_case(identifier)
                || normalize_name(&ac.ac_name) == wanted
        });
        if found.is_none() {
            log::debug!("AC '{}' not in bundled data for {}", identifier, state);
        }
        found.cloned()
    }

    /// All ACs of a state, empty if the state is not bundled
    pub async fn get_all_acs_for_state(&self, state: &str) -> Vec<AcSummary> {
        self.dataset().await.ac_list(state).to_vec()
    }

    /// Stations of one group; `None` if the AC or the group is missing
    pub async fn get_polling_stations_for_group(
        &self,
        state: &str,
        identifier: &str,
        group: &str,
    ) -> Option<Vec<Station>> {
        let ac = self.get_groups_for_ac(state, identifier).await?;
        let group = ac.group(group)?;
        Some(group.stations.clone())
    }

    /// Fuzzy type-ahead over AC names, best first
    pub async fn suggest_acs(&self, state: &str, query: &str, limit: usize) -> Vec<AcSummary> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let dataset = self.dataset().await;
        let matcher = SkimMatcherV2::default();

        let mut scored: Vec<(i64, &AcSummary)> = dataset
            .ac_list(state)
            .iter()
            .filter_map(|ac| matcher.fuzzy_match(&ac.ac_name, query).map(|s| (s, ac)))
            .collect();

        // Stable sort keeps dataset order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, ac)| ac.clone())
            .collect()
    }

    pub async fn list_states(&self) -> Vec<String> {
        let dataset = self.dataset().await;
        let mut states: Vec<String> = Vec::new();
        let names = dataset
            .geography
            .iter()
            .map(|s| &s.name)
            .chain(dataset.ac_lists.iter().map(|s| &s.name));
        for name in names {
            if !states.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                states.push(name.clone());
            }
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WB: &str = "West Bengal";

    #[tokio::test]
    async fn test_alias_resolves_to_canonical_entry() {
        let data = BundledReferenceData::embedded();

        let canonical = data.find_ac_by_name(WB, "COOCHBEHAR UTTAR (SC)").await;
        let variant = data.find_ac_by_name(WB, "Cooch Behar Uttar").await;

        assert_eq!(canonical.as_deref(), Some("3"));
        assert_eq!(variant, canonical);
    }

    #[tokio::test]
    async fn test_groups_by_id_and_name() {
        let data = BundledReferenceData::embedded();

        let by_id = data.get_groups_for_ac(WB, "12").await.unwrap();
        assert_eq!(by_id.ac_name, "ALIPURDUARS");

        let by_name = data.get_groups_for_ac(WB, "alipurduar").await.unwrap();
        assert_eq!(by_name.id, "12");

        assert!(data.get_groups_for_ac(WB, "Atlantis").await.is_none());
        assert!(data.get_groups_for_ac("Kerala", "12").await.is_none());
    }

    #[tokio::test]
    async fn test_stations_for_group() {
        let data = BundledReferenceData::embedded();

        let stations = data
            .get_polling_stations_for_group(WB, "Mekliganj", "Group 1")
            .await
            .unwrap();
        assert!(!stations.is_empty());
        assert_eq!(stations[0].number, Some(1));

        assert!(
            data.get_polling_stations_for_group(WB, "Mekliganj", "Group 99")
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_all_acs_and_unknown_state() {
        let data = BundledReferenceData::embedded();

        let acs = data.get_all_acs_for_state("west bengal").await;
        assert!(!acs.is_empty());
        assert_eq!(acs[0].ac_no, Some(1));

        assert!(data.get_all_acs_for_state("Atlantis").await.is_empty());
        assert_eq!(data.list_states().await, vec![WB.to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let data = Arc::new(BundledReferenceData::embedded());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let data = data.clone();
                tokio::spawn(async move { data.get_all_acs_for_state(WB).await.len() })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap() > 0);
        }
        assert_eq!(data.load_count(), 1);
    }

    #[tokio::test]
    async fn test_broken_source_degrades_to_empty() {
        let data = BundledReferenceData::from_json("{not json", "{}");

        assert!(data.find_ac_by_name(WB, "Dinhata").await.is_none());
        assert!(data.get_all_acs_for_state(WB).await.is_empty());
        assert!(data.dataset().await.is_empty());
        assert_eq!(data.load_count(), 1);
    }

    #[tokio::test]
    async fn test_suggest_acs_ranks_closest_first() {
        let data = BundledReferenceData::embedded();

        let suggestions = data.suggest_acs(WB, "kalimp", 3).await;
        assert_eq!(suggestions[0].ac_name, "Kalimpong");
        assert!(suggestions.len() <= 3);

        assert!(data.suggest_acs(WB, "  ", 3).await.is_empty());
    }
}
