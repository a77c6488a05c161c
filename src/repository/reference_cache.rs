//! Write-through cache of reference geography
//!
//! Keys are composite: `<bucket><state>::<ac>[::<group>[::<station>]]`. The
//! state part is lowercased with whitespace collapsed and the AC part is
//! rewritten through the alias table before use. Reads that miss the
//! exact key fall back to [`match_cached_entry`] over the state's entries so an
//! AC cached under its number is still found by name and vice versa.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{
    AcData, AcList, AcSummary, Cached, PollingGps, PollingGroups, PollingStations,
};
use crate::reference::matching::{CachedEntryRef, match_cached_entry, normalize_basic, resolve_alias};
use crate::storage::{KeyValueStore, get_json, remove_prefix, set_json};

pub const AC_DATA_PREFIX: &str = "ref:ac_data:";
pub const ALL_ACS_PREFIX: &str = "ref:all_acs:";
pub const POLLING_GROUPS_PREFIX: &str = "ref:polling_groups:";
pub const POLLING_STATIONS_PREFIX: &str = "ref:polling_stations:";
pub const POLLING_GPS_PREFIX: &str = "ref:polling_gps:";

const SEPARATOR: &str = "::";

/// Minimum AC count for a state's list to be trusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletenessFloors {
    pub default: usize,
    pub per_state: HashMap<String, usize>,
}

impl CompletenessFloors {
    pub fn new(default: usize) -> Self {
        Self {
            default,
            per_state: HashMap::new(),
        }
    }

    pub fn with_state(mut self, state: &str, floor: usize) -> Self {
        self.per_state.insert(normalize_basic(state), floor);
        self
    }

    pub fn floor_for(&self, state: &str) -> usize {
        self.per_state
            .get(&normalize_basic(state))
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for CompletenessFloors {
    fn default() -> Self {
        Self::new(50).with_state("West Bengal", 200)
    }
}

/// Outcome of the read-back check after writing a state's AC list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteVerification {
    pub expected: usize,
    pub stored: usize,
}

impl WriteVerification {
    pub fn verified(&self) -> bool {
        self.expected == self.stored
    }
}

fn composite_key(prefix: &str, state: &str, parts: &[&str]) -> String {
    let mut key = format!("{}{}", prefix, normalize_basic(state));
    for part in parts {
        key.push_str(SEPARATOR);
        key.push_str(part.trim());
    }
    key
}

pub struct ReferenceCache {
    store: Arc<dyn KeyValueStore>,
    floors: CompletenessFloors,
}

impl ReferenceCache {
    pub fn new(store: Arc<dyn KeyValueStore>, floors: CompletenessFloors) -> Self {
        Self { store, floors }
    }

    pub fn floor_for(&self, state: &str) -> usize {
        self.floors.floor_for(state)
    }

    fn groups_key(state: &str, ac: &str) -> String {
        composite_key(POLLING_GROUPS_PREFIX, state, &[&resolve_alias(ac)])
    }

    fn stations_key(state: &str, ac: &str, group: &str) -> String {
        composite_key(POLLING_STATIONS_PREFIX, state, &[&resolve_alias(ac), group])
    }

    fn gps_key(state: &str, ac: &str, group: &str, station: &str) -> String {
        composite_key(POLLING_GPS_PREFIX, state, &[&resolve_alias(ac), group, station])
    }

    fn ac_data_key(ac_name: &str) -> String {
        format!("{}{}", AC_DATA_PREFIX, resolve_alias(ac_name))
    }

    /// Read a cached entry; undecodable entries are evicted and read as a miss
    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match get_json::<T>(self.store.as_ref(), key).await {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Evicting unreadable cache entry '{}': {:#}", key, e);
                if let Err(e) = self.store.remove(key).await {
                    log::error!("Failed to evict cache entry '{}': {:#}", key, e);
                }
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        set_json(self.store.as_ref(), key, &Cached::now(value)).await?;
        log::debug!("Cached {}", key);
        Ok(())
    }

    /// Entries under `prefix` whose remaining key satisfies `filter`, decoded
    async fn scan<T: DeserializeOwned>(
        &self,
        prefix: &str,
        filter: impl Fn(&str) -> Option<String>,
    ) -> Vec<(String, T)> {
        let keys = match self.store.keys_with_prefix(prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                log::error!("Failed to scan cache prefix '{}': {:#}", prefix, e);
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for key in keys {
            let Some(identifier) = filter(&key[prefix.len()..]) else {
                continue;
            };
            if let Some(value) = self.read::<T>(&key).await {
                entries.push((identifier, value));
            }
        }
        entries
    }

    pub async fn save_groups_for_ac(
        &self,
        state: &str,
        identifier: &str,
        groups: PollingGroups,
    ) -> Result<()> {
        self.write(&Self::groups_key(state, identifier), groups).await
    }

    pub async fn get_groups_for_ac(
        &self,
        state: &str,
        identifier: &str,
    ) -> Option<Cached<PollingGroups>> {
        let key = Self::groups_key(state, identifier);
        if let Some(hit) = self.read(&key).await {
            return Some(hit);
        }

        let prefix = composite_key(POLLING_GROUPS_PREFIX, state, &[""]);
        let entries: Vec<(String, Cached<PollingGroups>)> = self
            .scan(&prefix, |rest| {
                (!rest.contains(SEPARATOR)).then(|| rest.to_string())
            })
            .await;

        let refs: Vec<CachedEntryRef<'_>> = entries
            .iter()
            .map(|(id, entry)| CachedEntryRef {
                identifier: id,
                display_name: Some(entry.data.ac.ac_name.as_str()),
            })
            .collect();

        let index = match_cached_entry(identifier, &refs)?;
        log::debug!(
            "Groups for '{}' served from cached entry '{}'",
            identifier,
            entries[index].0
        );
        entries.into_iter().nth(index).map(|(_, entry)| entry)
    }

    pub async fn save_stations_for_group(
        &self,
        state: &str,
        identifier: &str,
        group: &str,
        stations: PollingStations,
    ) -> Result<()> {
        self.write(&Self::stations_key(state, identifier, group), stations)
            .await
    }

    pub async fn get_stations_for_group(
        &self,
        state: &str,
        identifier: &str,
        group: &str,
    ) -> Option<Cached<PollingStations>> {
        let key = Self::stations_key(state, identifier, group);
        if let Some(hit) = self.read(&key).await {
            return Some(hit);
        }

        let prefix = composite_key(POLLING_STATIONS_PREFIX, state, &[""]);
        let suffix = format!("{}{}", SEPARATOR, group.trim());
        let entries: Vec<(String, Cached<PollingStations>)> = self
            .scan(&prefix, |rest| {
                rest.strip_suffix(suffix.as_str())
                    .filter(|ac| !ac.contains(SEPARATOR))
                    .map(str::to_string)
            })
            .await;

        let refs: Vec<CachedEntryRef<'_>> = entries
            .iter()
            .map(|(id, entry)| CachedEntryRef {
                identifier: id,
                display_name: entry.data.ac_name.as_deref(),
            })
            .collect();

        let index = match_cached_entry(identifier, &refs)?;
        entries.into_iter().nth(index).map(|(_, entry)| entry)
    }

    pub async fn save_polling_gps(
        &self,
        state: &str,
        identifier: &str,
        group: &str,
        station: &str,
        gps: PollingGps,
    ) -> Result<()> {
        self.write(&Self::gps_key(state, identifier, group, station), gps)
            .await
    }

    pub async fn get_polling_gps(
        &self,
        state: &str,
        identifier: &str,
        group: &str,
        station: &str,
    ) -> Option<Cached<PollingGps>> {
        self.read(&Self::gps_key(state, identifier, group, station))
            .await
    }

    pub async fn save_ac_data(&self, ac_name: &str, data: AcData) -> Result<()> {
        self.write(&Self::ac_data_key(ac_name), data).await
    }

    pub async fn get_ac_data(&self, ac_name: &str) -> Option<Cached<AcData>> {
        if let Some(hit) = self.read(&Self::ac_data_key(ac_name)).await {
            return Some(hit);
        }

        let entries: Vec<(String, Cached<AcData>)> = self
            .scan(AC_DATA_PREFIX, |rest| Some(rest.to_string()))
            .await;
        let refs: Vec<CachedEntryRef<'_>> = entries
            .iter()
            .map(|(id, entry)| CachedEntryRef {
                identifier: id,
                display_name: Some(
                    entry
                        .data
                        .canonical_name
                        .as_deref()
                        .unwrap_or(entry.data.ac_name.as_str()),
                ),
            })
            .collect();

        let index = match_cached_entry(ac_name, &refs)?;
        entries.into_iter().nth(index).map(|(_, entry)| entry)
    }

    /// Write a state's AC list, then read it back and compare counts
    ///
    /// A mismatch is logged and reported, never raised.
    pub async fn save_all_acs_for_state(
        &self,
        state: &str,
        acs: Vec<AcSummary>,
    ) -> Result<WriteVerification> {
        let key = composite_key(ALL_ACS_PREFIX, state, &[]);
        let expected = acs.len();
        self.write(&key, AcList { acs }).await?;

        let stored = self
            .read::<Cached<AcList>>(&key)
            .await
            .map(|entry| entry.data.acs.len())
            .unwrap_or(0);

        let verification = WriteVerification { expected, stored };
        if !verification.verified() {
            log::error!(
                "AC list for {} failed read-back verification: wrote {}, read {}",
                state,
                expected,
                stored
            );
        }
        Ok(verification)
    }

    /// A state's AC list, or empty if none is cached or it is under the floor
    pub async fn get_all_acs_for_state(&self, state: &str) -> Vec<AcSummary> {
        let key = composite_key(ALL_ACS_PREFIX, state, &[]);
        let Some(entry) = self.read::<Cached<AcList>>(&key).await else {
            return Vec::new();
        };

        let floor = self.floor_for(state);
        if entry.data.acs.len() < floor {
            log::warn!(
                "Cached AC list for {} has {} entries (floor {}), evicting",
                state,
                entry.data.acs.len(),
                floor
            );
            if let Err(e) = self.clear_acs_for_state(state).await {
                log::error!("Failed to evict AC list for {}: {:#}", state, e);
            }
            return Vec::new();
        }

        entry.data.acs
    }

    pub async fn clear_acs_for_state(&self, state: &str) -> Result<()> {
        self.store
            .remove(&composite_key(ALL_ACS_PREFIX, state, &[]))
            .await
    }

    /// Remove every reference entry, returning how many keys were dropped
    pub async fn clear_all(&self) -> Result<usize> {
        let removed = remove_prefix(self.store.as_ref(), "ref:").await?;
        log::info!("Cleared {} reference cache entries", removed);
        Ok(removed)
    }
}
