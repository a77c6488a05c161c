//! Durable storage of captured interviews
//!
//! Each interview lives under its own key (`interviews:record:<id>`) and a small
//! manifest (`interviews:index`) lists ids in insertion order together with the
//! last known record size. [`InterviewStore::list_all_with_report`] is the one
//! place where stored data is validated. Records that are not JSON objects,
//! have no id or are larger than the hard ceiling are deleted and reported.
//! Well-formed records that no longer decode into [`OfflineInterview`] are moved
//! byte for byte to `interviews:quarantine:<id>` and stay there until someone
//! deals with them.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::ancillary::AncillaryCache;
use crate::error::{StoreError, StoreWarning, is_row_too_big};
use crate::models::{InterviewStatus, OfflineInterview};
use crate::storage::{KeyValueStore, get_json, set_json};

pub const INDEX_KEY: &str = "interviews:index";
pub const RECORD_PREFIX: &str = "interviews:record:";
pub const QUARANTINE_PREFIX: &str = "interviews:quarantine:";
/// Single-array collection written by older builds
pub const LEGACY_COLLECTION_KEY: &str = "offline_interviews";

fn record_key(id: &str) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

fn quarantine_key(id: &str) -> String {
    format!("{}{}", QUARANTINE_PREFIX, id)
}

/// Size thresholds for interview records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterviewLimits {
    /// Records larger than this are refused on save
    pub max_record_bytes: usize,
    /// Stored records larger than this are treated as corrupted
    pub corrupt_record_bytes: usize,
    /// Total stored size that triggers a build-up warning
    pub collection_warn_bytes: usize,
}

impl Default for InterviewLimits {
    fn default() -> Self {
        Self {
            max_record_bytes: 2_000_000,
            corrupt_record_bytes: 5_000_000,
            collection_warn_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    #[serde(default)]
    pub bytes: usize,
}

/// Result of a successful save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    pub bytes: usize,
    pub collection_bytes: usize,
    pub warning: Option<StoreWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    pub id: Option<String>,
    pub reason: String,
}

/// Why a stored record was not listed
#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordProblem {
    /// Not an object, no usable id, or too large; deleted
    Corrupt(String),
    /// Well-formed but does not decode; kept aside
    Undecodable(String),
}

/// A record held under the quarantine prefix with its original bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedRecord {
    pub id: String,
    pub raw: String,
}

/// What a listing had to repair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub dropped: Vec<DroppedRecord>,
    /// Well-formed records moved to the quarantine prefix
    pub quarantined: Vec<DroppedRecord>,
    /// Manifest entries whose record no longer exists
    pub missing: usize,
    /// Records found on disk but absent from the manifest
    pub reindexed: usize,
    /// Records moved over from the legacy collection
    pub imported: usize,
    pub warnings: Vec<StoreWarning>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty()
            && self.quarantined.is_empty()
            && self.missing == 0
            && self.reindexed == 0
            && self.imported == 0
            && self.warnings.is_empty()
    }

    fn drop_record(&mut self, id: Option<&str>, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!(
            "Dropping corrupted interview {}: {}",
            id.unwrap_or("<no id>"),
            reason
        );
        self.dropped.push(DroppedRecord {
            id: id.map(str::to_string),
            reason,
        });
    }

    fn quarantine_record(&mut self, id: &str, reason: String) {
        log::warn!("Quarantining interview {}: {}", id, reason);
        self.quarantined.push(DroppedRecord {
            id: Some(id.to_string()),
            reason,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterviewListing {
    pub interviews: Vec<OfflineInterview>,
    pub total_bytes: usize,
    pub report: CleanupReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterviewStats {
    pub total: usize,
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
    pub total_bytes: usize,
}

pub struct InterviewStore {
    store: Arc<dyn KeyValueStore>,
    limits: InterviewLimits,
}

impl InterviewStore {
    pub fn new(store: Arc<dyn KeyValueStore>, limits: InterviewLimits) -> Self {
        Self { store, limits }
    }

    /// Read the manifest, rebuilding it from record keys if it cannot be read
    async fn read_index(&self) -> Result<(Vec<IndexEntry>, Option<StoreWarning>)> {
        match get_json::<Vec<IndexEntry>>(self.store.as_ref(), INDEX_KEY).await {
            Ok(index) => Ok((index.unwrap_or_default(), None)),
            Err(e) => {
                if !is_row_too_big(&e) && e.downcast_ref::<serde_json::Error>().is_none() {
                    return Err(e.context("Failed to read interview index"));
                }
                log::warn!("Interview index unreadable, rebuilding: {:#}", e);

                let index: Vec<IndexEntry> = self
                    .store
                    .keys_with_prefix(RECORD_PREFIX)
                    .await?
                    .into_iter()
                    .map(|key| IndexEntry {
                        id: key[RECORD_PREFIX.len()..].to_string(),
                        bytes: 0,
                    })
                    .collect();
                let warning = StoreWarning::IndexRebuilt {
                    recovered: index.len(),
                };
                // Write the rebuilt manifest so the next read is clean
                self.store.remove(INDEX_KEY).await?;
                set_json(self.store.as_ref(), INDEX_KEY, &index).await?;
                Ok((index, Some(warning)))
            }
        }
    }

    async fn write_index(&self, index: &[IndexEntry]) -> Result<()> {
        set_json(self.store.as_ref(), INDEX_KEY, index)
            .await
            .context("Failed to write interview index")?;
        Ok(())
    }

    /// Persist an interview, replacing any stored copy with the same id
    ///
    /// The survey body is never stored. Fails with
    /// [`StoreError::RecordTooLarge`] or [`StoreError::SaveFailed`] when the
    /// record could not be written; both mean the data is at risk.
    pub async fn save(&self, interview: &OfflineInterview) -> Result<SaveReceipt> {
        let id = interview.id.trim();
        if id.is_empty() {
            return Err(StoreError::SaveFailed {
                id: String::new(),
                reason: "interview has no id".to_string(),
            }
            .into());
        }

        let mut record = interview.clone();
        record.id = id.to_string();
        record.survey = None;

        let raw = serde_json::to_string(&record).map_err(|e| StoreError::SaveFailed {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        let bytes = raw.len();
        log::debug!("Saving interview {} ({} bytes)", id, bytes);

        if bytes > self.limits.max_record_bytes {
            log::error!(
                "Interview {} is {} bytes, over the {} byte limit",
                id,
                bytes,
                self.limits.max_record_bytes
            );
            return Err(StoreError::RecordTooLarge {
                id: id.to_string(),
                bytes,
                limit: self.limits.max_record_bytes,
            }
            .into());
        }

        self.store
            .set(&record_key(id), &raw)
            .await
            .map_err(|e| StoreError::SaveFailed {
                id: id.to_string(),
                reason: format!("{:#}", e),
            })?;

        // The record is durable from here on; a manifest failure only delays
        // indexing until the next listing picks the record up as an orphan.
        let collection_bytes = match self.upsert_index(id, bytes).await {
            Ok(total) => total,
            Err(e) => {
                log::warn!("Interview {} saved but not indexed: {:#}", id, e);
                bytes
            }
        };

        let warning = (collection_bytes > self.limits.collection_warn_bytes).then(|| {
            log::warn!(
                "Offline interviews use {} bytes (threshold {})",
                collection_bytes,
                self.limits.collection_warn_bytes
            );
            StoreWarning::CollectionBuildUp {
                total_bytes: collection_bytes,
                threshold: self.limits.collection_warn_bytes,
            }
        });

        Ok(SaveReceipt {
            bytes,
            collection_bytes,
            warning,
        })
    }

    async fn upsert_index(&self, id: &str, bytes: usize) -> Result<usize> {
        let (mut index, _) = self.read_index().await?;
        match index.iter_mut().find(|e| e.id == id) {
            Some(entry) => entry.bytes = bytes,
            None => index.push(IndexEntry {
                id: id.to_string(),
                bytes,
            }),
        }
        self.write_index(&index).await?;
        Ok(index.iter().map(|e| e.bytes).sum())
    }

    /// Move records out of the legacy single-array collection
    async fn import_legacy(
        &self,
        index: &mut Vec<IndexEntry>,
        report: &mut CleanupReport,
    ) -> Result<()> {
        let raw = match self.store.get(LEGACY_COLLECTION_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(()),
            Err(e) if is_row_too_big(&e) => {
                log::error!("Legacy interview collection too large to read, discarding");
                self.store.remove(LEGACY_COLLECTION_KEY).await?;
                report.warnings.push(StoreWarning::LegacyCollectionDiscarded {
                    reason: e.to_string(),
                });
                return Ok(());
            }
            Err(e) => return Err(e.context("Failed to read legacy interview collection")),
        };

        let items = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => items,
            Ok(_) => Vec::new(),
            Err(e) => {
                let key = quarantine_key(LEGACY_COLLECTION_KEY);
                self.store
                    .set(&key, &raw)
                    .await
                    .context("Failed to quarantine legacy interview collection")?;
                self.store.remove(LEGACY_COLLECTION_KEY).await?;
                report.warnings.push(StoreWarning::LegacyCollectionDiscarded {
                    reason: format!("not valid JSON ({}), kept under {}", e, key),
                });
                return Ok(());
            }
        };

        for mut item in items {
            let Some(object) = item.as_object_mut() else {
                report.drop_record(None, "legacy entry is not an object");
                continue;
            };
            let Some(id) = object
                .get("id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
            else {
                report.drop_record(None, "legacy entry has no id");
                continue;
            };
            if index.iter().any(|e| e.id == id) {
                continue;
            }

            // The record key and the stored id must agree
            object.insert("id".to_string(), Value::String(id.clone()));
            let raw = item.to_string();
            // A failed write leaves the legacy blob in place for the next listing
            self.store
                .set(&record_key(&id), &raw)
                .await
                .with_context(|| format!("Failed to migrate legacy interview {}", id))?;
            index.push(IndexEntry {
                id,
                bytes: raw.len(),
            });
            report.imported += 1;
        }

        self.store.remove(LEGACY_COLLECTION_KEY).await?;
        log::info!("Imported {} interviews from legacy collection", report.imported);
        Ok(())
    }

    /// Validate one stored record
    fn check_record(&self, id: &str, raw: &str) -> std::result::Result<OfflineInterview, RecordProblem> {
        use RecordProblem::*;

        if raw.len() > self.limits.corrupt_record_bytes {
            return Err(Corrupt(format!(
                "{} bytes exceeds the {} byte corruption ceiling",
                raw.len(),
                self.limits.corrupt_record_bytes
            )));
        }

        let value: Value =
            serde_json::from_str(raw).map_err(|e| Corrupt(format!("not valid JSON: {}", e)))?;
        let Some(object) = value.as_object() else {
            return Err(Corrupt("not an object".to_string()));
        };
        match object.get("id").and_then(Value::as_str).map(str::trim) {
            Some("") => return Err(Corrupt("empty id".to_string())),
            Some(stored) if stored != id => {
                return Err(Corrupt(format!("stored id '{}' does not match key", stored)));
            }
            Some(_) => {}
            None => return Err(Corrupt("missing id".to_string())),
        }

        let mut interview: OfflineInterview = serde_json::from_value(value)
            .map_err(|e| Undecodable(format!("does not decode: {}", e)))?;
        interview.id = id.to_string();
        Ok(interview)
    }

    /// Move a record's bytes under the quarantine prefix
    async fn quarantine(&self, id: &str, raw: &str) -> Result<()> {
        self.store
            .set(&quarantine_key(id), raw)
            .await
            .with_context(|| format!("Failed to quarantine interview {}", id))?;
        self.store.remove(&record_key(id)).await
    }

    /// Records held aside because they no longer decode
    pub async fn list_quarantined(&self) -> Result<Vec<QuarantinedRecord>> {
        let mut records = Vec::new();
        for key in self.store.keys_with_prefix(QUARANTINE_PREFIX).await? {
            if let Some(raw) = self.store.get(&key).await? {
                records.push(QuarantinedRecord {
                    id: key[QUARANTINE_PREFIX.len()..].to_string(),
                    raw,
                });
            }
        }
        Ok(records)
    }

    /// Every valid stored interview plus what had to be repaired to get there
    pub async fn list_all_with_report(&self) -> Result<InterviewListing> {
        let mut report = CleanupReport::default();

        let (index, warning) = self.read_index().await?;
        report.warnings.extend(warning);
        let mut changed = !report.warnings.is_empty();

        let listed = index.len();
        let mut seen = HashSet::new();
        let mut index: Vec<IndexEntry> = index
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        changed |= index.len() != listed;

        self.import_legacy(&mut index, &mut report).await?;

        let indexed: HashSet<String> = index.iter().map(|e| e.id.clone()).collect();
        for key in self.store.keys_with_prefix(RECORD_PREFIX).await? {
            let id = &key[RECORD_PREFIX.len()..];
            if !indexed.contains(id) {
                log::info!("Re-indexing orphaned interview {}", id);
                index.push(IndexEntry {
                    id: id.to_string(),
                    bytes: 0,
                });
                report.reindexed += 1;
            }
        }

        let mut interviews = Vec::with_capacity(index.len());
        let mut kept = Vec::with_capacity(index.len());
        for mut entry in index {
            let key = record_key(&entry.id);
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    log::warn!("Interview {} is indexed but missing", entry.id);
                    report.missing += 1;
                    continue;
                }
                Err(e) if is_row_too_big(&e) => {
                    report.drop_record(Some(&entry.id), e.to_string());
                    self.store.remove(&key).await?;
                    continue;
                }
                Err(e) => {
                    return Err(e.context(format!("Failed to read interview {}", entry.id)));
                }
            };

            match self.check_record(&entry.id, &raw) {
                Ok(interview) => {
                    if entry.bytes != raw.len() {
                        entry.bytes = raw.len();
                        changed = true;
                    }
                    interviews.push(interview);
                    kept.push(entry);
                }
                Err(RecordProblem::Corrupt(reason)) => {
                    report.drop_record(Some(&entry.id), reason);
                    self.store.remove(&key).await?;
                }
                Err(RecordProblem::Undecodable(reason)) => {
                    self.quarantine(&entry.id, &raw).await?;
                    report.quarantine_record(&entry.id, reason);
                }
            }
        }

        changed |= !report.dropped.is_empty()
            || !report.quarantined.is_empty()
            || report.missing > 0
            || report.reindexed > 0
            || report.imported > 0;
        if changed {
            self.write_index(&kept).await?;
            log::info!(
                "Interview store repaired: {} dropped, {} quarantined, {} missing, {} re-indexed, {} imported",
                report.dropped.len(),
                report.quarantined.len(),
                report.missing,
                report.reindexed,
                report.imported
            );
        }

        Ok(InterviewListing {
            total_bytes: kept.iter().map(|e| e.bytes).sum(),
            interviews,
            report,
        })
    }

    pub async fn list_all(&self) -> Result<Vec<OfflineInterview>> {
        let listing = self.list_all_with_report().await?;
        for warning in &listing.report.warnings {
            log::warn!("{}", warning);
        }
        Ok(listing.interviews)
    }

    /// Interviews still waiting for upload (pending or failed)
    pub async fn list_pending(&self) -> Result<Vec<OfflineInterview>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|i| i.status.is_pending())
            .collect())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<OfflineInterview>> {
        let raw = match self.store.get(&record_key(id)).await {
            Ok(raw) => raw,
            Err(e) if is_row_too_big(&e) => {
                log::warn!("Interview {} is unreadable: {}", id, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(raw.and_then(|raw| match self.check_record(id, &raw) {
            Ok(interview) => Some(interview),
            Err(problem) => {
                log::warn!("Interview {} is unreadable: {:?}", id, problem);
                None
            }
        }))
    }

    /// Change an interview's status
    ///
    /// Passing an `error` counts a failed sync attempt and records the
    /// message and time.
    pub async fn update_status(
        &self,
        id: &str,
        status: InterviewStatus,
        error: Option<&str>,
    ) -> Result<OfflineInterview> {
        let mut interview = self.get_by_id(id).await?.ok_or_else(|| StoreError::NotFound {
            what: "Interview",
            id: id.to_string(),
        })?;

        if !interview.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: interview.status,
                to: status,
            }
            .into());
        }

        log::debug!("Interview {}: {} -> {}", id, interview.status, status);
        interview.status = status;
        match error {
            Some(message) => {
                interview.sync_attempts += 1;
                interview.error = Some(message.to_string());
                interview.last_sync_attempt = Some(Utc::now());
            }
            None if status == InterviewStatus::Synced => interview.error = None,
            None => {}
        }

        self.save(&interview).await?;
        Ok(interview)
    }

    /// Remove an interview after the server accepted it
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let key = record_key(id);
        let on_disk = self.store.keys_with_prefix(&key).await?.iter().any(|k| *k == key);

        let (mut index, _) = self.read_index().await?;
        let before = index.len();
        index.retain(|e| e.id != id);
        let indexed = index.len() != before;

        if on_disk {
            self.store.remove(&key).await?;
        }
        if indexed {
            self.write_index(&index).await?;
        }
        if on_disk || indexed {
            log::info!("Deleted interview {}", id);
        }
        Ok(on_disk || indexed)
    }

    /// The stored interview with its survey body joined back in for upload
    pub async fn hydrate_for_sync(
        &self,
        id: &str,
        surveys: &AncillaryCache,
    ) -> Result<Option<OfflineInterview>> {
        let Some(mut interview) = self.get_by_id(id).await? else {
            return Ok(None);
        };

        match surveys.get_survey(&interview.survey_id).await? {
            Some(survey) => {
                interview.survey =
                    Some(serde_json::to_value(survey).context("Failed to encode survey")?);
            }
            None => log::warn!(
                "Survey {} for interview {} is not cached",
                interview.survey_id,
                id
            ),
        }
        Ok(Some(interview))
    }

    pub async fn stats(&self) -> Result<InterviewStats> {
        let listing = self.list_all_with_report().await?;
        let mut stats = InterviewStats {
            total: listing.interviews.len(),
            total_bytes: listing.total_bytes,
            ..Default::default()
        };
        for interview in &listing.interviews {
            match interview.status {
                InterviewStatus::Pending => stats.pending += 1,
                InterviewStatus::Syncing => stats.syncing += 1,
                InterviewStatus::Synced => stats.synced += 1,
                InterviewStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
