//! Repository for the outbound sync queue
//!
//! FIFO: `sync_queue:index` holds item ids in insertion order, each item is
//! stored under `sync_queue:item:<id>`. A failed attempt keeps the item in
//! place; only success removes it. Only entries that fail to decode or exceed
//! the store's row ceiling are ever evicted; every other storage error is
//! returned to the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use super::interviews::InterviewStore;
use crate::error::{StoreError, StoreWarning, is_row_too_big};
use crate::models::{OfflineInterview, SyncOperation, SyncQueueItem};
use crate::storage::{KeyValueStore, get_json, set_json};

pub const QUEUE_INDEX_KEY: &str = "sync_queue:index";
pub const QUEUE_ITEM_PREFIX: &str = "sync_queue:item:";
/// Legacy queue content that could not be imported
pub const QUEUE_SET_ASIDE_PREFIX: &str = "sync_queue:set_aside:";
/// Single-array queue written by older builds
pub const LEGACY_QUEUE_KEY: &str = "sync_queue";

fn item_key(id: &str) -> String {
    format!("{}{}", QUEUE_ITEM_PREFIX, id)
}

/// Errors that mean the stored bytes are unusable, as opposed to the store failing
fn is_unreadable(err: &anyhow::Error) -> bool {
    is_row_too_big(err) || err.downcast_ref::<serde_json::Error>().is_some()
}

fn first_str<'a>(object: &'a serde_json::Map<String, Value>, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_operation(raw: &str) -> Option<SyncOperation> {
    match raw.trim().to_lowercase().as_str() {
        "complete" | "completed" => Some(SyncOperation::Complete),
        "abandon" | "abandoned" => Some(SyncOperation::Abandon),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Map one entry of the legacy queue onto the current item shape
///
/// Older builds wrote `type` or `action` for the operation, snake_case field
/// names, epoch-millisecond timestamps and sometimes no item id.
fn legacy_item(value: &Value) -> Option<SyncQueueItem> {
    if let Ok(item) = serde_json::from_value::<SyncQueueItem>(value.clone()) {
        return Some(item);
    }

    let object = value.as_object()?;
    let interview_id = first_str(object, &["interviewId", "interview_id"])?;
    let operation = parse_operation(first_str(object, &["operation", "type", "action"])?)?;

    let created_at = ["createdAt", "created_at", "timestamp"]
        .iter()
        .find_map(|field| object.get(*field).and_then(parse_timestamp))
        .unwrap_or_else(Utc::now);
    let attempts = ["attempts", "retryCount", "retry_count"]
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_u64))
        .unwrap_or(0);

    Some(SyncQueueItem {
        id: first_str(object, &["id"])
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        interview_id: interview_id.to_string(),
        operation,
        payload: object
            .get("payload")
            .or_else(|| object.get("data"))
            .cloned()
            .unwrap_or(Value::Null),
        created_at,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: first_str(object, &["lastError", "last_error", "error"]).map(str::to_string),
        last_attempt_at: None,
    })
}

/// Queued items plus anything the read had to repair
#[derive(Debug, Clone, Default)]
pub struct QueueListing {
    pub items: Vec<SyncQueueItem>,
    /// Items evicted because they could not be decoded
    pub evicted: usize,
    pub warnings: Vec<StoreWarning>,
}

pub struct SyncQueue {
    store: Arc<dyn KeyValueStore>,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn read_index(&self) -> Result<(Vec<String>, Vec<StoreWarning>)> {
        let mut warnings = Vec::new();
        let mut index: Vec<String> = match get_json(self.store.as_ref(), QUEUE_INDEX_KEY).await {
            Ok(index) => index.unwrap_or_default(),
            Err(e) => {
                if !is_unreadable(&e) {
                    return Err(e.context("Failed to read sync queue index"));
                }
                log::warn!("Sync queue index unreadable, rebuilding: {:#}", e);

                let mut items = Vec::new();
                for key in self.store.keys_with_prefix(QUEUE_ITEM_PREFIX).await? {
                    if let Some(item) = self.read_item(&key[QUEUE_ITEM_PREFIX.len()..]).await? {
                        items.push(item);
                    }
                }
                items.sort_by_key(|item| item.created_at);
                let index: Vec<String> = items.into_iter().map(|item| item.id).collect();
                self.store.remove(QUEUE_INDEX_KEY).await?;
                self.write_index(&index).await?;
                warnings.push(StoreWarning::QueueIndexRebuilt {
                    recovered: index.len(),
                });
                index
            }
        };

        if self.import_legacy(&mut index, &mut warnings).await? {
            self.write_index(&index).await?;
        }
        Ok((index, warnings))
    }

    /// The index for internal bookkeeping; warnings only go to the log
    async fn index(&self) -> Result<Vec<String>> {
        let (index, warnings) = self.read_index().await?;
        for warning in warnings {
            log::warn!("{}", warning);
        }
        Ok(index)
    }

    async fn write_index(&self, index: &[String]) -> Result<()> {
        set_json(self.store.as_ref(), QUEUE_INDEX_KEY, index)
            .await
            .context("Failed to write sync queue index")?;
        Ok(())
    }

    /// Keep content that could not be imported under a fresh set-aside key
    async fn set_aside(&self, raw: &str, items: usize, warnings: &mut Vec<StoreWarning>) -> Result<()> {
        let key = format!("{}{}", QUEUE_SET_ASIDE_PREFIX, Uuid::new_v4());
        self.store
            .set(&key, raw)
            .await
            .context("Failed to set aside legacy sync queue content")?;
        log::warn!("Kept {} unreadable legacy queue entries under {}", items, key);
        warnings.push(StoreWarning::LegacyQueueSetAside { items, key });
        Ok(())
    }

    /// Move items out of the legacy single-array queue; true if anything moved
    async fn import_legacy(
        &self,
        index: &mut Vec<String>,
        warnings: &mut Vec<StoreWarning>,
    ) -> Result<bool> {
        let raw = match self.store.get(LEGACY_QUEUE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(false),
            Err(e) if is_row_too_big(&e) => {
                log::error!("Legacy sync queue too large to read, discarding; run queue rebuild");
                self.store.remove(LEGACY_QUEUE_KEY).await?;
                return Ok(false);
            }
            Err(e) => return Err(e.context("Failed to read legacy sync queue")),
        };

        let items = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => items,
            Ok(other) => vec![other],
            Err(e) => {
                log::warn!("Legacy sync queue is not valid JSON: {}", e);
                self.set_aside(&raw, 1, warnings).await?;
                self.store.remove(LEGACY_QUEUE_KEY).await?;
                return Ok(false);
            }
        };

        let mut imported = 0;
        let mut rejected = Vec::new();
        for value in items {
            match legacy_item(&value) {
                Some(item) if !index.contains(&item.id) => {
                    set_json(self.store.as_ref(), &item_key(&item.id), &item).await?;
                    index.push(item.id);
                    imported += 1;
                }
                Some(_) => {}
                None => rejected.push(value),
            }
        }

        if !rejected.is_empty() {
            let raw = serde_json::to_string(&rejected)?;
            self.set_aside(&raw, rejected.len(), warnings).await?;
        }

        self.store.remove(LEGACY_QUEUE_KEY).await?;
        log::info!("Imported {} sync queue items from legacy queue", imported);
        Ok(imported > 0)
    }

    /// One item; `None` if it is missing or its bytes are unusable
    async fn read_item(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        match get_json(self.store.as_ref(), &item_key(id)).await {
            Ok(item) => Ok(item),
            Err(e) if is_unreadable(&e) => {
                log::warn!("Sync queue item {} unreadable: {:#}", id, e);
                Ok(None)
            }
            Err(e) => Err(e.context(format!("Failed to read sync queue item {}", id))),
        }
    }

    /// Queue an operation; an identical pending operation is returned instead of duplicated
    pub async fn enqueue(
        &self,
        interview_id: &str,
        operation: SyncOperation,
        payload: Value,
    ) -> Result<SyncQueueItem> {
        if let Some(existing) = self
            .list()
            .await?
            .into_iter()
            .find(|item| item.interview_id == interview_id && item.operation == operation)
        {
            log::debug!("{} for {} already queued", operation, interview_id);
            return Ok(existing);
        }

        let item = SyncQueueItem::new(interview_id, operation, payload);
        set_json(self.store.as_ref(), &item_key(&item.id), &item)
            .await
            .with_context(|| format!("Failed to queue {} for {}", operation, interview_id))?;

        let mut index = self.index().await?;
        index.push(item.id.clone());
        self.write_index(&index).await?;

        log::info!("Queued {} for interview {}", operation, interview_id);
        Ok(item)
    }

    /// Queue the upload of a finished interview
    pub async fn enqueue_interview(&self, interview: &OfflineInterview) -> Result<SyncQueueItem> {
        let operation = if interview.is_completed {
            SyncOperation::Complete
        } else {
            SyncOperation::Abandon
        };
        let payload = json!({
            "surveyId": interview.survey_id,
            "interviewMode": interview.interview_mode.as_str(),
            "completedAt": interview.completed_at,
        });
        self.enqueue(&interview.id, operation, payload).await
    }

    /// All queued items in FIFO order with what the read repaired
    ///
    /// Items that are missing or do not decode are dropped from the queue.
    pub async fn list_with_report(&self) -> Result<QueueListing> {
        let (index, warnings) = self.read_index().await?;
        let mut items = Vec::with_capacity(index.len());
        let mut kept = Vec::with_capacity(index.len());

        for id in &index {
            match self.read_item(id).await? {
                Some(item) => {
                    kept.push(id.clone());
                    items.push(item);
                }
                None => {
                    self.store.remove(&item_key(id)).await?;
                }
            }
        }

        let evicted = index.len() - kept.len();
        if evicted > 0 {
            log::warn!("Dropped {} broken sync queue entries", evicted);
            self.write_index(&kept).await?;
        }
        Ok(QueueListing {
            items,
            evicted,
            warnings,
        })
    }

    pub async fn list(&self) -> Result<Vec<SyncQueueItem>> {
        let listing = self.list_with_report().await?;
        for warning in &listing.warnings {
            log::warn!("{}", warning);
        }
        Ok(listing.items)
    }

    pub async fn next(&self) -> Result<Option<SyncQueueItem>> {
        Ok(self.list().await?.into_iter().next())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Remove an item after the server accepted it
    pub async fn mark_succeeded(&self, item_id: &str) -> Result<bool> {
        let mut index = self.index().await?;
        let before = index.len();
        index.retain(|id| id != item_id);

        self.store.remove(&item_key(item_id)).await?;
        if index.len() == before {
            return Ok(false);
        }
        self.write_index(&index).await?;
        Ok(true)
    }

    /// Record a failed attempt; the item keeps its queue position
    pub async fn mark_failed(&self, item_id: &str, error: &str) -> Result<SyncQueueItem> {
        let mut item = self.read_item(item_id).await?.ok_or_else(|| StoreError::NotFound {
            what: "Sync queue item",
            id: item_id.to_string(),
        })?;

        item.attempts += 1;
        item.last_error = Some(error.to_string());
        item.last_attempt_at = Some(Utc::now());
        set_json(self.store.as_ref(), &item_key(item_id), &item).await?;

        log::warn!(
            "Sync of {} failed (attempt {}): {}",
            item.interview_id,
            item.attempts,
            error
        );
        Ok(item)
    }

    /// Drop every queued operation for an interview
    pub async fn remove_for_interview(&self, interview_id: &str) -> Result<usize> {
        let mut removed = 0;
        for item in self.list().await? {
            if item.interview_id == interview_id && self.mark_succeeded(&item.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Queue every completed, unsynced interview that has no queued operation
    pub async fn rebuild_from(&self, interviews: &InterviewStore) -> Result<usize> {
        let queued: Vec<String> = self
            .list()
            .await?
            .into_iter()
            .map(|item| item.interview_id)
            .collect();

        let mut added = 0;
        for interview in interviews.list_pending().await? {
            if interview.is_completed && !queued.contains(&interview.id) {
                self.enqueue_interview(&interview).await?;
                added += 1;
            }
        }
        if added > 0 {
            log::info!("Re-queued {} interviews", added);
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InterviewMode;
    use crate::repository::interviews::InterviewLimits;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn queue() -> (Arc<MemoryStore>, SyncQueue) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), SyncQueue::new(store))
    }

    /// Memory store whose reads can be switched to fail like a locked database
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }

        async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.keys_with_prefix(prefix).await
        }

        fn max_value_bytes(&self) -> usize {
            self.inner.max_value_bytes()
        }
    }

    #[tokio::test]
    async fn test_fifo_order_and_dedupe() {
        let (_, queue) = queue();
        let a = queue.enqueue("i1", SyncOperation::Complete, json!({})).await.unwrap();
        let b = queue.enqueue("i2", SyncOperation::Complete, json!({})).await.unwrap();
        let again = queue.enqueue("i1", SyncOperation::Complete, json!({})).await.unwrap();
        queue.enqueue("i1", SyncOperation::Abandon, json!({})).await.unwrap();

        assert_eq!(again.id, a.id);
        let ids: Vec<String> = queue.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], a.id);
        assert_eq!(ids[1], b.id);
    }

    #[tokio::test]
    async fn test_failure_keeps_position_success_removes() {
        let (_, queue) = queue();
        let a = queue.enqueue("i1", SyncOperation::Complete, json!({})).await.unwrap();
        queue.enqueue("i2", SyncOperation::Complete, json!({})).await.unwrap();

        let failed = queue.mark_failed(&a.id, "503").await.unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(queue.next().await.unwrap().unwrap().id, a.id);

        assert!(queue.mark_succeeded(&a.id).await.unwrap());
        assert!(!queue.mark_succeeded(&a.id).await.unwrap());
        assert_eq!(queue.next().await.unwrap().unwrap().interview_id, "i2");
        assert_eq!(queue.len().await.unwrap(), 1);

        assert!(queue.mark_failed("nope", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_broken_item_is_dropped() {
        let (kv, queue) = queue();
        let a = queue.enqueue("i1", SyncOperation::Complete, json!({})).await.unwrap();
        kv.set(&item_key(&a.id), "{broken").await.unwrap();

        assert!(queue.list().await.unwrap().is_empty());
        assert!(kv.keys_with_prefix(QUEUE_ITEM_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_queue_is_imported() {
        let (kv, queue) = queue();
        let legacy = vec![SyncQueueItem::new("i9", SyncOperation::Complete, json!({"n": 1}))];
        kv.set(LEGACY_QUEUE_KEY, &serde_json::to_string(&legacy).unwrap())
            .await
            .unwrap();

        let items = queue.list().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].interview_id, "i9");
        assert!(kv.get(LEGACY_QUEUE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_evict() {
        let store = Arc::new(FlakyStore::default());
        let queue = SyncQueue::new(store.clone());
        queue.enqueue("i1", SyncOperation::Complete, json!({})).await.unwrap();
        queue.enqueue("i2", SyncOperation::Abandon, json!({})).await.unwrap();

        store.failing.store(true, Ordering::SeqCst);
        assert!(queue.list().await.is_err());
        assert!(queue.mark_failed("anything", "x").await.is_err());

        store.failing.store(false, Ordering::SeqCst);
        let listing = queue.list_with_report().await.unwrap();
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.evicted, 0);
        assert!(listing.warnings.is_empty());
        assert_eq!(store.inner.keys_with_prefix(QUEUE_ITEM_PREFIX).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_garbage_index_is_rebuilt_with_warning() {
        let (kv, queue) = queue();
        let a = queue.enqueue("i1", SyncOperation::Complete, json!({})).await.unwrap();
        kv.set(QUEUE_INDEX_KEY, "{oops").await.unwrap();

        let listing = queue.list_with_report().await.unwrap();
        assert_eq!(listing.items[0].id, a.id);
        assert_eq!(
            listing.warnings,
            vec![StoreWarning::QueueIndexRebuilt { recovered: 1 }]
        );
    }

    #[tokio::test]
    async fn test_older_legacy_shape_is_mapped() {
        let (kv, queue) = queue();
        let legacy = json!([
            {"interview_id": "i3", "type": "abandon", "timestamp": 1_700_000_000_000i64, "retryCount": 2},
            {"interviewId": "i4", "action": "COMPLETED", "data": {"surveyId": "s1"}},
            {"what": "is this"}
        ]);
        kv.set(LEGACY_QUEUE_KEY, &legacy.to_string()).await.unwrap();

        let listing = queue.list_with_report().await.unwrap();
        assert_eq!(listing.items.len(), 2);
        assert_eq!(listing.items[0].interview_id, "i3");
        assert_eq!(listing.items[0].operation, SyncOperation::Abandon);
        assert_eq!(listing.items[0].attempts, 2);
        assert_eq!(listing.items[0].created_at.timestamp(), 1_700_000_000);
        assert_eq!(listing.items[1].operation, SyncOperation::Complete);
        assert_eq!(listing.items[1].payload["surveyId"], "s1");

        let [StoreWarning::LegacyQueueSetAside { items: 1, key }] = listing.warnings.as_slice() else {
            panic!("expected a set-aside warning, got {:?}", listing.warnings);
        };
        let kept: Value = serde_json::from_str(&kv.get(key).await.unwrap().unwrap()).unwrap();
        assert_eq!(kept, json!([{"what": "is this"}]));
        assert!(kv.get(LEGACY_QUEUE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unparseable_legacy_queue_is_set_aside() {
        let (kv, queue) = queue();
        kv.set(LEGACY_QUEUE_KEY, "[{\"interviewId\": \"i1\",").await.unwrap();

        let listing = queue.list_with_report().await.unwrap();
        assert!(listing.items.is_empty());
        let [StoreWarning::LegacyQueueSetAside { key, .. }] = listing.warnings.as_slice() else {
            panic!("expected a set-aside warning, got {:?}", listing.warnings);
        };
        assert_eq!(
            kv.get(key).await.unwrap().as_deref(),
            Some("[{\"interviewId\": \"i1\",")
        );
    }

    #[tokio::test]
    async fn test_rebuild_from_interviews() {
        let kv = Arc::new(MemoryStore::new());
        let interviews = InterviewStore::new(kv.clone(), InterviewLimits::default());
        let queue = SyncQueue::new(kv);

        let mut done = OfflineInterview::new("s1", InterviewMode::Capi);
        done.complete();
        let draft = OfflineInterview::new("s1", InterviewMode::Capi);
        interviews.save(&done).await.unwrap();
        interviews.save(&draft).await.unwrap();

        assert_eq!(queue.rebuild_from(&interviews).await.unwrap(), 1);
        assert_eq!(queue.rebuild_from(&interviews).await.unwrap(), 0);

        let item = queue.next().await.unwrap().unwrap();
        assert_eq!(item.interview_id, done.id);
        assert_eq!(item.operation, SyncOperation::Complete);

        assert_eq!(queue.remove_for_interview(&done.id).await.unwrap(), 1);
        assert!(queue.is_empty().await.unwrap());
    }
}
