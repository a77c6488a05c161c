//! End-to-end behaviour of the offline cache over the SQLite store

use serde_json::json;
use std::sync::Arc;

use fieldsync::config::Settings;
use fieldsync::error::{FailureKind, StoreError};
use fieldsync::models::{
    AcMetadata, InterviewMode, InterviewResponse, InterviewStatus, OfflineInterview, PollingGroups,
    Survey, SyncOperation,
};
use fieldsync::storage::{KeyValueStore, SqliteStore};
use fieldsync::OfflineCache;

async fn sqlite_cache(settings: &Settings) -> (Arc<SqliteStore>, OfflineCache) {
    let store = Arc::new(
        SqliteStore::open_memory(settings.storage.max_value_bytes)
            .await
            .unwrap(),
    );
    let cache = OfflineCache::with_store(store.clone(), settings);
    (store, cache)
}

fn completed_interview(survey_id: &str) -> OfflineInterview {
    let mut interview = OfflineInterview::new(survey_id, InterviewMode::Capi);
    interview.responses.push(InterviewResponse {
        question_id: "q1".to_string(),
        question_text: Some("Do you live here?".to_string()),
        response: json!("yes"),
        answered_at: None,
    });
    interview.complete();
    interview
}

#[tokio::test]
async fn test_capture_queue_and_sync_lifecycle() {
    let (_, cache) = sqlite_cache(&Settings::default()).await;
    cache
        .ancillary
        .save_surveys(&[Survey {
            id: "survey-1".to_string(),
            survey_name: Some("Household panel".to_string()),
            ..Default::default()
        }])
        .await
        .unwrap();

    let mut interview = completed_interview("survey-1");
    interview.survey = Some(json!({ "questions": ["q1"] }));
    let receipt = cache.interviews.save(&interview).await.unwrap();
    assert!(receipt.warning.is_none());
    let item = cache.queue.enqueue_interview(&interview).await.unwrap();
    assert_eq!(item.operation, SyncOperation::Complete);

    let pending = cache.interviews.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].survey.is_none());

    // The uploader joins the survey back in
    let hydrated = cache
        .interviews
        .hydrate_for_sync(&interview.id, &cache.ancillary)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hydrated.survey.unwrap()["id"], "survey-1");

    cache
        .interviews
        .update_status(&interview.id, InterviewStatus::Syncing, None)
        .await
        .unwrap();
    let failed = cache
        .interviews
        .update_status(&interview.id, InterviewStatus::Failed, Some("HTTP 502"))
        .await
        .unwrap();
    assert_eq!(failed.sync_attempts, 1);
    cache.queue.mark_failed(&item.id, "HTTP 502").await.unwrap();
    assert_eq!(cache.interviews.list_pending().await.unwrap().len(), 1);

    cache
        .interviews
        .update_status(&interview.id, InterviewStatus::Syncing, None)
        .await
        .unwrap();
    let synced = cache
        .interviews
        .update_status(&interview.id, InterviewStatus::Synced, None)
        .await
        .unwrap();
    assert!(synced.error.is_none());
    assert!(cache.queue.mark_succeeded(&item.id).await.unwrap());
    assert!(cache.queue.is_empty().await.unwrap());
    assert!(cache.interviews.list_pending().await.unwrap().is_empty());

    let err = cache
        .interviews
        .update_status(&interview.id, InterviewStatus::Pending, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::InvalidTransition { .. })
    ));
    assert_eq!(FailureKind::classify(&err), FailureKind::Rejected);
}

#[tokio::test]
async fn test_oversized_interview_is_refused_and_nothing_is_written() {
    let mut settings = Settings::default();
    settings.interviews.max_record_bytes = 1_000;
    let (store, cache) = sqlite_cache(&settings).await;

    let mut interview = completed_interview("survey-1");
    interview
        .metadata
        .insert("notes".to_string(), json!("x".repeat(2_000)));

    let err = cache.interviews.save(&interview).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::RecordTooLarge { limit: 1_000, .. })
    ));
    assert_eq!(FailureKind::classify(&err), FailureKind::DataAtRisk);
    assert!(store.keys_with_prefix("interviews:").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_listing_repairs_damaged_store() {
    let (store, cache) = sqlite_cache(&Settings::default()).await;

    let good = completed_interview("survey-1");
    cache.interviews.save(&good).await.unwrap();

    // A record written without a manifest entry, a garbage record, and the
    // legacy single-array collection
    let orphan = completed_interview("survey-2");
    store
        .set(
            &format!("interviews:record:{}", orphan.id),
            &serde_json::to_string(&orphan).unwrap(),
        )
        .await
        .unwrap();
    store.set("interviews:record:broken", "{not json").await.unwrap();
    let legacy = completed_interview("survey-3");
    store
        .set(
            "offline_interviews",
            &serde_json::to_string(&vec![serde_json::to_value(&legacy).unwrap(), json!({ "noId": true })])
                .unwrap(),
        )
        .await
        .unwrap();

    let listing = cache.interviews.list_all_with_report().await.unwrap();
    let mut ids: Vec<&str> = listing.interviews.iter().map(|i| i.id.as_str()).collect();
    ids.sort();
    let mut expected = vec![good.id.as_str(), orphan.id.as_str(), legacy.id.as_str()];
    expected.sort();
    assert_eq!(ids, expected);

    assert_eq!(listing.report.imported, 1);
    assert_eq!(listing.report.reindexed, 2);
    assert_eq!(listing.report.dropped.len(), 2);
    assert!(store.get("offline_interviews").await.unwrap().is_none());
    assert!(store.get("interviews:record:broken").await.unwrap().is_none());

    // Second pass finds nothing left to fix
    let again = cache.interviews.list_all_with_report().await.unwrap();
    assert!(again.report.is_clean(), "{:?}", again.report);
    assert_eq!(again.interviews.len(), 3);

    // The queue can be rebuilt from what survived
    assert_eq!(cache.queue.rebuild_from(&cache.interviews).await.unwrap(), 3);
}

#[tokio::test]
async fn test_reference_fallback_over_sqlite() {
    let (_, cache) = sqlite_cache(&Settings::default()).await;

    cache
        .reference
        .save_groups_for_ac(
            "West Bengal",
            "3",
            PollingGroups {
                ac: AcMetadata {
                    ac_name: "COOCHBEHAR UTTAR (SC)".to_string(),
                    ac_no: Some(3),
                    ..Default::default()
                },
                groups: vec!["Group 1".to_string()],
            },
        )
        .await
        .unwrap();

    let hit = cache
        .reference
        .get_groups_for_ac("West Bengal", "Cooch Behar North")
        .await
        .expect("alias resolves to the numbered entry");
    assert_eq!(hit.data.ac.ac_no, Some(3));
    assert!(cache.reference.get_groups_for_ac("Assam", "Cooch Behar North").await.is_none());

    assert_eq!(cache.reference.clear_all().await.unwrap(), 1);
    assert!(cache.reference.get_groups_for_ac("West Bengal", "3").await.is_none());
}

#[tokio::test]
async fn test_data_survives_reopening_the_database_file() {
    let path = std::env::temp_dir()
        .join(format!("fieldsync-test-{}", uuid::Uuid::new_v4()))
        .join("offline.db");
    let mut settings = Settings::default();
    settings.storage.database_path = Some(path.clone());

    let interview = completed_interview("survey-1");
    {
        let cache = OfflineCache::open(&settings).await.unwrap();
        cache.interviews.save(&interview).await.unwrap();
        cache.queue.enqueue_interview(&interview).await.unwrap();
    }

    let cache = OfflineCache::open(&settings).await.unwrap();
    let stored = cache.interviews.get_by_id(&interview.id).await.unwrap().unwrap();
    assert_eq!(stored.responses.len(), 1);
    assert_eq!(cache.queue.len().await.unwrap(), 1);

    drop(cache);
    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}
