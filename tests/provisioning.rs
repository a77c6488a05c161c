//! Provisioning against the bundled dataset and a scripted remote

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use fieldsync::OfflineCache;
use fieldsync::api::remote::{RemoteDataSource, RemoteError, RemoteResponse};
use fieldsync::config::Settings;
use fieldsync::models::{
    AcData, AcMetadata, CurrentUser, InterviewerAssignment, PollingGroups, PollingStations,
    Station, Survey,
};
use fieldsync::provisioning::{ProvisioningOutcome, ProvisioningReport};
use fieldsync::storage::MemoryStore;

const WB: &str = "West Bengal";

#[derive(Default)]
struct FakeRemote {
    calls: Mutex<Vec<String>>,
    reject_quotas: bool,
    transient_ac_data: bool,
    set_number: Option<i64>,
    /// Block `fetch_current_user` until `release` is notified
    gated: bool,
    entered: Notify,
    release: Notify,
}

impl FakeRemote {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls_starting_with(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl RemoteDataSource for FakeRemote {
    async fn fetch_ac_data(&self, ac_name: &str) -> Result<RemoteResponse<AcData>> {
        self.record(format!("ac_data:{}", ac_name));
        if self.transient_ac_data {
            return Err(RemoteError::Transient("connection reset".to_string()).into());
        }
        Ok(RemoteResponse::ok(AcData {
            ac_name: ac_name.to_string(),
            mla_name: Some("Sample MLA".to_string()),
            ..Default::default()
        }))
    }

    async fn fetch_groups_by_ac(&self, state: &str, ac: &str) -> Result<RemoteResponse<PollingGroups>> {
        self.record(format!("groups:{}:{}", state, ac));
        Ok(RemoteResponse::ok(PollingGroups {
            ac: AcMetadata {
                ac_name: ac.to_string(),
                ..Default::default()
            },
            groups: vec!["Ward A".to_string(), "Ward B".to_string()],
        }))
    }

    async fn fetch_stations_by_group(
        &self,
        _state: &str,
        ac: &str,
        group: &str,
    ) -> Result<RemoteResponse<PollingStations>> {
        self.record(format!("stations:{}:{}", ac, group));
        Ok(RemoteResponse::ok(PollingStations {
            ac_name: None,
            group: group.to_string(),
            stations: vec![Station {
                number: Some(1),
                name: format!("{} School", group),
                latitude: None,
                longitude: None,
            }],
        }))
    }

    async fn fetch_gender_quota_counts(&self, survey_id: &str) -> Result<RemoteResponse<Value>> {
        self.record(format!("quotas:{}", survey_id));
        if self.reject_quotas {
            return Ok(RemoteResponse::failure("quota service closed"));
        }
        Ok(RemoteResponse::ok(json!({ "male": 10, "female": 12 })))
    }

    async fn fetch_last_cati_set_number(&self, survey_id: &str) -> Result<RemoteResponse<i64>> {
        self.record(format!("set_number:{}", survey_id));
        match self.set_number {
            Some(number) => Ok(RemoteResponse::ok(number)),
            // Nothing assigned yet; the server answers success with null data
            None => Ok(serde_json::from_value(json!({ "success": true, "data": null }))?),
        }
    }

    async fn fetch_current_user(&self, force_refresh: bool) -> Result<RemoteResponse<CurrentUser>> {
        self.record(format!("user:{}", force_refresh));
        if self.gated {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(RemoteResponse::ok(CurrentUser {
            id: "user-1".to_string(),
            location_control_booster: true,
            ..Default::default()
        }))
    }
}

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.provisioning.batch_delay_ms = 0;
    settings.provisioning.retry.base_delay_ms = 1;
    settings.provisioning.retry.max_delay_ms = 5;
    settings.provisioning.retry.jitter = false;
    settings
}

fn survey_with_acs(id: &str, acs: &[&str]) -> Survey {
    Survey {
        id: id.to_string(),
        mode: Some("capi".to_string()),
        assigned_interviewers: vec![InterviewerAssignment {
            assigned_acs: acs.iter().map(|s| s.to_string()).collect(),
            selected_state: Some(WB.to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn completed(outcome: ProvisioningOutcome) -> ProvisioningReport {
    match outcome {
        ProvisioningOutcome::Completed(report) => report,
        other => panic!("expected a completed run, got {:?}", other),
    }
}

#[tokio::test]
async fn test_assigned_acs_are_warmed_from_bundled_data() {
    let cache = OfflineCache::with_store(Arc::new(MemoryStore::new()), &fast_settings());
    let remote = Arc::new(FakeRemote::default());
    let provisioner = cache.provisioner(remote.clone());

    let surveys = vec![survey_with_acs("survey-1", &["Mekliganj"])];
    let report = completed(provisioner.run(&surveys).await);

    assert_eq!(report.assigned_acs, 1);
    assert_eq!(report.acs_warmed, 1);
    assert_eq!(report.groups_cached, 3);
    assert_eq!(report.stations_cached, 9);
    assert_eq!(report.gps_cached, 7);
    assert!(report.failures.is_empty(), "{:?}", report.failures);

    // 36 bundled ACs is below the West Bengal floor of 200
    assert_eq!(report.ac_lists_skipped, vec![WB.to_string()]);
    assert!(cache.reference.get_all_acs_for_state(WB).await.is_empty());

    let stations = cache
        .reference
        .get_stations_for_group(WB, "Mekliganj", "Group 1")
        .await
        .expect("stations cached");
    assert_eq!(stations.data.stations.len(), 4);

    let groups = cache.reference.get_groups_for_ac(WB, "1").await.expect("groups cached");
    assert_eq!(groups.data.groups, vec!["Group 1", "Group 2", "Group 3"]);

    assert_eq!(cache.ancillary.get_surveys().await.unwrap().len(), 1);
    assert!(cache.reference.get_ac_data("MEKLIGANJ (SC)").await.is_some());
    assert_eq!(report.quotas_cached, 1);
    assert_eq!(report.set_numbers_cached, 1);
    let set = cache
        .ancillary
        .get_cati_set_number("survey-1")
        .await
        .unwrap()
        .expect("set number cached");
    assert_eq!(set.set_number, None);

    let user = cache.ancillary.get_current_user().await.unwrap().expect("user cached");
    assert!(user.user.location_control_booster);
    assert_eq!(report.location_control_booster, Some(true));
    assert_eq!(remote.calls_starting_with("user:true"), 1);
    assert!(cache.ancillary.get_last_download_time().await.unwrap().is_some());

    // Bundled data covered everything, no remote geography needed
    assert_eq!(remote.calls_starting_with("groups:"), 0);
}

#[tokio::test]
async fn test_unrestricted_user_gets_bounded_warmup() {
    let mut settings = fast_settings();
    settings.provisioning.unrestricted_ac_limit = 5;
    settings.provisioning.groups_per_ac_limit = 1;
    settings.provisioning.batch_size = 2;
    settings.reference.completeness_floors = BTreeMap::from([(WB.to_string(), 30)]);

    let cache = OfflineCache::with_store(Arc::new(MemoryStore::new()), &settings);
    let provisioner = cache.provisioner(Arc::new(FakeRemote {
        set_number: Some(4),
        ..Default::default()
    }));

    let survey = Survey {
        id: "open-survey".to_string(),
        mode: Some("multi_mode".to_string()),
        ..Default::default()
    };
    let report = completed(provisioner.run(&[survey]).await);

    assert_eq!(report.assigned_acs, 0);
    assert_eq!(report.states, vec![WB.to_string()]);
    assert_eq!(report.acs_warmed, 5);
    assert_eq!(report.groups_cached, 5);
    assert_eq!(report.stations_cached, 4 + 2 + 3 + 4 + 2);
    assert_eq!(report.set_numbers_cached, 1);

    // Group limit applies to stations; the group list itself stays whole
    let groups = cache
        .reference
        .get_groups_for_ac(WB, "Sitalkuchi")
        .await
        .expect("groups cached");
    assert_eq!(groups.data.groups.len(), 3);
    assert!(
        cache
            .reference
            .get_stations_for_group(WB, "5", "Group 2")
            .await
            .is_none()
    );

    // Sixth AC was never warmed
    assert!(cache.reference.get_groups_for_ac(WB, "6").await.is_none());

    assert_eq!(report.ac_lists_cached, vec![WB.to_string()]);
    assert_eq!(cache.reference.get_all_acs_for_state(WB).await.len(), 36);
}

#[tokio::test]
async fn test_concurrent_run_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    let cache = OfflineCache::with_store(store.clone(), &fast_settings());
    let remote = Arc::new(FakeRemote {
        gated: true,
        ..Default::default()
    });
    let provisioner = Arc::new(cache.provisioner(remote.clone()));

    let first = {
        let provisioner = provisioner.clone();
        let surveys = vec![survey_with_acs("survey-1", &["Dinhata"])];
        tokio::spawn(async move { provisioner.run(&surveys).await })
    };

    remote.entered.notified().await;
    assert!(provisioner.is_busy());

    let writes_before = store.write_count();
    let second = provisioner
        .run(&[survey_with_acs("survey-2", &["Sitai"])])
        .await;
    assert_eq!(second, ProvisioningOutcome::AlreadyRunning);
    assert_eq!(store.write_count(), writes_before);

    remote.release.notify_one();
    let report = completed(first.await.unwrap());
    assert_eq!(report.acs_warmed, 1);
    assert!(!provisioner.is_busy());

    // The flag is released, so a new run proceeds
    let opener = {
        let remote = remote.clone();
        tokio::spawn(async move {
            remote.entered.notified().await;
            remote.release.notify_one();
        })
    };
    let again = provisioner.run(&[survey_with_acs("survey-2", &["Sitai"])]).await;
    opener.await.unwrap();
    assert!(matches!(again, ProvisioningOutcome::Completed(_)));
}

#[tokio::test]
async fn test_remote_fallback_is_config_gated() {
    let surveys = vec![survey_with_acs("survey-1", &["Nowhere Town"])];

    let cache = OfflineCache::with_store(Arc::new(MemoryStore::new()), &fast_settings());
    let remote = Arc::new(FakeRemote::default());
    let report = completed(cache.provisioner(remote.clone()).run(&surveys).await);
    assert_eq!(report.missing_acs, vec!["Nowhere Town".to_string()]);
    assert_eq!(report.remote_fallbacks, 0);
    assert_eq!(remote.calls_starting_with("groups:"), 0);

    let mut settings = fast_settings();
    settings.provisioning.remote_reference_fallback = true;
    let cache = OfflineCache::with_store(Arc::new(MemoryStore::new()), &settings);
    let remote = Arc::new(FakeRemote::default());
    let report = completed(cache.provisioner(remote.clone()).run(&surveys).await);

    assert_eq!(report.remote_fallbacks, 1);
    assert_eq!(report.groups_cached, 2);
    assert_eq!(remote.calls_starting_with("stations:Nowhere Town"), 2);

    let stations = cache
        .reference
        .get_stations_for_group(WB, "Nowhere Town", "Ward B")
        .await
        .expect("fallback stations cached");
    assert_eq!(stations.data.stations[0].name, "Ward B School");
    assert_eq!(stations.data.ac_name.as_deref(), Some("Nowhere Town"));
}

#[tokio::test]
async fn test_step_failures_do_not_stop_the_run() {
    let mut settings = fast_settings();
    settings.provisioning.retry.max_attempts = 3;
    let cache = OfflineCache::with_store(Arc::new(MemoryStore::new()), &settings);
    let remote = Arc::new(FakeRemote {
        reject_quotas: true,
        transient_ac_data: true,
        ..Default::default()
    });

    let surveys = vec![survey_with_acs("survey-1", &["Dinhata"])];
    let report = completed(cache.provisioner(remote.clone()).run(&surveys).await);

    let steps: Vec<&str> = report.failures.iter().map(|f| f.step).collect();
    assert_eq!(steps, vec!["ac_data", "gender_quotas"]);

    // Transient failures are retried, refusals are not
    assert_eq!(remote.calls_starting_with("ac_data:"), 3);
    assert_eq!(remote.calls_starting_with("quotas:"), 1);

    assert_eq!(report.acs_warmed, 1);
    assert!(report.user_refreshed);
    assert!(cache.ancillary.get_last_download_time().await.unwrap().is_some());
}

#[tokio::test]
async fn test_survey_write_failure_aborts_and_releases_flag() {
    let store = Arc::new(MemoryStore::with_max_value_bytes(64));
    let cache = OfflineCache::with_store(store, &fast_settings());
    let provisioner = cache.provisioner(Arc::new(FakeRemote::default()));

    let surveys = vec![survey_with_acs(
        "a-survey-with-an-id-long-enough-to-overflow",
        &["Dinhata", "Sitai"],
    )];
    match provisioner.run(&surveys).await {
        ProvisioningOutcome::Aborted { error, report } => {
            assert!(error.contains("Row too big"), "{}", error);
            assert_eq!(report.acs_warmed, 0);
        }
        other => panic!("expected an aborted run, got {:?}", other),
    }
    assert!(!provisioner.is_busy());
}
