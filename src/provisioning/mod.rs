//! Bulk provisioning for offline use
//!
//! Given the surveys assigned to the signed-in interviewer, [`Provisioner`]
//! warms the reference cache from the bundled geography and fetches the few
//! things that are not bundled (AC representative data, gender quotas, CATI
//! set numbers, the user profile). Every step is best-effort: failures are
//! collected in the [`ProvisioningReport`] and the run carries on. Only a
//! failure to store the surveys themselves aborts a run.

use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::remote::{RemoteDataSource, RemoteResponse};
use crate::api::resilience::RetryPolicy;
use crate::config::{ProvisioningSettings, Settings};
use crate::models::{AcRecord, PollingGps, PollingGroups, PollingStations, Survey};
use crate::reference::BundledReferenceData;
use crate::reference::matching::normalize_basic;
use crate::repository::{AncillaryCache, ReferenceCache};

/// ACs and states covered by a set of surveys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentScope {
    /// `(state, ac)` pairs in first-seen order
    pub acs: Vec<(String, String)>,
    pub states: Vec<String>,
}

impl AssignmentScope {
    pub fn from_surveys(surveys: &[Survey], default_state: &str) -> Self {
        let mut scope = Self::default();

        for survey in surveys {
            let survey_state = survey
                .ac_assignment_state
                .as_deref()
                .filter(|s| !s.trim().is_empty());

            for assignment in survey.assignments() {
                let state = assignment
                    .selected_state
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .or(survey_state)
                    .unwrap_or(default_state);
                scope.add_state(state);
                for ac in &assignment.assigned_acs {
                    scope.add_ac(state, ac);
                }
            }

            let state = survey_state.unwrap_or(default_state);
            if survey_state.is_some() || !survey.assigned_acs.is_empty() {
                scope.add_state(state);
            }
            for ac in &survey.assigned_acs {
                scope.add_ac(state, ac);
            }
        }

        if scope.states.is_empty() {
            scope.add_state(default_state);
        }
        scope
    }

    fn add_state(&mut self, state: &str) {
        let state = state.trim();
        if !self.states.iter().any(|s| normalize_basic(s) == normalize_basic(state)) {
            self.states.push(state.to_string());
        }
    }

    fn add_ac(&mut self, state: &str, ac: &str) {
        let (state, ac) = (state.trim(), ac.trim());
        if ac.is_empty() {
            return;
        }
        let exists = self.acs.iter().any(|(s, a)| {
            normalize_basic(s) == normalize_basic(state) && normalize_basic(a) == normalize_basic(ac)
        });
        if !exists {
            self.acs.push((state.to_string(), ac.to_string()));
        }
    }

    /// No AC restriction: the interviewer may work anywhere in the states
    pub fn is_unrestricted(&self) -> bool {
        self.acs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningFailure {
    pub step: &'static str,
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningReport {
    pub states: Vec<String>,
    pub assigned_acs: usize,
    pub acs_warmed: usize,
    pub groups_cached: usize,
    pub stations_cached: usize,
    pub gps_cached: usize,
    /// ACs absent from the bundled geography
    pub missing_acs: Vec<String>,
    pub remote_fallbacks: usize,
    pub ac_lists_cached: Vec<String>,
    /// States whose bundled AC list is below the completeness floor
    pub ac_lists_skipped: Vec<String>,
    pub ac_data_cached: usize,
    pub quotas_cached: usize,
    pub set_numbers_cached: usize,
    pub user_refreshed: bool,
    pub location_control_booster: Option<bool>,
    pub failures: Vec<ProvisioningFailure>,
}

impl ProvisioningReport {
    fn fail(&mut self, step: &'static str, target: impl Into<String>, error: &anyhow::Error) {
        let target = target.into();
        log::warn!("Provisioning {} for {} failed: {:#}", step, target, error);
        self.failures.push(ProvisioningFailure {
            step,
            target,
            message: format!("{:#}", error),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    Completed(ProvisioningReport),
    /// Another run was in flight; nothing was done
    AlreadyRunning,
    Aborted {
        error: String,
        report: ProvisioningReport,
    },
}

/// Clears the busy flag when the run ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn fetch_remote<T, F, Fut>(retry: &RetryPolicy, label: &str, call: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<RemoteResponse<T>>>,
{
    let call = &call;
    retry
        .execute(label, move || async move { call().await?.into_result(label) })
        .await
}

/// [`fetch_remote`] for calls whose successful answer may carry no data
async fn fetch_remote_optional<T, F, Fut>(retry: &RetryPolicy, label: &str, call: F) -> Result<Option<T>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<RemoteResponse<T>>>,
{
    let call = &call;
    retry
        .execute(label, move || async move {
            call().await?.into_optional_result(label)
        })
        .await
}

pub struct Provisioner {
    remote: Arc<dyn RemoteDataSource>,
    bundled: Arc<BundledReferenceData>,
    reference: Arc<ReferenceCache>,
    ancillary: Arc<AncillaryCache>,
    settings: ProvisioningSettings,
    default_state: String,
    retry: RetryPolicy,
    busy: AtomicBool,
}

impl Provisioner {
    pub fn new(
        remote: Arc<dyn RemoteDataSource>,
        bundled: Arc<BundledReferenceData>,
        reference: Arc<ReferenceCache>,
        ancillary: Arc<AncillaryCache>,
        settings: &Settings,
    ) -> Self {
        Self {
            remote,
            bundled,
            reference,
            ancillary,
            settings: settings.provisioning.clone(),
            default_state: settings.reference.default_state.clone(),
            retry: RetryPolicy::new(settings.provisioning.retry.retry_config()),
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Provision caches for `surveys`; a call made while another is running is a no-op
    pub async fn run(&self, surveys: &[Survey]) -> ProvisioningOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            log::info!("Provisioning already in progress, ignoring request");
            return ProvisioningOutcome::AlreadyRunning;
        };

        let mut report = ProvisioningReport::default();
        match self.provision(surveys, &mut report).await {
            Ok(()) => {
                log::info!(
                    "Provisioning finished: {} ACs warmed, {} failures",
                    report.acs_warmed,
                    report.failures.len()
                );
                ProvisioningOutcome::Completed(report)
            }
            Err(e) => {
                log::error!("Provisioning aborted: {:#}", e);
                ProvisioningOutcome::Aborted {
                    error: format!("{:#}", e),
                    report,
                }
            }
        }
    }

    async fn provision(&self, surveys: &[Survey], report: &mut ProvisioningReport) -> Result<()> {
        self.ancillary.save_surveys(surveys).await?;

        let scope = AssignmentScope::from_surveys(surveys, &self.default_state);
        report.states = scope.states.clone();
        report.assigned_acs = scope.acs.len();
        log::info!(
            "Provisioning {} surveys: {} assigned ACs across {} states",
            surveys.len(),
            scope.acs.len(),
            scope.states.len()
        );

        if scope.is_unrestricted() {
            for state in &scope.states {
                self.warm_unrestricted(state, report).await;
            }
        } else {
            for (state, ac) in &scope.acs {
                self.warm_ac(state, ac, None, report).await;
            }
        }

        for state in &scope.states {
            self.cache_ac_list(state, report).await;
        }

        for (state, ac) in &scope.acs {
            self.cache_ac_data(state, ac, report).await;
        }

        for survey in surveys {
            self.cache_survey_extras(survey, report).await;
        }

        self.refresh_user(report).await;

        if let Err(e) = self.ancillary.set_last_download_time(Utc::now()).await {
            report.fail("last_download_time", "-", &e);
        }
        Ok(())
    }

    /// Warm the first ACs of a state's bundled list, pausing between batches
    async fn warm_unrestricted(&self, state: &str, report: &mut ProvisioningReport) {
        let acs = self.bundled.get_all_acs_for_state(state).await;
        let total = acs.len().min(self.settings.unrestricted_ac_limit);
        log::info!("No AC restriction: warming {} of {} ACs in {}", total, acs.len(), state);

        let batch_size = self.settings.batch_size.max(1);
        for (i, ac) in acs.iter().take(total).enumerate() {
            self.warm_ac(state, &ac.ac_name, Some(self.settings.groups_per_ac_limit), report)
                .await;

            let done = i + 1;
            if done % batch_size == 0 && done < total && !self.settings.batch_delay().is_zero() {
                log::debug!("Warmed {}/{} ACs, pausing", done, total);
                tokio::time::sleep(self.settings.batch_delay()).await;
            }
        }
    }

    async fn warm_ac(
        &self,
        state: &str,
        ac: &str,
        group_limit: Option<usize>,
        report: &mut ProvisioningReport,
    ) {
        match self.bundled.get_groups_for_ac(state, ac).await {
            Some(record) => {
                if let Err(e) = self.cache_record(state, &record, group_limit, report).await {
                    report.fail("warm_ac", format!("{}::{}", state, ac), &e);
                } else {
                    report.acs_warmed += 1;
                }
            }
            None => {
                log::warn!("AC '{}' ({}) is not in the bundled data", ac, state);
                report.missing_acs.push(ac.to_string());
                if self.settings.remote_reference_fallback {
                    if let Err(e) = self.fetch_geography(state, ac, report).await {
                        report.fail("remote_geography", format!("{}::{}", state, ac), &e);
                    }
                }
            }
        }
    }

    async fn cache_record(
        &self,
        state: &str,
        record: &AcRecord,
        group_limit: Option<usize>,
        report: &mut ProvisioningReport,
    ) -> Result<()> {
        let groups = PollingGroups {
            ac: record.metadata(),
            groups: record.group_names(),
        };
        self.reference
            .save_groups_for_ac(state, &record.id, groups)
            .await?;

        let limit = group_limit.unwrap_or(usize::MAX);
        for group in record.groups.iter().take(limit) {
            let stations = PollingStations {
                ac_name: Some(record.ac_name.clone()),
                group: group.name.clone(),
                stations: group.stations.clone(),
            };
            self.reference
                .save_stations_for_group(state, &record.id, &group.name, stations)
                .await?;
            report.groups_cached += 1;
            report.stations_cached += group.stations.len();

            for station in &group.stations {
                let (Some(latitude), Some(longitude)) = (station.latitude, station.longitude) else {
                    continue;
                };
                let station_id = station
                    .number
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| station.name.clone());
                self.reference
                    .save_polling_gps(
                        state,
                        &record.id,
                        &group.name,
                        &station_id,
                        PollingGps {
                            latitude,
                            longitude,
                        },
                    )
                    .await?;
                report.gps_cached += 1;
            }
        }
        Ok(())
    }

    /// Remote geography for an AC the bundled data does not know
    async fn fetch_geography(
        &self,
        state: &str,
        ac: &str,
        report: &mut ProvisioningReport,
    ) -> Result<()> {
        let remote = self.remote.as_ref();
        let groups = fetch_remote(&self.retry, "fetch groups", move || {
            remote.fetch_groups_by_ac(state, ac)
        })
        .await?;

        let names: Vec<String> = groups
            .groups
            .iter()
            .take(self.settings.groups_per_ac_limit)
            .cloned()
            .collect();
        let ac_name = groups.ac.ac_name.clone();
        self.reference.save_groups_for_ac(state, ac, groups).await?;
        report.remote_fallbacks += 1;

        for group in &names {
            let group = group.as_str();
            match fetch_remote(&self.retry, "fetch stations", move || {
                remote.fetch_stations_by_group(state, ac, group)
            })
            .await
            {
                Ok(mut stations) => {
                    if stations.ac_name.is_none() && !ac_name.is_empty() {
                        stations.ac_name = Some(ac_name.clone());
                    }
                    report.stations_cached += stations.stations.len();
                    self.reference
                        .save_stations_for_group(state, ac, group, stations)
                        .await?;
                    report.groups_cached += 1;
                }
                Err(e) => report.fail("remote_stations", format!("{}::{}::{}", state, ac, group), &e),
            }
        }
        Ok(())
    }

    /// Store the state's AC list if the bundled copy meets the completeness floor
    async fn cache_ac_list(&self, state: &str, report: &mut ProvisioningReport) {
        let acs = self.bundled.get_all_acs_for_state(state).await;
        let floor = self.reference.floor_for(state);
        if acs.len() < floor {
            log::info!(
                "Bundled AC list for {} has {} entries (floor {}), not caching",
                state,
                acs.len(),
                floor
            );
            report.ac_lists_skipped.push(state.to_string());
            return;
        }

        match self.reference.save_all_acs_for_state(state, acs).await {
            Ok(verification) if verification.verified() => {
                report.ac_lists_cached.push(state.to_string())
            }
            Ok(verification) => report.fail(
                "ac_list",
                state,
                &anyhow::anyhow!(
                    "read-back mismatch: wrote {}, read {}",
                    verification.expected,
                    verification.stored
                ),
            ),
            Err(e) => report.fail("ac_list", state, &e),
        }
    }

    async fn cache_ac_data(&self, state: &str, ac: &str, report: &mut ProvisioningReport) {
        let name = match self.bundled.get_groups_for_ac(state, ac).await {
            Some(record) => record.ac_name,
            None => ac.to_string(),
        };

        let remote = self.remote.as_ref();
        let lookup = name.as_str();
        let result = fetch_remote(&self.retry, "fetch AC data", move || {
            remote.fetch_ac_data(lookup)
        })
        .await;

        match result {
            Ok(data) => match self.reference.save_ac_data(&name, data).await {
                Ok(()) => report.ac_data_cached += 1,
                Err(e) => report.fail("ac_data", name, &e),
            },
            Err(e) => report.fail("ac_data", name, &e),
        }
    }

    async fn cache_survey_extras(&self, survey: &Survey, report: &mut ProvisioningReport) {
        let remote = self.remote.as_ref();
        let survey_id = survey.id.as_str();

        let quotas = fetch_remote(&self.retry, "fetch gender quotas", move || {
            remote.fetch_gender_quota_counts(survey_id)
        })
        .await;
        match quotas {
            Ok(quotas) => match self.ancillary.save_gender_quotas(survey_id, quotas).await {
                Ok(()) => report.quotas_cached += 1,
                Err(e) => report.fail("gender_quotas", survey_id, &e),
            },
            Err(e) => report.fail("gender_quotas", survey_id, &e),
        }

        let set_number = fetch_remote_optional(&self.retry, "fetch CATI set number", move || {
            remote.fetch_last_cati_set_number(survey_id)
        })
        .await;
        match set_number {
            Ok(set_number) => match self.ancillary.save_cati_set_number(survey_id, set_number).await {
                Ok(()) => report.set_numbers_cached += 1,
                Err(e) => report.fail("cati_set_number", survey_id, &e),
            },
            Err(e) => report.fail("cati_set_number", survey_id, &e),
        }
    }

    /// Always force-refreshed: the booster flag must reflect the server
    async fn refresh_user(&self, report: &mut ProvisioningReport) {
        let remote = self.remote.as_ref();
        let user = fetch_remote(&self.retry, "fetch current user", move || {
            remote.fetch_current_user(true)
        })
        .await;

        match user {
            Ok(user) => match self.ancillary.save_current_user(&user).await {
                Ok(()) => {
                    report.user_refreshed = true;
                    report.location_control_booster = Some(user.location_control_booster);
                }
                Err(e) => report.fail("current_user", user.id.clone(), &e),
            },
            Err(e) => report.fail("current_user", "-", &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InterviewerAssignment;

    fn assignment(state: Option<&str>, acs: &[&str]) -> InterviewerAssignment {
        InterviewerAssignment {
            assigned_acs: acs.iter().map(|s| s.to_string()).collect(),
            selected_state: state.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_scope_unions_all_assignment_shapes() {
        let surveys = vec![
            Survey {
                id: "s1".to_string(),
                assigned_interviewers: vec![assignment(None, &["Dinhata", "Sitai"])],
                cati_interviewers: vec![assignment(Some("Assam"), &["Dhubri"])],
                ..Default::default()
            },
            Survey {
                id: "s2".to_string(),
                ac_assignment_state: Some("West Bengal".to_string()),
                assigned_acs: vec!["dinhata".to_string(), "Natabari".to_string()],
                capi_interviewers: vec![assignment(None, &["Sitai"])],
                ..Default::default()
            },
        ];

        let scope = AssignmentScope::from_surveys(&surveys, "West Bengal");
        assert_eq!(scope.states, vec!["West Bengal", "Assam"]);
        let acs: Vec<&str> = scope.acs.iter().map(|(_, ac)| ac.as_str()).collect();
        assert_eq!(acs, vec!["Dinhata", "Sitai", "Dhubri", "Natabari"]);
        assert_eq!(scope.acs[2].0, "Assam");
    }

    #[test]
    fn test_scope_defaults_state() {
        let scope = AssignmentScope::from_surveys(&[], "West Bengal");
        assert!(scope.is_unrestricted());
        assert_eq!(scope.states, vec!["West Bengal"]);
    }

    #[test]
    fn test_busy_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = BusyGuard::acquire(&flag).unwrap();
            assert!(BusyGuard::acquire(&flag).is_none());
        }
        assert!(BusyGuard::acquire(&flag).is_some());
    }
}
