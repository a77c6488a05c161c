//! Surveys, quotas, CATI set numbers, user snapshot and sync timestamps

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::models::{CurrentUser, Survey};
use crate::storage::{KeyValueStore, get_json, set_json};

pub const SURVEYS_KEY: &str = "surveys";
pub const GENDER_QUOTAS_PREFIX: &str = "gender_quotas:";
pub const CATI_SET_NUMBER_PREFIX: &str = "cati_set_number:";
pub const CURRENT_USER_KEY: &str = "current_user";
pub const LAST_SYNC_KEY: &str = "last_sync_time";
pub const LAST_DOWNLOAD_KEY: &str = "last_download_time";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub survey_id: String,
    pub quotas: Value,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatiSetNumber {
    pub survey_id: String,
    pub set_number: Option<i64>,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub user: CurrentUser,
    pub cached_at: DateTime<Utc>,
}

pub struct AncillaryCache {
    store: Arc<dyn KeyValueStore>,
}

impl AncillaryCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Replace the downloaded survey set
    pub async fn save_surveys(&self, surveys: &[Survey]) -> Result<()> {
        set_json(self.store.as_ref(), SURVEYS_KEY, surveys)
            .await
            .context("Failed to save surveys")?;
        log::info!("Saved {} surveys", surveys.len());
        Ok(())
    }

    pub async fn get_surveys(&self) -> Result<Vec<Survey>> {
        Ok(get_json(self.store.as_ref(), SURVEYS_KEY)
            .await
            .context("Failed to load surveys")?
            .unwrap_or_default())
    }

    pub async fn get_survey(&self, survey_id: &str) -> Result<Option<Survey>> {
        Ok(self
            .get_surveys()
            .await?
            .into_iter()
            .find(|s| s.id == survey_id))
    }

    pub async fn save_gender_quotas(&self, survey_id: &str, quotas: Value) -> Result<()> {
        let snapshot = QuotaSnapshot {
            survey_id: survey_id.to_string(),
            quotas,
            cached_at: Utc::now(),
        };
        set_json(
            self.store.as_ref(),
            &format!("{}{}", GENDER_QUOTAS_PREFIX, survey_id),
            &snapshot,
        )
        .await?;
        Ok(())
    }

    pub async fn get_gender_quotas(&self, survey_id: &str) -> Result<Option<QuotaSnapshot>> {
        get_json(
            self.store.as_ref(),
            &format!("{}{}", GENDER_QUOTAS_PREFIX, survey_id),
        )
        .await
    }

    pub async fn save_cati_set_number(&self, survey_id: &str, set_number: Option<i64>) -> Result<()> {
        let entry = CatiSetNumber {
            survey_id: survey_id.to_string(),
            set_number,
            cached_at: Utc::now(),
        };
        set_json(
            self.store.as_ref(),
            &format!("{}{}", CATI_SET_NUMBER_PREFIX, survey_id),
            &entry,
        )
        .await?;
        Ok(())
    }

    pub async fn get_cati_set_number(&self, survey_id: &str) -> Result<Option<CatiSetNumber>> {
        get_json(
            self.store.as_ref(),
            &format!("{}{}", CATI_SET_NUMBER_PREFIX, survey_id),
        )
        .await
    }

    pub async fn save_current_user(&self, user: &CurrentUser) -> Result<()> {
        let snapshot = UserSnapshot {
            user: user.clone(),
            cached_at: Utc::now(),
        };
        set_json(self.store.as_ref(), CURRENT_USER_KEY, &snapshot).await?;
        Ok(())
    }

    pub async fn get_current_user(&self) -> Result<Option<UserSnapshot>> {
        get_json(self.store.as_ref(), CURRENT_USER_KEY).await
    }

    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
        set_json(self.store.as_ref(), LAST_SYNC_KEY, &at).await?;
        Ok(())
    }

    pub async fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        get_json(self.store.as_ref(), LAST_SYNC_KEY).await
    }

    pub async fn set_last_download_time(&self, at: DateTime<Utc>) -> Result<()> {
        set_json(self.store.as_ref(), LAST_DOWNLOAD_KEY, &at).await?;
        Ok(())
    }

    pub async fn get_last_download_time(&self) -> Result<Option<DateTime<Utc>>> {
        get_json(self.store.as_ref(), LAST_DOWNLOAD_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn survey(id: &str) -> Survey {
        Survey {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_surveys_are_superseded() {
        let cache = AncillaryCache::new(Arc::new(MemoryStore::new()));

        cache.save_surveys(&[survey("a"), survey("b")]).await.unwrap();
        cache.save_surveys(&[survey("c")]).await.unwrap();

        let ids: Vec<String> = cache
            .get_surveys()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["c"]);
        assert!(cache.get_survey("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_per_survey_entries() {
        let cache = AncillaryCache::new(Arc::new(MemoryStore::new()));

        cache
            .save_gender_quotas("s1", json!({"male": 10, "female": 12}))
            .await
            .unwrap();
        cache.save_cati_set_number("s1", Some(4)).await.unwrap();

        let quotas = cache.get_gender_quotas("s1").await.unwrap().unwrap();
        assert_eq!(quotas.quotas["female"], 12);
        assert_eq!(
            cache.get_cati_set_number("s1").await.unwrap().unwrap().set_number,
            Some(4)
        );
        assert!(cache.get_gender_quotas("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timestamps_and_user() {
        let cache = AncillaryCache::new(Arc::new(MemoryStore::new()));
        assert!(cache.get_last_download_time().await.unwrap().is_none());

        let now = Utc::now();
        cache.set_last_download_time(now).await.unwrap();
        cache.set_last_sync_time(now).await.unwrap();
        assert_eq!(cache.get_last_download_time().await.unwrap(), Some(now));
        assert_eq!(cache.get_last_sync_time().await.unwrap(), Some(now));

        let user = CurrentUser {
            id: "u1".to_string(),
            location_control_booster: true,
            ..Default::default()
        };
        cache.save_current_user(&user).await.unwrap();
        assert_eq!(cache.get_current_user().await.unwrap().unwrap().user, user);
    }
}
