//! The assembled offline cache
//!
//! [`OfflineCache`] builds every repository over one shared store. Nothing in
//! the crate reaches for a global: callers own the cache and hand its parts
//! (or the whole) to whoever needs them.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::api::remote::RemoteDataSource;
use crate::config::Settings;
use crate::provisioning::Provisioner;
use crate::reference::BundledReferenceData;
use crate::repository::{AncillaryCache, InterviewStore, ReferenceCache, SyncQueue};
use crate::storage::{KeyValueStore, SqliteStore};

pub struct OfflineCache {
    pub store: Arc<dyn KeyValueStore>,
    pub interviews: Arc<InterviewStore>,
    pub queue: Arc<SyncQueue>,
    pub reference: Arc<ReferenceCache>,
    pub ancillary: Arc<AncillaryCache>,
    pub bundled: Arc<BundledReferenceData>,
    settings: Settings,
}

impl OfflineCache {
    /// Open the on-disk database named by `settings`
    pub async fn open(settings: &Settings) -> Result<Self> {
        let path = settings.database_path()?;
        log::info!("Opening offline store at {}", path.display());
        let store = SqliteStore::open(&path, settings.storage.max_value_bytes)
            .await
            .with_context(|| format!("Failed to open offline store at {}", path.display()))?;
        Ok(Self::with_store(Arc::new(store), settings))
    }

    /// Build the cache over an existing store
    pub fn with_store(store: Arc<dyn KeyValueStore>, settings: &Settings) -> Self {
        let bundled = match &settings.reference.dataset_dir {
            Some(dir) => BundledReferenceData::from_dir(dir.clone()),
            None => BundledReferenceData::embedded(),
        };
        Self::with_parts(store, Arc::new(bundled), settings)
    }

    pub fn with_parts(
        store: Arc<dyn KeyValueStore>,
        bundled: Arc<BundledReferenceData>,
        settings: &Settings,
    ) -> Self {
        Self {
            interviews: Arc::new(InterviewStore::new(
                store.clone(),
                settings.interviews.limits(),
            )),
            queue: Arc::new(SyncQueue::new(store.clone())),
            reference: Arc::new(ReferenceCache::new(
                store.clone(),
                settings.reference.floors(),
            )),
            ancillary: Arc::new(AncillaryCache::new(store.clone())),
            bundled,
            store,
            settings: settings.clone(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// A provisioner sharing this cache's repositories
    pub fn provisioner(&self, remote: Arc<dyn RemoteDataSource>) -> Provisioner {
        Provisioner::new(
            remote,
            self.bundled.clone(),
            self.reference.clone(),
            self.ancillary.clone(),
            &self.settings,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InterviewMode, OfflineInterview};
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_repositories_share_one_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = OfflineCache::with_store(store.clone(), &Settings::default());

        let mut interview = OfflineInterview::new("survey-1", InterviewMode::Capi);
        interview.complete();
        cache.interviews.save(&interview).await.unwrap();
        cache.queue.enqueue_interview(&interview).await.unwrap();

        let reopened = OfflineCache::with_store(store, &Settings::default());
        assert_eq!(reopened.interviews.list_all().await.unwrap().len(), 1);
        assert_eq!(reopened.queue.len().await.unwrap(), 1);
    }
}
