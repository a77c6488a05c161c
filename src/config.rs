use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::resilience::RetryConfig;
use crate::repository::{CompletenessFloors, InterviewLimits};
use crate::storage::DEFAULT_MAX_VALUE_BYTES;

const APP_DIR: &str = "fieldsync";
const ENV_PREFIX: &str = "FIELDSYNC_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub interviews: InterviewSettings,
    #[serde(default)]
    pub reference: ReferenceSettings,
    #[serde(default)]
    pub provisioning: ProvisioningSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Defaults to `<data dir>/fieldsync/offline.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_max_value_bytes")]
    pub max_value_bytes: usize,
}

fn default_max_value_bytes() -> usize {
    DEFAULT_MAX_VALUE_BYTES
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            max_value_bytes: default_max_value_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewSettings {
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
    #[serde(default = "default_corrupt_record_bytes")]
    pub corrupt_record_bytes: usize,
    #[serde(default = "default_collection_warn_bytes")]
    pub collection_warn_bytes: usize,
}

fn default_max_record_bytes() -> usize {
    InterviewLimits::default().max_record_bytes
}

fn default_corrupt_record_bytes() -> usize {
    InterviewLimits::default().corrupt_record_bytes
}

fn default_collection_warn_bytes() -> usize {
    InterviewLimits::default().collection_warn_bytes
}

impl Default for InterviewSettings {
    fn default() -> Self {
        Self {
            max_record_bytes: default_max_record_bytes(),
            corrupt_record_bytes: default_corrupt_record_bytes(),
            collection_warn_bytes: default_collection_warn_bytes(),
        }
    }
}

impl InterviewSettings {
    pub fn limits(&self) -> InterviewLimits {
        InterviewLimits {
            max_record_bytes: self.max_record_bytes,
            corrupt_record_bytes: self.corrupt_record_bytes,
            collection_warn_bytes: self.collection_warn_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSettings {
    #[serde(default = "default_state")]
    pub default_state: String,
    #[serde(default = "default_completeness_floor")]
    pub default_completeness_floor: usize,
    #[serde(default = "default_completeness_floors")]
    pub completeness_floors: BTreeMap<String, usize>,
    /// Directory with replacement dataset files
    #[serde(default)]
    pub dataset_dir: Option<PathBuf>,
}

fn default_state() -> String {
    "West Bengal".to_string()
}

fn default_completeness_floor() -> usize {
    50
}

fn default_completeness_floors() -> BTreeMap<String, usize> {
    BTreeMap::from([("West Bengal".to_string(), 200)])
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            default_state: default_state(),
            default_completeness_floor: default_completeness_floor(),
            completeness_floors: default_completeness_floors(),
            dataset_dir: None,
        }
    }
}

impl ReferenceSettings {
    pub fn floors(&self) -> CompletenessFloors {
        self.completeness_floors
            .iter()
            .fold(CompletenessFloors::new(self.default_completeness_floor), |floors, (state, floor)| {
                floors.with_state(state, *floor)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    /// ACs warmed when the user has no AC restriction
    #[serde(default = "default_unrestricted_ac_limit")]
    pub unrestricted_ac_limit: usize,
    /// Groups warmed per AC in that case
    #[serde(default = "default_groups_per_ac_limit")]
    pub groups_per_ac_limit: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Fetch geography remotely for ACs missing from the bundled data
    #[serde(default)]
    pub remote_reference_fallback: bool,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_unrestricted_ac_limit() -> usize {
    100
}

fn default_groups_per_ac_limit() -> usize {
    10
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    1000
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            unrestricted_ac_limit: default_unrestricted_ac_limit(),
            groups_per_ac_limit: default_groups_per_ac_limit(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            remote_reference_fallback: false,
            retry: RetrySettings::default(),
        }
    }
}

impl ProvisioningSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetrySettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }
}

impl Settings {
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR);
        Ok(config_dir.join("settings.toml"))
    }

    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from(&Self::get_config_path()?)?;
        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading settings from: {:?}", path);

        if !path.exists() {
            info!("Settings file doesn't exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse settings file: {:?}", path))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
            }
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {:?}", path))?;

        info!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Apply `FIELDSYNC_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim().parse::<T>().map_err(|e| {
                anyhow::anyhow!("Invalid value for {}{}: '{}' ({})", ENV_PREFIX, name, raw, e)
            })
        }

        if let Some(path) = var("DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = var("MAX_VALUE_BYTES") {
            self.storage.max_value_bytes = parse("MAX_VALUE_BYTES", &raw)?;
        }
        if let Some(raw) = var("MAX_RECORD_BYTES") {
            self.interviews.max_record_bytes = parse("MAX_RECORD_BYTES", &raw)?;
        }
        if let Some(state) = var("DEFAULT_STATE") {
            self.reference.default_state = state;
        }
        if let Some(dir) = var("DATASET_DIR") {
            self.reference.dataset_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = var("UNRESTRICTED_AC_LIMIT") {
            self.provisioning.unrestricted_ac_limit = parse("UNRESTRICTED_AC_LIMIT", &raw)?;
        }
        if let Some(raw) = var("GROUPS_PER_AC_LIMIT") {
            self.provisioning.groups_per_ac_limit = parse("GROUPS_PER_AC_LIMIT", &raw)?;
        }
        if let Some(raw) = var("BATCH_DELAY_MS") {
            self.provisioning.batch_delay_ms = parse("BATCH_DELAY_MS", &raw)?;
        }
        if let Some(raw) = var("REMOTE_REFERENCE_FALLBACK") {
            self.provisioning.remote_reference_fallback = parse("REMOTE_REFERENCE_FALLBACK", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.max_value_bytes == 0 {
            anyhow::bail!("storage.max_value_bytes must be greater than 0");
        }
        if self.interviews.max_record_bytes == 0 {
            anyhow::bail!("interviews.max_record_bytes must be greater than 0");
        }
        if self.interviews.corrupt_record_bytes < self.interviews.max_record_bytes {
            anyhow::bail!(
                "interviews.corrupt_record_bytes ({}) must not be below interviews.max_record_bytes ({})",
                self.interviews.corrupt_record_bytes,
                self.interviews.max_record_bytes
            );
        }
        if self.reference.default_state.trim().is_empty() {
            anyhow::bail!("reference.default_state must not be empty");
        }
        if self.provisioning.batch_size == 0 {
            anyhow::bail!("provisioning.batch_size must be greater than 0");
        }
        if self.provisioning.retry.max_attempts == 0 {
            anyhow::bail!("provisioning.retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::data_dir()
                .context("Failed to get data directory")?
                .join(APP_DIR)
                .join("offline.db")),
        }
    }
}
