//! Configuration loading and validation.
//!
//! Settings come from the environment (after loading `.env`) or from a
//! YAML file. Either way they are validated before anything talks to the
//! destination.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use crate::orchestrator::MigrationJob;
use std::path::{Path, PathBuf};

/// Environment variable names.
pub mod env {
    pub const PRIVATE_APP_KEY: &str = "PRIVATE_APP_KEY";
    pub const CONTACT_EXT_ID: &str = "CONTACT_EXT_ID";
    pub const COMPANY_EXT_ID: &str = "COMPANY_EXT_ID";
    pub const DEAL_EXT_ID: &str = "DEAL_EXT_ID";
    pub const NOTE_EXT_ID: &str = "NOTE_EXT_ID";
    pub const DEAL_TO_COMPANY_PROP: &str = "DEAL_TO_COMPANY_PROP";
    pub const DEAL_TO_CONTACT_PROP: &str = "DEAL_TO_CONTACT_PROP";
    pub const SOURCE_COLUMN_NAME: &str = "SOURCE_COLUMN_NAME";
    pub const HS_COLUMN_NAME: &str = "HS_COLUMN_NAME";
    pub const BASE_URL: &str = "HUBSPOT_BASE_URL";
    pub const DATA_DIR: &str = "MIGRATE_DATA_DIR";
    pub const FILES_DIR: &str = "MIGRATE_FILES_DIR";
    pub const LOGS_DIR: &str = "MIGRATE_LOGS_DIR";
    pub const THROTTLE_MS: &str = "MIGRATE_THROTTLE_MS";
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    ///
    /// Required settings are checked per job by [`Config::validate_for`].
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from the process environment, reading `.env`
    /// from the working directory first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let throttle_ms = match get(env::THROTTLE_MS) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                MigrateError::Config(format!(
                    "{} must be a whole number of milliseconds, got '{}'",
                    env::THROTTLE_MS,
                    raw
                ))
            })?,
            None => default_throttle_ms(),
        };

        let mut config = Config::default();
        config.api.private_app_key = get(env::PRIVATE_APP_KEY).unwrap_or_default();
        config.api.base_url = get(env::BASE_URL).unwrap_or_else(default_base_url);
        config.api.throttle_ms = throttle_ms;

        config.objects.contact_ext_id = get(env::CONTACT_EXT_ID).unwrap_or_default();
        config.objects.company_ext_id = get(env::COMPANY_EXT_ID).unwrap_or_default();
        config.objects.deal_ext_id = get(env::DEAL_EXT_ID).unwrap_or_default();
        config.objects.note_ext_id = get(env::NOTE_EXT_ID).unwrap_or_default();

        config.deals.company_column = get(env::DEAL_TO_COMPANY_PROP);
        config.deals.contact_column = get(env::DEAL_TO_CONTACT_PROP);

        config.transform.source_column = get(env::SOURCE_COLUMN_NAME);
        config.transform.target_column = get(env::HS_COLUMN_NAME);

        if let Some(dir) = get(env::DATA_DIR) {
            config.paths.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(env::FILES_DIR) {
            config.paths.files_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(env::LOGS_DIR) {
            config.paths.logs_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Validate settings every job needs.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Validate settings a specific job needs.
    pub fn validate_for(&self, job: &MigrationJob) -> Result<()> {
        validation::validate_for(self, job)
    }
}
