//! Configuration validation.

use super::{env, Config};
use crate::error::{MigrateError, Result};
use crate::orchestrator::MigrationJob;
use crate::record::RecordType;

/// Validate the settings every job depends on.
pub fn validate(config: &Config) -> Result<()> {
    if config.api.private_app_key.is_empty() {
        return Err(MigrateError::missing_setting(env::PRIVATE_APP_KEY));
    }
    if config.api.base_url.is_empty() {
        return Err(MigrateError::missing_setting(env::BASE_URL));
    }
    if config.api.timeout_secs == 0 {
        return Err(MigrateError::Config(
            "api.timeout_secs must be at least 1".into(),
        ));
    }

    for (record_type, name) in [
        (RecordType::Contacts, env::CONTACT_EXT_ID),
        (RecordType::Companies, env::COMPANY_EXT_ID),
        (RecordType::Deals, env::DEAL_EXT_ID),
    ] {
        if config.external_id_property(record_type).is_none() {
            return Err(MigrateError::missing_setting(name));
        }
    }

    Ok(())
}

/// Validate the settings `job` depends on, on top of [`validate`].
pub fn validate_for(config: &Config, job: &MigrationJob) -> Result<()> {
    match job {
        MigrationJob::TransformColumns { .. } => {
            if config.transform.source_column.is_none() {
                return Err(MigrateError::missing_setting(env::SOURCE_COLUMN_NAME));
            }
            if config.transform.target_column.is_none() {
                return Err(MigrateError::missing_setting(env::HS_COLUMN_NAME));
            }
            // No remote calls, so the API settings are not needed.
            return Ok(());
        }
        MigrationJob::AssociateDeals { .. } => {
            validate(config)?;
            if config.deals.id_column.is_empty() {
                return Err(MigrateError::Config("deals.id_column is required".into()));
            }
            if config.deals.company_column.is_none() {
                return Err(MigrateError::missing_setting(env::DEAL_TO_COMPANY_PROP));
            }
            if config.deals.contact_column.is_none() {
                return Err(MigrateError::missing_setting(env::DEAL_TO_CONTACT_PROP));
            }
        }
        MigrationJob::MigrateNotes { .. } => {
            validate(config)?;
            if config.external_id_property(RecordType::Notes).is_none() {
                return Err(MigrateError::missing_setting(env::NOTE_EXT_ID));
            }
        }
        MigrationJob::MigrateFiles { record_type } => {
            validate(config)?;
            if config.associations.note_to(*record_type).is_none() {
                return Err(MigrateError::InvalidArgument(format!(
                    "files cannot be attached to {}; use deals, contacts or companies",
                    record_type
                )));
            }
        }
    }

    Ok(())
}
