//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::{AssociationCategory, Throttle};
use crate::record::RecordType;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Destination API access.
    #[serde(default)]
    pub api: ApiConfig,

    /// External-id property per destination object type.
    #[serde(default)]
    pub objects: ObjectsConfig,

    /// Columns in the deals export that reference other records.
    #[serde(default)]
    pub deals: DealLinksConfig,

    /// Association type ids.
    #[serde(default)]
    pub associations: AssociationTypeIds,

    /// Column rename for the transform job.
    #[serde(default)]
    pub transform: RenameConfig,

    /// Input and output directories.
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    /// External-id property carried by `record_type` on the destination.
    /// `None` when the setting is absent.
    pub fn external_id_property(&self, record_type: RecordType) -> Option<&str> {
        let value = match record_type {
            RecordType::Companies => &self.objects.company_ext_id,
            RecordType::Contacts => &self.objects.contact_ext_id,
            RecordType::Deals => &self.objects.deal_ext_id,
            RecordType::Notes => &self.objects.note_ext_id,
        };
        Some(value.as_str()).filter(|v| !v.is_empty())
    }

    /// Delay applied after every remote unit of work.
    pub fn throttle(&self) -> Throttle {
        Throttle::new(Duration::from_millis(self.api.throttle_ms))
    }
}

/// Destination API access.
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API root (default: "https://api.hubapi.com").
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Private app access token.
    #[serde(default)]
    pub private_app_key: String,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Fixed pause after each page, chunk or upload in milliseconds (default: 250).
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            private_app_key: String::new(),
            timeout_secs: default_timeout_secs(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("private_app_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .field("throttle_ms", &self.throttle_ms)
            .finish()
    }
}

/// Destination property holding each type's external id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectsConfig {
    #[serde(default)]
    pub company_ext_id: String,
    #[serde(default)]
    pub contact_ext_id: String,
    #[serde(default)]
    pub deal_ext_id: String,
    #[serde(default)]
    pub note_ext_id: String,
}

/// Deals export layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealLinksConfig {
    /// Column holding the deal's own external id (default: "Id").
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Column holding the referenced company's external id.
    #[serde(default)]
    pub company_column: Option<String>,

    /// Column holding the referenced contact's external id.
    #[serde(default)]
    pub contact_column: Option<String>,
}

impl Default for DealLinksConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
            company_column: None,
            contact_column: None,
        }
    }
}

/// Numeric association type ids for each relation the jobs write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationTypeIds {
    #[serde(default)]
    pub category: AssociationCategory,
    #[serde(default = "default_deal_to_company")]
    pub deal_to_company: u32,
    #[serde(default = "default_deal_to_contact")]
    pub deal_to_contact: u32,
    #[serde(default = "default_note_to_contact")]
    pub note_to_contact: u32,
    #[serde(default = "default_note_to_company")]
    pub note_to_company: u32,
    #[serde(default = "default_note_to_deal")]
    pub note_to_deal: u32,
}

impl AssociationTypeIds {
    /// Type id linking a note to a record of `record_type`.
    pub fn note_to(&self, record_type: RecordType) -> Option<u32> {
        match record_type {
            RecordType::Contacts => Some(self.note_to_contact),
            RecordType::Companies => Some(self.note_to_company),
            RecordType::Deals => Some(self.note_to_deal),
            RecordType::Notes => None,
        }
    }
}

impl Default for AssociationTypeIds {
    fn default() -> Self {
        Self {
            category: AssociationCategory::default(),
            deal_to_company: default_deal_to_company(),
            deal_to_contact: default_deal_to_contact(),
            note_to_contact: default_note_to_contact(),
            note_to_company: default_note_to_company(),
            note_to_deal: default_note_to_deal(),
        }
    }
}

/// Column rename applied by the transform job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameConfig {
    #[serde(default)]
    pub source_column: Option<String>,
    #[serde(default)]
    pub target_column: Option<String>,
}

/// Working directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Source exports (default: "data").
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Per-record attachment folders (default: "files").
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,

    /// Run logs and residue (default: "logs").
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            files_dir: default_files_dir(),
            logs_dir: default_logs_dir(),
        }
    }
}

// Default value functions for serde
pub(crate) fn default_base_url() -> String {
    "https://api.hubapi.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_throttle_ms() -> u64 {
    250
}

fn default_id_column() -> String {
    "Id".to_string()
}

fn default_deal_to_company() -> u32 {
    5
}

fn default_deal_to_contact() -> u32 {
    3
}

fn default_note_to_contact() -> u32 {
    202
}

fn default_note_to_company() -> u32 {
    190
}

fn default_note_to_deal() -> u32 {
    214
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_files_dir() -> PathBuf {
    PathBuf::from("files")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}
