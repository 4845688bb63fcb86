//! Source-side records, destination record types, and residue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Destination object types the migration touches.
///
/// Per-type settings (external-id property, association type ids) are
/// resolved from [`crate::Config`] once, keyed by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Companies,
    Contacts,
    Deals,
    Notes,
}

impl RecordType {
    /// Object name used in API paths.
    pub fn api_name(&self) -> &'static str {
        match self {
            RecordType::Companies => "companies",
            RecordType::Contacts => "contacts",
            RecordType::Deals => "deals",
            RecordType::Notes => "notes",
        }
    }

    /// Parse a command-line object type, accepting singular and plural forms.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "company" | "companies" => Some(RecordType::Companies),
            "contact" | "contacts" => Some(RecordType::Contacts),
            "deal" | "deals" => Some(RecordType::Deals),
            "note" | "notes" => Some(RecordType::Notes),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// One row of a source export.
///
/// Columns keep their file order so residue can be written back in the
/// same shape. Resolved destination ids are the only thing that changes
/// after loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    columns: Vec<(String, String)>,
    external_id: String,
    resolved: BTreeMap<RecordType, String>,
}

impl SourceRecord {
    /// Build a record whose external id is read from `id_column`.
    ///
    /// A missing column yields an empty external id, which never matches.
    pub fn new(columns: Vec<(String, String)>, id_column: &str) -> Self {
        let external_id = columns
            .iter()
            .find(|(name, _)| name == id_column)
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default();

        Self {
            columns,
            external_id,
            resolved: BTreeMap::new(),
        }
    }

    /// Build a record with an explicit external id (e.g. a folder name).
    pub fn with_external_id(columns: Vec<(String, String)>, external_id: impl Into<String>) -> Self {
        Self {
            columns,
            external_id: external_id.into(),
            resolved: BTreeMap::new(),
        }
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// Value of a column, or `None` when the column is absent or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }

    /// Attach the destination id this row resolved to for `record_type`.
    pub fn resolve(&mut self, record_type: RecordType, destination_id: impl Into<String>) {
        let id = destination_id.into();
        if !id.is_empty() {
            self.resolved.insert(record_type, id);
        }
    }

    /// Destination id resolved for `record_type`, if any.
    pub fn resolved_id(&self, record_type: RecordType) -> Option<&str> {
        self.resolved.get(&record_type).map(String::as_str)
    }
}

/// Why a record ended up in the residue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidueReason {
    /// The record itself has no destination match.
    UnmatchedRecord,
    /// A record it references has no destination match.
    UnmatchedReference(RecordType),
    /// The record references something of a type that cannot be linked.
    UnsupportedReference,
    /// The write or association carrying this record was dropped.
    WriteDropped,
}

impl fmt::Display for ResidueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResidueReason::UnmatchedRecord => f.write_str("no destination record"),
            ResidueReason::UnmatchedReference(rt) => write!(f, "no destination {}", rt),
            ResidueReason::UnsupportedReference => f.write_str("unsupported reference"),
            ResidueReason::WriteDropped => f.write_str("write dropped"),
        }
    }
}

/// A record that was not fully migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidueEntry {
    pub record: SourceRecord,
    pub stage: String,
    pub reason: ResidueReason,
}

/// Records a run could not fully migrate, in the order they were found.
#[derive(Debug, Clone, Default)]
pub struct Residue {
    entries: Vec<ResidueEntry>,
}

impl Residue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: &SourceRecord, stage: &str, reason: ResidueReason) {
        self.entries.push(ResidueEntry {
            record: record.clone(),
            stage: stage.to_string(),
            reason,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ResidueEntry] {
        &self.entries
    }

    /// Number of entries recorded for one stage.
    pub fn count_for(&self, stage: &str) -> usize {
        self.entries.iter().filter(|e| e.stage == stage).count()
    }
}
