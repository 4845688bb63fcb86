//! Note migration job.
//!
//! Each exported note names its parent in `ParentId`. The parent's type is
//! read from the 3-character key prefix, the parent is resolved on the
//! destination, and the note is created with one embedded association.

use std::collections::BTreeMap;
use std::path::Path;

use super::{JobReport, Orchestrator};
use crate::api::{AssociationTarget, WriteInput};
use crate::error::{MigrateError, Result};
use crate::record::{RecordType, ResidueReason, SourceRecord};
use crate::runlog::RunLog;
use crate::source;

const NOTE_ID_COLUMN: &str = "Id";
const PARENT_COLUMN: &str = "ParentId";
const PARENTS_STAGE: &str = "note_parents";
const NOTES_STAGE: &str = "notes";

const PARENT_TYPES: [RecordType; 3] = [
    RecordType::Contacts,
    RecordType::Companies,
    RecordType::Deals,
];

/// Record type of a parent id, from its key prefix.
pub(crate) fn parent_type(parent_id: &str) -> Option<RecordType> {
    match parent_id.get(..3)? {
        "003" => Some(RecordType::Contacts),
        "001" => Some(RecordType::Companies),
        "006" => Some(RecordType::Deals),
        _ => None,
    }
}

fn parent_of(record: &SourceRecord) -> Option<(RecordType, &str)> {
    let parent_id = record.get(PARENT_COLUMN)?;
    parent_type(parent_id).map(|rt| (rt, parent_id))
}

/// Untrimmed column value, `None` when blank.
fn text<'a>(record: &'a SourceRecord, column: &str) -> Option<&'a str> {
    record
        .columns()
        .iter()
        .find(|(name, _)| name == column)
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.trim().is_empty())
}

fn note_properties(record: &SourceRecord, ext_id_property: &str) -> BTreeMap<String, String> {
    let body = text(record, "Body")
        .or_else(|| text(record, "CommentBody"))
        .unwrap_or_default();

    let mut properties = BTreeMap::new();
    properties.insert(
        ext_id_property.to_string(),
        record.external_id().to_string(),
    );
    properties.insert("hs_note_body".to_string(), body.to_string());
    if let Some(created) = record.get("CreatedDate") {
        properties.insert("hs_timestamp".to_string(), created.replace("+0000", "Z"));
    }
    properties
}

impl Orchestrator {
    pub(super) async fn migrate_notes(
        &self,
        source_file: &Path,
        log: &mut RunLog,
    ) -> Result<JobReport> {
        let ext_id_property = self
            .config
            .external_id_property(RecordType::Notes)
            .ok_or_else(|| MigrateError::missing_setting(crate::config::env::NOTE_EXT_ID))?
            .to_string();

        let path = self.config.paths.data_dir.join(source_file);
        let mut records = source::load_csv(&path, NOTE_ID_COLUMN)?;
        log.info(format!("Total notes to process: {}", records.len()));
        let mut report = JobReport::new(records.len());

        for parent in PARENT_TYPES {
            self.resolve(
                &mut records,
                parent,
                |r| {
                    parent_of(r)
                        .filter(|(rt, _)| *rt == parent)
                        .map(|(_, id)| id.to_string())
                },
                log,
            )
            .await;
        }

        let associations = &self.config.associations;
        let mut inputs = Vec::new();
        let mut owners = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let Some((parent, _)) = parent_of(record) else {
                report.residue.push(
                    record,
                    PARENTS_STAGE,
                    ResidueReason::UnsupportedReference,
                );
                continue;
            };

            let target = record
                .resolved_id(parent)
                .zip(associations.note_to(parent))
                .and_then(|(id, type_id)| AssociationTarget::new(id, associations.category, type_id));
            match target {
                Some(target) => {
                    inputs.push(
                        WriteInput::new(note_properties(record, &ext_id_property))
                            .with_association(target),
                    );
                    owners.push(index);
                }
                None => report.residue.push(
                    record,
                    PARENTS_STAGE,
                    ResidueReason::UnmatchedReference(parent),
                ),
            }
        }
        report.stage(PARENTS_STAGE, records.len(), inputs.len());

        log.info(format!("Total notes to create: {}", inputs.len()));
        let outcome = self
            .writer
            .create(RecordType::Notes, &inputs, log)
            .await;
        for (position, owner) in owners.iter().enumerate() {
            if outcome.is_failed(position) {
                report
                    .residue
                    .push(&records[*owner], NOTES_STAGE, ResidueReason::WriteDropped);
            }
        }
        report.stage(
            NOTES_STAGE,
            inputs.len(),
            inputs.len() - outcome.failed_inputs(),
        );

        Ok(report)
    }
}
