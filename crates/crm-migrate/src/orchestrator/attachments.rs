//! File migration job: upload per-record folders and attach them via notes.

use std::collections::BTreeMap;

use super::{JobReport, Orchestrator};
use crate::api::{AssociationTarget, WriteInput};
use crate::error::{MigrateError, Result};
use crate::record::{RecordType, ResidueReason, SourceRecord};
use crate::runlog::RunLog;
use crate::source::{self, FileFolder};

const RECORDS_STAGE: &str = "records";
const FOLDERS_STAGE: &str = "folders";
const UPLOADS_STAGE: &str = "uploads";
const NOTES_STAGE: &str = "notes";

/// Residue row for one attachment folder.
fn folder_record(folder: &FileFolder) -> SourceRecord {
    let files = folder
        .files
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(";");
    SourceRecord::with_external_id(
        vec![
            ("folder".to_string(), folder.name.clone()),
            ("files".to_string(), files),
        ],
        folder.name.clone(),
    )
}

impl Orchestrator {
    pub(super) async fn migrate_files(
        &self,
        record_type: RecordType,
        log: &mut RunLog,
    ) -> Result<JobReport> {
        let type_id = self.config.associations.note_to(record_type).ok_or_else(|| {
            MigrateError::InvalidArgument(format!("files cannot be attached to {}", record_type))
        })?;

        let folders = source::scan_file_folders(&self.config.paths.files_dir, record_type)?;
        let total_files: usize = folders.iter().map(|f| f.files.len()).sum();
        log.info(format!("Total {} with files: {}", record_type, folders.len()));
        log.info(format!("Total files to migrate: {}", total_files));

        let mut records: Vec<SourceRecord> = folders.iter().map(folder_record).collect();
        let mut report = JobReport::new(records.len());

        let resolved = self
            .resolve(
                &mut records,
                record_type,
                |r| Some(r.external_id().to_string()),
                log,
            )
            .await;
        for record in records.iter().filter(|r| r.resolved_id(record_type).is_none()) {
            log.warn(format!("No record id found for {}", record.external_id()));
            report
                .residue
                .push(record, RECORDS_STAGE, ResidueReason::UnmatchedRecord);
        }
        report.stage(RECORDS_STAGE, records.len(), resolved);

        let parent_path = format!("/Migrated Files/{}", record_type);
        let category = self.config.associations.category;
        let mut inputs = Vec::new();
        let mut owners = Vec::new();
        let (mut folders_created, mut uploads_attempted, mut uploads_done) = (0, 0, 0);

        for (position, (folder, record)) in folders
            .iter()
            .zip(&records)
            .filter(|(_, r)| r.resolved_id(record_type).is_some())
            .enumerate()
        {
            log.info(format!(
                "Processing folder {}/{}: {}",
                position + 1,
                resolved,
                folder.name
            ));

            let Some(folder_id) = self
                .files
                .create_folder(&folder.name, &parent_path, log)
                .await
            else {
                report
                    .residue
                    .push(record, FOLDERS_STAGE, ResidueReason::WriteDropped);
                continue;
            };
            folders_created += 1;

            let mut file_ids = Vec::with_capacity(folder.files.len());
            for path in &folder.files {
                uploads_attempted += 1;
                if let Some(id) = self.files.upload_file(path, &folder_id, log).await {
                    file_ids.push(id);
                }
            }
            uploads_done += file_ids.len();
            log.info(format!("Total files uploaded: {}", uploads_done));

            if file_ids.len() < folder.files.len() {
                report
                    .residue
                    .push(record, UPLOADS_STAGE, ResidueReason::WriteDropped);
            }
            if file_ids.is_empty() {
                log.warn(format!("No files uploaded for {}; no note created", folder.name));
                continue;
            }

            let target = record
                .resolved_id(record_type)
                .and_then(|id| AssociationTarget::new(id, category, type_id));
            let Some(target) = target else {
                continue;
            };

            let mut properties = BTreeMap::new();
            properties.insert(
                "hs_note_body".to_string(),
                format!("Migrated files for {} {}", record_type, folder.name),
            );
            properties.insert("hs_attachment_ids".to_string(), file_ids.join(";"));
            inputs.push(WriteInput::new(properties).with_association(target));
            owners.push(record.clone());
        }
        report.stage(FOLDERS_STAGE, resolved, folders_created);
        report.stage(UPLOADS_STAGE, uploads_attempted, uploads_done);

        log.info(format!("Total notes to create: {}", inputs.len()));
        let outcome = self
            .writer
            .create(RecordType::Notes, &inputs, log)
            .await;
        for (position, owner) in owners.iter().enumerate() {
            if outcome.is_failed(position) {
                report
                    .residue
                    .push(owner, NOTES_STAGE, ResidueReason::WriteDropped);
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
