//! Migration orchestrator - sequences search, reconcile and write per job.

mod attachments;
mod deals;
mod notes;

use crate::api::{
    BatchWriteClient, CrmTransport, FileManagerClient, HttpTransport, PaginatedSearchClient,
    RetryPolicy, SearchRequest, MAX_FILTER_VALUES,
};
use crate::config::Config;
use crate::error::Result;
use crate::reconcile::IdReconciler;
use crate::record::{RecordType, Residue, SourceRecord};
use crate::runlog::RunLog;
use crate::source;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// A unit of migration work selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationJob {
    /// Link existing deals to their companies and contacts.
    AssociateDeals { source_file: PathBuf },
    /// Create notes attached to their parent records.
    MigrateNotes { source_file: PathBuf },
    /// Upload per-record attachment folders and link them through notes.
    MigrateFiles { record_type: RecordType },
    /// Rename one column of an export. No remote calls.
    TransformColumns { source_file: PathBuf },
}

impl MigrationJob {
    /// Stable job name used for artifacts and summaries.
    pub fn name(&self) -> &'static str {
        match self {
            MigrationJob::AssociateDeals { .. } => "assoc_deals",
            MigrationJob::MigrateNotes { .. } => "migrate_notes",
            MigrationJob::MigrateFiles { .. } => "migrate_files",
            MigrationJob::TransformColumns { .. } => "transformation",
        }
    }
}

impl fmt::Display for MigrationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationJob::MigrateFiles { record_type } => {
                write!(f, "{} ({})", self.name(), record_type)
            }
            MigrationJob::AssociateDeals { source_file }
            | MigrationJob::MigrateNotes { source_file }
            | MigrationJob::TransformColumns { source_file } => {
                write!(f, "{} ({})", self.name(), source_file.display())
            }
        }
    }
}

/// Counts for one stage of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub name: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub residue: usize,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Job name.
    pub job: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Rows (or folders) read from the source.
    pub source_records: usize,

    /// Per-stage counts, in execution order.
    pub stages: Vec<StageSummary>,

    /// Records not fully migrated.
    pub residue_count: usize,

    /// Residue CSV, when there was residue.
    pub residue_file: Option<PathBuf>,

    /// Run log file.
    pub log_file: Option<PathBuf>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What a job hands back to [`Orchestrator::run`].
#[derive(Debug, Default)]
pub(crate) struct JobReport {
    pub source_records: usize,
    pub stages: Vec<StageSummary>,
    pub residue: Residue,
}

impl JobReport {
    fn new(source_records: usize) -> Self {
        Self {
            source_records,
            ..Self::default()
        }
    }

    /// Close a stage. Its residue count is taken from what was pushed so far.
    fn stage(&mut self, name: &str, attempted: usize, succeeded: usize) {
        self.stages.push(StageSummary {
            name: name.to_string(),
            attempted,
            succeeded,
            residue: self.residue.count_for(name),
        });
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    search: PaginatedSearchClient,
    writer: BatchWriteClient,
    files: FileManagerClient,
}

impl Orchestrator {
    /// Create an orchestrator talking to the configured destination.
    pub fn new(config: Config) -> Result<Self> {
        let transport = HttpTransport::new(&config.api)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create an orchestrator on top of an existing transport.
    pub fn with_transport(config: Config, transport: Arc<dyn CrmTransport>) -> Self {
        let retry = RetryPolicy::new();
        let throttle = config.throttle();

        Self {
            search: PaginatedSearchClient::new(transport.clone(), retry, throttle),
            writer: BatchWriteClient::new(transport.clone(), retry, throttle),
            files: FileManagerClient::new(transport, retry, throttle),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one job to completion.
    ///
    /// Dropped pages and chunks do not fail the run; they show up in the
    /// log and the residue file. Only configuration problems and local I/O
    /// failures return an error.
    pub async fn run(&self, job: MigrationJob) -> Result<MigrationResult> {
        self.config.validate_for(&job)?;

        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let logs_dir = self.config.paths.logs_dir.clone();
        let log_name = format!("{}_log", job.name());

        let mut log = RunLog::new();
        log.info(format!("Starting {} run: {}", job, run_id));

        let report = match &job {
            MigrationJob::AssociateDeals { source_file } => {
                self.associate_deals(source_file, &mut log).await
            }
            MigrationJob::MigrateNotes { source_file } => {
                self.migrate_notes(source_file, &mut log).await
            }
            MigrationJob::MigrateFiles { record_type } => {
                self.migrate_files(*record_type, &mut log).await
            }
            MigrationJob::TransformColumns { source_file } => {
                self.transform_columns(source_file, &mut log)
            }
        };

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                log.error(format!("Run aborted: {}", e));
                if let Err(flush_err) = log.flush(&logs_dir, &log_name) {
                    warn!("Could not save run log: {}", flush_err);
                }
                return Err(e);
            }
        };

        let residue_file = match source::write_residue(&logs_dir, job.name(), &report.residue) {
            Ok(path) => path,
            Err(e) => {
                log.error(format!("Could not write residue file: {}", e));
                if let Err(flush_err) = log.flush(&logs_dir, &log_name) {
                    warn!("Could not save run log: {}", flush_err);
                }
                return Err(e);
            }
        };
        for stage in &report.stages {
            log.info(format!(
                "Stage {}: {} attempted, {} succeeded, {} residue",
                stage.name, stage.attempted, stage.succeeded, stage.residue
            ));
        }
        log.info(format!(
            "Run {} finished: {} source records, {} residue",
            run_id,
            report.source_records,
            report.residue.len()
        ));
        let log_file = log.flush(&logs_dir, &log_name)?;

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        Ok(MigrationResult {
            run_id,
            job: job.name().to_string(),
            started_at,
            completed_at,
            duration_seconds: duration,
            source_records: report.source_records,
            stages: report.stages,
            residue_count: report.residue.len(),
            residue_file,
            log_file: Some(log_file),
        })
    }

    /// Resolve destination ids for `record_type` onto `records`.
    ///
    /// `key` yields the external id each row needs resolved, if any. Distinct
    /// ids are searched in groups of [`MAX_FILTER_VALUES`]; results from all
    /// groups are reconciled together. Returns the number of rows resolved.
    async fn resolve<F>(
        &self,
        records: &mut [SourceRecord],
        record_type: RecordType,
        key: F,
        log: &mut RunLog,
    ) -> usize
    where
        F: Fn(&SourceRecord) -> Option<String>,
    {
        let Some(property) = self.config.external_id_property(record_type) else {
            log.error(format!("No external id property set for {}", record_type));
            return 0;
        };

        let mut seen = HashSet::new();
        let ids: Vec<String> = records
            .iter()
            .filter_map(&key)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return 0;
        }

        let groups = ids.len().div_ceil(MAX_FILTER_VALUES);
        let mut destination = Vec::new();
        for (index, group) in ids.chunks(MAX_FILTER_VALUES).enumerate() {
            log.info(format!(
                "Searching {} {}/{} ({} ids)",
                record_type,
                index + 1,
                groups,
                group.len()
            ));
            let request = SearchRequest::membership(property, group.to_vec());
            destination.extend(self.search.search(record_type, &request, log).await);
        }
        log.info(format!(
            "Total {} records found: {}",
            record_type,
            destination.len()
        ));

        let reconciler = IdReconciler::new(record_type, property);
        let resolved = reconciler.attach(records, &destination, key);
        log.info(format!(
            "Resolved {} for {} rows ({} distinct ids searched)",
            record_type,
            resolved,
            ids.len()
        ));
        resolved
    }

    fn transform_columns(&self, source_file: &Path, log: &mut RunLog) -> Result<JobReport> {
        const STAGE: &str = "transform";

        let (Some(from), Some(to)) = (
            self.config.transform.source_column.as_deref(),
            self.config.transform.target_column.as_deref(),
        ) else {
            return Err(crate::error::MigrateError::missing_setting(
                crate::config::env::SOURCE_COLUMN_NAME,
            ));
        };

        let data_dir = &self.config.paths.data_dir;
        let input = data_dir.join(source_file);
        let outcome = source::rename_column(&input, &data_dir.join("transformed"), from, to)?;

        if outcome.renamed {
            log.info(format!("Renamed column {} to {}", from, to));
        } else {
            log.warn(format!(
                "Column {} not found in {}; copied unchanged",
                from,
                input.display()
            ));
        }
        log.info(format!(
            "Transformed {} rows into {}",
            outcome.rows,
            outcome.output.display()
        ));

        let mut report = JobReport::new(outcome.rows);
        report.stage(STAGE, outcome.rows, outcome.rows);
        Ok(report)
    }
}
