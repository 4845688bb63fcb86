//! # crm-migrate
//!
//! Migrates exported business records into a CRM over its REST API while
//! keeping the links between them.
//!
//! The library provides:
//!
//! - **Paginated search** that follows cursors to completion
//! - **Chunked bulk writes** for creates (100 per call) and associations (500 per call)
//! - **Bounded retry** with linear backoff for rate limits and server errors
//! - **Id reconciliation** joining source external ids to destination ids
//! - **Residue reporting** for every record that could not be migrated
//!
//! ## Example
//!
//! ```rust,no_run
//! use crm_migrate::{Config, MigrationJob, Orchestrator};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> crm_migrate::Result<()> {
//!     let config = Config::from_env()?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     let result = orchestrator
//!         .run(MigrationJob::AssociateDeals {
//!             source_file: PathBuf::from("deals.csv"),
//!         })
//!         .await?;
//!     println!("{} records left in residue", result.residue_count);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reconcile;
pub mod record;
pub mod runlog;
pub mod source;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use api::{
    BatchWriteClient, CrmTransport, HttpTransport, PaginatedSearchClient, RetryPolicy, Throttle,
};
pub use config::Config;
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationJob, MigrationResult, Orchestrator, StageSummary};
pub use reconcile::{IdReconciler, ReconciliationMap};
pub use record::{RecordType, Residue, ResidueReason, SourceRecord};
pub use runlog::RunLog;
