//! crm-migrate CLI - migrate exported records into the destination CRM.

use clap::{Parser, Subcommand};
use crm_migrate::{Config, MigrateError, MigrationJob, MigrationResult, Orchestrator, RecordType};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "crm-migrate")]
#[command(about = "Migrate exported records into a CRM, preserving associations")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (default: read the environment and .env)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Associate deals with their companies and contacts
    AssocDeals {
        /// Deals export inside the data directory
        #[arg(default_value = "deals.csv")]
        file: PathBuf,
    },

    /// Create notes and attach them to their parent records
    MigrateNotes {
        /// Notes export inside the data directory
        #[arg(default_value = "notes.csv")]
        file: PathBuf,
    },

    /// Upload attachment folders and link them to records through notes
    MigrateFiles {
        /// Object type: deals, contacts or companies
        object_type: String,
    },

    /// Rename a column in an export (no remote calls)
    Transform {
        /// Export inside the data directory
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let job = match cli.command {
        Commands::AssocDeals { file } => MigrationJob::AssociateDeals { source_file: file },
        Commands::MigrateNotes { file } => MigrationJob::MigrateNotes { source_file: file },
        Commands::MigrateFiles { object_type } => MigrationJob::MigrateFiles {
            record_type: parse_attachable(&object_type)?,
        },
        Commands::Transform { file } => MigrationJob::TransformColumns { source_file: file },
    };

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::from_env()?,
    };
    config.validate_for(&job)?;

    let orchestrator = Orchestrator::new(config)?;
    let result = orchestrator.run(job).await?;

    if cli.output_json {
        println!("{}", result.to_json()?);
    } else {
        print_summary(&result);
    }

    Ok(())
}

/// Record types that can own attachment folders.
fn parse_attachable(value: &str) -> Result<RecordType, MigrateError> {
    match RecordType::parse(value) {
        Some(RecordType::Notes) | None => Err(MigrateError::InvalidArgument(format!(
            "invalid object type '{}'; must be one of deals, contacts or companies",
            value
        ))),
        Some(record_type) => Ok(record_type),
    }
}

fn print_summary(result: &MigrationResult) {
    println!("\nMigration completed!");
    println!("  Run ID: {}", result.run_id);
    println!("  Job: {}", result.job);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Source records: {}", result.source_records);
    for stage in &result.stages {
        println!(
            "  {}: {}/{} succeeded, {} residue",
            stage.name, stage.succeeded, stage.attempted, stage.residue
        );
    }
    println!("  Residue: {}", result.residue_count);
    if let Some(path) = &result.residue_file {
        println!("  Residue file: {}", path.display());
    }
    if let Some(path) = &result.log_file {
        println!("  Log file: {}", path.display());
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
