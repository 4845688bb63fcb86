//! Per-run log collector.
//!
//! Every stage appends to the [`RunLog`] it is handed. Entries are echoed to
//! `tracing` as they arrive and written to disk once, when the orchestrator
//! calls [`RunLog::flush`] at the end of the run.

use chrono::{DateTime, Local};
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::Result;

/// Severity of a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A single timestamped line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

/// Append-only log for one migration run.
#[derive(Debug, Default)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.push(LogLevel::Error, message);
    }

    fn push(&mut self, level: LogLevel, message: String) {
        self.entries.push(LogEntry {
            at: Local::now(),
            level,
            message,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any entry contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }

    /// Render all entries as text, one per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let level = match entry.level {
                LogLevel::Info => "INFO",
                LogLevel::Warn => "WARN",
                LogLevel::Error => "ERROR",
            };
            let _ = writeln!(
                out,
                "{} [{:5}] {}",
                entry.at.format("%Y-%m-%d %H:%M:%S"),
                level,
                entry.message
            );
        }
        out
    }

    /// Write the log to `<dir>/<name>_<timestamp>.txt`, consuming it.
    pub fn flush(self, dir: &Path, name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_{}.txt", name, timestamp));
        std::fs::write(&path, self.render())?;
        info!("Log saved to {}", path.display());
        Ok(path)
    }
}
