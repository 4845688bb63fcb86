//! Local inputs and outputs: CSV exports, residue files, attachment folders.

use chrono::Local;
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::record::{RecordType, Residue, SourceRecord};

/// Extra residue columns appended after the source columns.
pub const RESIDUE_STAGE_COLUMN: &str = "residue_stage";
pub const RESIDUE_REASON_COLUMN: &str = "residue_reason";

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Load every row of a CSV export, keyed by `id_column`.
pub fn load_csv(path: &Path, id_column: &str) -> Result<Vec<SourceRecord>> {
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let columns = headers
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        records.push(SourceRecord::new(columns, id_column));
    }

    debug!("Loaded {} rows from {}", records.len(), path.display());
    Ok(records)
}

/// Write `residue` to `<dir>/<job>_residue_<timestamp>.csv`.
///
/// Returns `None` without touching the filesystem when there is nothing
/// to report.
pub fn write_residue(dir: &Path, job: &str, residue: &Residue) -> Result<Option<PathBuf>> {
    if residue.is_empty() {
        return Ok(None);
    }

    // Union of source columns in first-seen order.
    let mut header: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for entry in residue.entries() {
        for (name, _) in entry.record.columns() {
            if seen.insert(name.as_str()) {
                header.push(name.as_str());
            }
        }
    }

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_residue_{}.csv", job, timestamp()));
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_path(&path)?;

    let mut full_header = header.clone();
    full_header.push(RESIDUE_STAGE_COLUMN);
    full_header.push(RESIDUE_REASON_COLUMN);
    writer.write_record(&full_header)?;

    for entry in residue.entries() {
        let mut row: Vec<String> = header
            .iter()
            .map(|name| {
                entry
                    .record
                    .columns()
                    .iter()
                    .find(|(column, _)| column.as_str() == *name)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect();
        row.push(entry.stage.clone());
        row.push(entry.reason.to_string());
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!("Residue saved to {}", path.display());
    Ok(Some(path))
}

/// Result of renaming a column in a CSV export.
#[derive(Debug, Clone)]
pub struct RenameOutcome {
    pub output: PathBuf,
    pub rows: usize,
    /// False when the input had no column named `from`.
    pub renamed: bool,
}

/// Copy `input` to `<out_dir>/<stem>_<timestamp>.csv` with column `from`
/// renamed to `to`.
pub fn rename_column(input: &Path, out_dir: &Path, from: &str, to: &str) -> Result<RenameOutcome> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            MigrateError::InvalidArgument(format!("not a file name: {}", input.display()))
        })?;

    let mut reader = ReaderBuilder::new().flexible(true).from_path(input)?;
    let mut renamed = false;
    let header: Vec<String> = reader
        .headers()?
        .iter()
        .map(|name| {
            if name == from {
                renamed = true;
                to.to_string()
            } else {
                name.to_string()
            }
        })
        .collect();

    std::fs::create_dir_all(out_dir)?;
    let output = out_dir.join(format!("{}_{}.csv", stem, timestamp()));
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_path(&output)?;
    writer.write_record(&header)?;

    let mut rows = 0;
    for row in reader.records() {
        writer.write_record(&row?)?;
        rows += 1;
    }
    writer.flush()?;

    Ok(RenameOutcome {
        output,
        rows,
        renamed,
    })
}

/// One record's attachment folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFolder {
    /// Folder name, which is the owning record's external id.
    pub name: String,
    pub files: Vec<PathBuf>,
}

/// Scan `<files_dir>/<record_type>/` for per-record attachment folders.
///
/// Only immediate sub-directories count. Hidden files are skipped, as are
/// files lying directly in the type directory. Folders and files are
/// returned in name order.
pub fn scan_file_folders(files_dir: &Path, record_type: RecordType) -> Result<Vec<FileFolder>> {
    let root = files_dir.join(record_type.api_name());
    let mut folders = Vec::new();

    for entry in std::fs::read_dir(&root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();

        let mut files = Vec::new();
        for file in std::fs::read_dir(entry.path())? {
            let file = file?;
            let hidden = file.file_name().to_string_lossy().starts_with('.');
            if hidden || !file.file_type()?.is_file() {
                continue;
            }
            files.push(file.path());
        }
        files.sort();

        debug!("Processed folder: {}, found {} files", name, files.len());
        folders.push(FileFolder { name, files });
    }

    folders.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ResidueReason;
    use std::fs;

    #[test]
    fn test_load_csv_keys_rows_by_id_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deals.csv");
        fs::write(
            &path,
            "Id,Name,AccountId\n006A,\"Big, deal\",001A\n006B,Small,\n",
        )
        .unwrap();

        let records = load_csv(&path, "Id").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].external_id(), "006A");
        assert_eq!(records[0].get("Name"), Some("Big, deal"));
        assert_eq!(records[1].get("AccountId"), None);
    }

    #[test]
    fn test_load_csv_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_csv(&dir.path().join("nope.csv"), "Id").unwrap_err();
        assert!(matches!(err, MigrateError::Csv(_)));
    }

    #[test]
    fn test_write_residue_quotes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let record = SourceRecord::new(
            vec![
                ("Id".to_string(), "006A".to_string()),
                ("AccountId".to_string(), "001X".to_string()),
            ],
            "Id",
        );
        let mut residue = Residue::new();
        residue.push(
            &record,
            "deal_companies",
            ResidueReason::UnmatchedReference(RecordType::Companies),
        );

        let path = write_residue(dir.path(), "assoc_deals", &residue)
            .unwrap()
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("assoc_deals_residue_"));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines[0],
            "\"Id\",\"AccountId\",\"residue_stage\",\"residue_reason\""
        );
        assert_eq!(
            lines[1],
            "\"006A\",\"001X\",\"deal_companies\",\"no destination companies\""
        );
    }

    #[test]
    fn test_write_residue_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        assert!(write_residue(&logs, "job", &Residue::new()).unwrap().is_none());
        assert!(!logs.exists());
    }

    #[test]
    fn test_rename_column() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("contacts.csv");
        fs::write(&input, "Id,Email__c\n003A,a@example.com\n003B,b@example.com\n").unwrap();

        let out_dir = dir.path().join("transformed");
        let outcome = rename_column(&input, &out_dir, "Email__c", "email").unwrap();

        assert!(outcome.renamed);
        assert_eq!(outcome.rows, 2);
        let name = outcome.output.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("contacts_"));
        let content = fs::read_to_string(&outcome.output).unwrap();
        assert_eq!(
            content,
            "\"Id\",\"email\"\n\"003A\",\"a@example.com\"\n\"003B\",\"b@example.com\"\n"
        );
    }

    #[test]
    fn test_scan_file_folders() {
        let dir = tempfile::tempdir().unwrap();
        let deals = dir.path().join("deals");
        fs::create_dir_all(deals.join("006B")).unwrap();
        fs::create_dir_all(deals.join("006A")).unwrap();
        fs::write(deals.join("stray.txt"), "x").unwrap();
        fs::write(deals.join("006A").join("b.pdf"), "b").unwrap();
        fs::write(deals.join("006A").join("a.pdf"), "a").unwrap();
        fs::write(deals.join("006A").join(".DS_Store"), "").unwrap();

        let folders = scan_file_folders(dir.path(), RecordType::Deals).unwrap();

        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].name, "006A");
        assert_eq!(
            folders[0].files,
            vec![deals.join("006A").join("a.pdf"), deals.join("006A").join("b.pdf")]
        );
        assert_eq!(folders[1].name, "006B");
        assert!(folders[1].files.is_empty());
    }
}
