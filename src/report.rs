//! Match report accumulation and serialization.
//!
//! The [`Report`] collects [`MatchRecord`]s in processing order and is
//! written exactly once at the end of a run. Writing consumes the report.
//!
//! Two formats are supported, chosen by the output file's extension:
//!
//! | Extension | Format |
//! |-----------|--------|
//! | `.xlsx` | Excel workbook, one worksheet (`Sheet1`) |
//! | `.csv` | Comma-separated values |
//!
//! Both start with the header row `Base Image, Game Time Image, Confidence`.

use anyhow::{bail, Context, Result};
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};

use crate::models::MatchRecord;

/// Column headers, in output order.
pub const COLUMNS: [&str; 3] = ["Base Image", "Game Time Image", "Confidence"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Xlsx,
    Csv,
}

impl ReportFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("xlsx") => Ok(ReportFormat::Xlsx),
            Some("csv") => Ok(ReportFormat::Csv),
            _ => bail!(
                "Unsupported report file '{}': extension must be .xlsx or .csv",
                path.display()
            ),
        }
    }
}

/// Where a report ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenReport {
    pub path: PathBuf,
    pub format: ReportFormat,
    pub rows: usize,
}

/// Ordered, append-only collection of match records.
#[derive(Debug, Default)]
pub struct Report {
    records: Vec<MatchRecord>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MatchRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the report to `path`, creating parent directories.
    ///
    /// An empty report still produces a file with the header row.
    pub fn write(self, path: &Path) -> Result<WrittenReport> {
        let format = ReportFormat::from_path(path)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create report directory: {}", parent.display())
                })?;
            }
        }

        match format {
            ReportFormat::Xlsx => write_xlsx(&self.records, path),
            ReportFormat::Csv => write_csv(&self.records, path),
        }
        .with_context(|| format!("Failed to write report: {}", path.display()))?;

        Ok(WrittenReport {
            path: path.to_path_buf(),
            format,
            rows: self.len(),
        })
    }
}

fn write_xlsx(records: &[MatchRecord], path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Sheet1")?;

    for (col, header) in COLUMNS.iter().enumerate() {
        sheet.write_string(0, col as u16, *header)?;
    }

    for (i, record) in records.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, &record.base_image)?;
        sheet.write_string(row, 1, &record.game_time_image)?;
        sheet.write_number(row, 2, record.confidence)?;
    }

    workbook.save(path)?;
    Ok(())
}

fn write_csv(records: &[MatchRecord], path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    writer.write_record(COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
