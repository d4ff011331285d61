//! Month-partitioned JSON-lines storage for audit entries
//!
//! Entries are appended to `audit-YYYY-MM.jsonl` under the configured
//! directory, one JSON object per line. Files are never rewritten; retention
//! deletes whole months once every entry in them has expired.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::entry::AuditLogEntry;
use crate::Result;

const FILE_PREFIX: &str = "audit-";
const FILE_SUFFIX: &str = ".jsonl";

/// File name for the month containing `ts`
fn file_name_for(ts: DateTime<Utc>) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", ts.format("%Y-%m"))
}

/// Parse the `(year, month)` out of an audit file name
fn period_of(path: &Path) -> Option<(i32, u32)> {
    let name = path.file_name()?.to_str()?;
    let period = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let (year, month) = period.split_once('-')?;
    let year = year.parse().ok()?;
    let month = month.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// Audit files in `dir`, oldest month first
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<(i32, u32, PathBuf)> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter_map(|p| period_of(&p).map(|(y, m)| (y, m, p)))
        .collect();
    files.sort_by_key(|(y, m, _)| (*y, *m));
    Ok(files.into_iter().map(|(_, _, p)| p).collect())
}

/// Append-only writer over the monthly files
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    current: Option<(String, BufWriter<File>)>,
}

impl FileSink {
    /// Open a sink rooted at `dir`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, current: None })
    }

    /// Append one entry as a JSON line and flush it
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn append(&mut self, entry: &AuditLogEntry) -> Result<()> {
        let name = file_name_for(entry.timestamp);
        let stale = self.current.as_ref().is_none_or(|(open, _)| *open != name);
        if stale {
            let path = self.dir.join(&name);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(path = %path.display(), "Opened audit file");
            self.current = Some((name, BufWriter::new(file)));
        }

        if let Some((_, writer)) = self.current.as_mut() {
            write_line(writer, entry)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Delete month files whose whole month ended before `cutoff`
    ///
    /// Returns the number of files removed. Individual delete failures are
    /// logged and skipped.
    pub fn remove_expired(&mut self, cutoff: DateTime<Utc>) -> usize {
        let files = match list_files(&self.dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to list audit files");
                return 0;
            }
        };

        let mut removed = 0;
        for path in files {
            let Some((year, month)) = period_of(&path) else { continue };
            let Some(month_end) = next_month_start(year, month) else { continue };
            if month_end > cutoff {
                continue;
            }
            if self
                .current
                .as_ref()
                .is_some_and(|(open, _)| path.file_name().and_then(|n| n.to_str()) == Some(open.as_str()))
            {
                self.current = None;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed expired audit file");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove audit file"),
            }
        }
        removed
    }
}

fn write_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn next_month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let (y, m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// A parsed line or the reason it could not be parsed
#[derive(Debug)]
pub enum StoredLine {
    /// Well-formed entry
    Entry(Box<AuditLogEntry>),
    /// Line that is not a valid entry
    Malformed {
        /// File and line number
        location: String,
        /// Parse error
        message: String,
    },
}

/// Stream every non-blank line of every audit file in `dir`, oldest first
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be read. A line that
/// fails to parse is passed to `visit` as [`StoredLine::Malformed`].
pub fn for_each_line(dir: &Path, mut visit: impl FnMut(StoredLine)) -> Result<()> {
    for path in list_files(dir)? {
        let reader = BufReader::new(File::open(&path)?);
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditLogEntry>(&line) {
                Ok(entry) => visit(StoredLine::Entry(Box::new(entry))),
                Err(e) => visit(StoredLine::Malformed {
                    location: format!("{}:{}", path.display(), idx + 1),
                    message: e.to_string(),
                }),
            }
        }
    }
    Ok(())
}

/// Load every well-formed entry in `dir`, oldest first
///
/// Malformed lines are logged and skipped; the hash chain will report the
/// gap on verification.
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be read.
pub fn load_entries(dir: &Path) -> Result<Vec<AuditLogEntry>> {
    let mut entries = Vec::new();
    for_each_line(dir, |line| match line {
        StoredLine::Entry(entry) => entries.push(*entry),
        StoredLine::Malformed { location, message } => {
            warn!(location = %location, error = %message, "Skipping malformed audit line");
        }
    })?;
    Ok(entries)
}
