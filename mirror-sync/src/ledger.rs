//! Status ledgers.
//!
//! - `status.csv`: `name,type,status`, one row per artifact
//! - `software.csv`: `name,status`, one row per software
//!
//! Both are upserted: an existing name is replaced in place, a new one is
//! appended. Writes use the same atomic `.tmp` + rename pattern as the
//! metadata snapshot and are made after a batch, from its immutable results.

use std::collections::HashSet;
use std::path::Path;

use mirror_core::{BatchStatus, TaskStatus, WorkerResult};

use crate::error::{io_err, SyncError};

pub const STATUS_HEADER: &str = "name,type,status";
pub const SOFTWARE_HEADER: &str = "name,status";

/// One row of `status.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub name: String,
    pub kind: String,
    pub status: String,
}

impl LedgerRow {
    pub fn from_result(result: &WorkerResult) -> Self {
        Self {
            name: result.reference.to_string(),
            kind: result.task.kind().to_string(),
            status: result.status.ledger_label().to_string(),
        }
    }

    fn parse(line: &str) -> Option<Self> {
        // Names may contain commas; type and status never do.
        let mut parts = line.rsplitn(3, ',');
        let status = parts.next()?.trim();
        let kind = parts.next()?.trim();
        let name = parts.next()?.trim();
        Some(Self {
            name: name.to_string(),
            kind: kind.to_string(),
            status: status.to_string(),
        })
    }

    fn render(&self) -> String {
        format!("{},{},{}", self.name, self.kind, self.status)
    }
}

/// Data lines of a ledger file (header dropped). Missing files are empty.
fn read_lines(path: &Path, header: &str) -> Result<Vec<String>, SyncError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty() && l.trim() != header)
        .map(str::to_string)
        .collect())
}

fn write_lines(path: &Path, header: &str, lines: &[String]) -> Result<(), SyncError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let mut body = String::from(header);
    body.push('\n');
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    let tmp = path.with_extension("csv.tmp");
    std::fs::write(&tmp, body).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// Replace-or-append `(key, line)` pairs; `key_of` extracts a line's key.
fn upsert_lines(
    existing: Vec<String>,
    updates: Vec<(String, String)>,
    key_of: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let mut lines = existing;
    for (key, line) in updates {
        match lines
            .iter()
            .position(|l| key_of(l).as_deref() == Some(key.as_str()))
        {
            Some(idx) => lines[idx] = line,
            None => lines.push(line),
        }
    }
    lines
}

// ---------------------------------------------------------------------------
// status.csv
// ---------------------------------------------------------------------------

pub fn load_status(path: &Path) -> Result<Vec<LedgerRow>, SyncError> {
    Ok(read_lines(path, STATUS_HEADER)?
        .iter()
        .filter_map(|l| LedgerRow::parse(l))
        .collect())
}

/// Upsert `rows` into `status.csv`.
pub fn upsert_status(path: &Path, rows: &[LedgerRow]) -> Result<(), SyncError> {
    let existing = read_lines(path, STATUS_HEADER)?;
    let updates = rows.iter().map(|r| (r.name.clone(), r.render())).collect();
    let lines = upsert_lines(existing, updates, |l| LedgerRow::parse(l).map(|r| r.name));
    write_lines(path, STATUS_HEADER, &lines)?;
    tracing::info!("status written to {} ({} rows updated)", path.display(), rows.len());
    Ok(())
}

/// Record every result of a batch.
pub fn record_results(path: &Path, results: &[WorkerResult]) -> Result<(), SyncError> {
    let rows: Vec<LedgerRow> = results.iter().map(LedgerRow::from_result).collect();
    upsert_status(path, &rows)
}

/// Names whose last recorded status is success.
pub fn succeeded(path: &Path) -> Result<HashSet<String>, SyncError> {
    let success = TaskStatus::Success.ledger_label();
    Ok(load_status(path)?
        .into_iter()
        .filter(|r| r.status.eq_ignore_ascii_case(success))
        .map(|r| r.name)
        .collect())
}

// ---------------------------------------------------------------------------
// software.csv
// ---------------------------------------------------------------------------

/// Set every software in `names` to the batch's overall status.
pub fn upsert_software(path: &Path, names: &[String], status: BatchStatus) -> Result<(), SyncError> {
    let existing = read_lines(path, SOFTWARE_HEADER)?;
    let label = status.software_label();
    let updates = names
        .iter()
        .map(|n| (n.clone(), format!("{n},{label}")))
        .collect();
    let lines = upsert_lines(existing, updates, |l| {
        l.split(',').next().map(|k| k.trim().to_string())
    });
    write_lines(path, SOFTWARE_HEADER, &lines)
}

pub fn load_software(path: &Path) -> Result<Vec<(String, String)>, SyncError> {
    Ok(read_lines(path, SOFTWARE_HEADER)?
        .iter()
        .filter_map(|l| {
            let (name, status) = l.split_once(',')?;
            Some((name.trim().to_string(), status.trim().to_string()))
        })
        .collect())
}
