//! Legacy `timestamp,hits` dump file.
//!
//! This format predates per-identity tracking: it has no identity column and
//! only ever holds the global counter's window.

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::Persistence;
use crate::error::{Result, WindowgateError};
use crate::ratelimit::{Entry, Snapshot, GLOBAL_KEY};

/// Stores the global window as two-column records.
#[derive(Debug, Clone)]
pub struct CsvPersistence {
    path: PathBuf,
}

impl CsvPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parse the records of a legacy dump.
///
/// A record without exactly two fields fails the whole parse. A record whose
/// fields are not integers is skipped.
fn parse_records(contents: &str) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 2 {
            return Err(WindowgateError::Persistence(format!(
                "line {}: expected 2 fields, found {}",
                line_no,
                fields.len()
            )));
        }

        let timestamp = match fields[0].parse::<i64>() {
            Ok(ts) => ts,
            Err(e) => {
                warn!(line = line_no, value = fields[0], error = %e, "Invalid epoch timestamp, skipping record");
                continue;
            }
        };
        let hits = match fields[1].parse::<i64>() {
            Ok(hits) => hits,
            Err(e) => {
                warn!(line = line_no, value = fields[1], error = %e, "Invalid hit count, skipping record");
                continue;
            }
        };

        entries.push(Entry::new(timestamp, hits));
    }

    Ok(entries)
}

impl Persistence for CsvPersistence {
    fn load(&self) -> Result<Snapshot> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No dump file found, starting empty");
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(e.into()),
        };

        let entries = parse_records(&contents)?;
        let mut snapshot = Snapshot::new();
        if !entries.is_empty() {
            info!(
                path = %self.path.display(),
                entries = entries.len(),
                "Loaded legacy global window"
            );
            snapshot.insert(GLOBAL_KEY.to_string(), entries);
        }
        Ok(snapshot)
    }

    fn dump(&self, snapshot: &Snapshot) -> Result<()> {
        let dropped = snapshot.keys().filter(|k| k.as_str() != GLOBAL_KEY).count();
        if dropped > 0 {
            debug!(dropped, "Legacy format stores only the global window");
        }

        let mut out = String::new();
        for entry in snapshot.get(GLOBAL_KEY).into_iter().flatten() {
            // Writing to a String cannot fail
            let _ = writeln!(out, "{},{}", entry.timestamp, entry.hits);
        }

        fs::write(&self.path, out)?;
        info!(path = %self.path.display(), "Dumped legacy global window");
        Ok(())
    }
}
