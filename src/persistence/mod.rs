//! Loading and saving counter windows across restarts.
//!
//! Backends persist a [`Snapshot`]: every tracked identity mapped to the
//! entries of its current window. Dumps replace the stored state entirely.

mod csv;
mod json;
mod memory;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ratelimit::Snapshot;

pub use self::csv::CsvPersistence;
pub use self::json::JsonPersistence;
pub use self::memory::MemoryPersistence;

/// Storage for counter windows.
pub trait Persistence: Send + Sync {
    /// Read the previously dumped snapshot. A store with nothing in it
    /// yields an empty snapshot.
    fn load(&self) -> Result<Snapshot>;

    /// Replace the stored state with `snapshot`.
    fn dump(&self, snapshot: &Snapshot) -> Result<()>;
}

/// On-disk format of the dump file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceFormat {
    /// Object keyed by identity, one entry array per key
    Json,
    /// Legacy `timestamp,hits` lines holding only the global counter
    Csv,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl PersistenceFormat {
    /// Guess the format from a dump file's extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => PersistenceFormat::Csv,
            _ => PersistenceFormat::Json,
        }
    }
}

/// Build the backend for `format` storing its state at `path`.
pub fn open(format: PersistenceFormat, path: impl Into<PathBuf>) -> Arc<dyn Persistence> {
    match format {
        PersistenceFormat::Json => Arc::new(JsonPersistence::new(path)),
        PersistenceFormat::Csv => Arc::new(CsvPersistence::new(path)),
        PersistenceFormat::Memory => Arc::new(MemoryPersistence::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(PersistenceFormat::from_path(Path::new("./dump.csv")), PersistenceFormat::Csv);
        assert_eq!(PersistenceFormat::from_path(Path::new("state.CSV")), PersistenceFormat::Csv);
        assert_eq!(PersistenceFormat::from_path(Path::new("./dump.json")), PersistenceFormat::Json);
        assert_eq!(PersistenceFormat::from_path(Path::new("dump")), PersistenceFormat::Json);
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let format: PersistenceFormat = serde_yaml::from_str("csv").unwrap();
        assert_eq!(format, PersistenceFormat::Csv);
    }
}
