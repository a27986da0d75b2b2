//! JSON dump file keyed by identity.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, info};

use super::Persistence;
use crate::error::Result;
use crate::ratelimit::Snapshot;

/// Stores every identity's window in a single JSON object.
#[derive(Debug, Clone)]
pub struct JsonPersistence {
    path: PathBuf,
}

impl JsonPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Persistence for JsonPersistence {
    fn load(&self) -> Result<Snapshot> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No dump file found, starting empty");
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Snapshot::new());
        }

        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        info!(
            path = %self.path.display(),
            identities = snapshot.len(),
            "Loaded persisted windows"
        );
        Ok(snapshot)
    }

    fn dump(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec(snapshot)?;
        fs::write(&self.path, json)?;
        info!(
            path = %self.path.display(),
            identities = snapshot.len(),
            "Dumped windows"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WindowgateError;
    use crate::ratelimit::{Entry, GLOBAL_KEY};

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonPersistence::new(dir.path().join("dump.json"));

        assert!(persistence.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_empty_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        fs::write(&path, "").unwrap();

        assert!(JsonPersistence::new(path).load().unwrap().is_empty());
    }

    #[test]
    fn test_load_existing_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        fs::write(
            &path,
            r#"{"GLOBAL":[{"EpochTimestamp":1623591925,"Hits":3},{"EpochTimestamp":1623591927,"Hits":1}],
                "10.0.0.1":[{"EpochTimestamp":1623591927,"Hits":1}]}"#,
        )
        .unwrap();

        let snapshot = JsonPersistence::new(path).load().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot[GLOBAL_KEY],
            vec![Entry::new(1623591925, 3), Entry::new(1623591927, 1)]
        );
        assert_eq!(snapshot["10.0.0.1"], vec![Entry::new(1623591927, 1)]);
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        fs::write(&path, "{not json").unwrap();

        let result = JsonPersistence::new(path).load();
        assert!(matches!(result, Err(WindowgateError::Json(_))));
    }

    #[test]
    fn test_dump_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonPersistence::new(dir.path().join("dump.json"));

        let mut first = Snapshot::new();
        first.insert("10.0.0.1".to_string(), vec![Entry::new(100, 1)]);
        first.insert("10.0.0.2".to_string(), vec![Entry::new(100, 2)]);
        persistence.dump(&first).unwrap();

        let mut second = Snapshot::new();
        second.insert(GLOBAL_KEY.to_string(), vec![Entry::new(200, 5)]);
        persistence.dump(&second).unwrap();

        assert_eq!(persistence.load().unwrap(), second);
    }

    #[test]
    fn test_dump_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonPersistence::new(dir.path().join("missing").join("dump.json"));

        let result = persistence.dump(&Snapshot::new());
        assert!(matches!(result, Err(WindowgateError::Io(_))));
    }
}
