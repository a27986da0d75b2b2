//! In-process persistence.

use parking_lot::Mutex;

use super::Persistence;
use crate::error::Result;
use crate::ratelimit::Snapshot;

/// Keeps the last dumped snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Snapshot>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot, as if it had been dumped earlier.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    /// The most recently dumped snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().clone()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Snapshot> {
        Ok(self.snapshot.lock().clone())
    }

    fn dump(&self, snapshot: &Snapshot) -> Result<()> {
        *self.snapshot.lock() = snapshot.clone();
        Ok(())
    }
}
