//! Window entries and persisted snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved identity for the counter that tallies every hit.
pub const GLOBAL_KEY: &str = "GLOBAL";

/// All hits an identity received within one wall-clock second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unix timestamp in whole seconds
    #[serde(rename = "EpochTimestamp")]
    pub timestamp: i64,
    /// Number of hits coalesced into this second
    #[serde(rename = "Hits")]
    pub hits: i64,
}

impl Entry {
    pub fn new(timestamp: i64, hits: i64) -> Self {
        Self { timestamp, hits }
    }
}

/// Identity -> window mapping exchanged with persistence backends.
pub type Snapshot = HashMap<String, Vec<Entry>>;
