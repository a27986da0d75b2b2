//! Core rate limiter implementation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::counter::SlidingWindowCounter;
use super::entry::{Snapshot, GLOBAL_KEY};
use crate::error::Result;
use crate::persistence::Persistence;

/// Limits applied by a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    /// Hits admitted per identity within `ip_window_secs`
    pub allowed_rate: i64,
    /// Window of the global tally, in seconds
    pub global_window_secs: i64,
    /// Window of each identity's counter, in seconds
    pub ip_window_secs: i64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            allowed_rate: 15,
            global_window_secs: 60,
            ip_window_secs: 20,
        }
    }
}

/// Result of a single admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    /// Hits seen by the service within the global window, this one included
    pub global_hits: i64,
    /// The identity's window total after this decision
    pub identity_hits: i64,
    /// Whether the hit was turned away
    pub rejected: bool,
}

/// Admits or rejects hits per identity while keeping a global tally.
///
/// Every decision and every dump runs under a single lock, so decisions
/// across all identities are serialized.
pub struct RateLimiter {
    settings: LimiterSettings,
    /// Identity -> counter. Always contains [`GLOBAL_KEY`]; entries are
    /// never removed.
    counters: Mutex<HashMap<String, SlidingWindowCounter>>,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter, restoring state from `persistence`.
    pub fn new(settings: LimiterSettings, persistence: Arc<dyn Persistence>) -> Result<Self> {
        Self::with_clock(settings, persistence, Arc::new(SystemClock))
    }

    /// Create a rate limiter whose counters read time from `clock`.
    pub fn with_clock(
        settings: LimiterSettings,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let snapshot = persistence.load()?;

        let mut counters = HashMap::with_capacity(snapshot.len() + 1);
        for (identity, entries) in snapshot {
            let window_size = if identity == GLOBAL_KEY {
                settings.global_window_secs
            } else {
                settings.ip_window_secs
            };
            let counter = SlidingWindowCounter::with_clock(window_size, entries, clock.clone());
            counters.insert(identity, counter);
        }

        counters.entry(GLOBAL_KEY.to_string()).or_insert_with(|| {
            SlidingWindowCounter::with_clock(settings.global_window_secs, Vec::new(), clock.clone())
        });

        info!(
            identities = counters.len() - 1,
            allowed_rate = settings.allowed_rate,
            global_window_secs = settings.global_window_secs,
            ip_window_secs = settings.ip_window_secs,
            "Rate limiter restored"
        );

        Ok(Self {
            settings,
            counters: Mutex::new(counters),
            persistence,
            clock,
        })
    }

    /// Register a hit from `identity` and decide whether to admit it.
    ///
    /// The global tally always advances. An identity seen for the first time
    /// is always admitted. Otherwise the hit is rejected when the identity's
    /// current window already holds `allowed_rate` hits; rejected hits are
    /// not counted against the identity.
    pub fn hit(&self, identity: &str) -> HitOutcome {
        let mut counters = self.counters.lock();

        let global_hits = counters[GLOBAL_KEY].hit();

        let Some(counter) = counters.get(identity) else {
            debug!(identity, window_secs = self.settings.ip_window_secs, "Creating new identity counter");
            let counter = SlidingWindowCounter::with_clock(
                self.settings.ip_window_secs,
                Vec::new(),
                self.clock.clone(),
            );
            let identity_hits = counter.hit();
            counters.insert(identity.to_string(), counter);
            return HitOutcome {
                global_hits,
                identity_hits,
                rejected: false,
            };
        };

        let so_far = counter.count();
        trace!(identity, global_hits, so_far, "Checking rate limit");

        if so_far >= self.settings.allowed_rate {
            debug!(identity, hits = so_far, "Rate limit exceeded");
            return HitOutcome {
                global_hits,
                identity_hits: so_far,
                rejected: true,
            };
        }

        HitOutcome {
            global_hits,
            identity_hits: counter.hit(),
            rejected: false,
        }
    }

    /// Persist the current window of every identity that still has hits.
    ///
    /// Identities whose windows have decayed are left out of the snapshot
    /// but stay tracked in memory.
    pub fn dump(&self) -> Result<()> {
        let counters = self.counters.lock();

        let snapshot: Snapshot = counters
            .iter()
            .filter_map(|(identity, counter)| {
                let window = counter.window();
                (!window.is_empty()).then(|| (identity.clone(), window))
            })
            .collect();

        info!(
            tracked = counters.len(),
            persisted = snapshot.len(),
            "Dumping rate limiter state"
        );
        self.persistence.dump(&snapshot)
    }

    /// Current window total for `identity`, if it has ever been seen.
    pub fn count(&self, identity: &str) -> Option<i64> {
        let counters = self.counters.lock();
        counters.get(identity).map(|c| c.count())
    }

    /// Number of tracked identities, the global counter included.
    pub fn identity_count(&self) -> usize {
        self.counters.lock().len()
    }

    pub fn settings(&self) -> LimiterSettings {
        self.settings
    }
}
