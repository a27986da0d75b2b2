//! Sliding-window hit counter.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::clock::{Clock, SystemClock};
use super::entry::Entry;

/// Window size used when a counter is configured with a non-positive one.
pub const DEFAULT_WINDOW_SECS: i64 = 60;

/// Tracks the number of hits an identity received over the trailing
/// `window_size` seconds.
///
/// Hits landing in the same second are coalesced into a single [`Entry`],
/// so memory is bounded by the window length rather than the request rate.
/// Stale entries are evicted lazily at the start of every operation.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    window_size: i64,
    state: Mutex<WindowState>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct WindowState {
    /// Strictly increasing by timestamp, one entry per second
    entries: VecDeque<Entry>,
    /// Sum of `hits` over `entries`
    total: i64,
}

impl WindowState {
    /// Drop every entry older than `now - window_size`.
    fn discard(&mut self, now: i64, window_size: i64) {
        let window_start = now - window_size;
        let mut diff: i64 = 0;
        while let Some(front) = self.entries.front() {
            if front.timestamp >= window_start {
                break;
            }
            diff = diff.saturating_add(front.hits);
            self.entries.pop_front();
        }
        self.total = self.total.saturating_sub(diff);
    }
}

impl SlidingWindowCounter {
    /// Create a counter seeded with previously persisted entries.
    pub fn new(window_size: i64, initial: Vec<Entry>) -> Self {
        Self::with_clock(window_size, initial, Arc::new(SystemClock))
    }

    /// Create a counter that reads time from `clock`.
    ///
    /// If the newest initial entry has already fallen out of the window the
    /// whole seed is discarded.
    pub fn with_clock(window_size: i64, initial: Vec<Entry>, clock: Arc<dyn Clock>) -> Self {
        let window_size = if window_size <= 0 {
            DEFAULT_WINDOW_SECS
        } else {
            window_size
        };

        let entries = coalesce(initial);
        let now = clock.now();
        let stale = entries
            .back()
            .is_some_and(|last| last.timestamp < now - window_size);
        let state = if stale {
            WindowState::default()
        } else {
            let total = entries
                .iter()
                .fold(0i64, |acc, e| acc.saturating_add(e.hits));
            WindowState { entries, total }
        };

        Self {
            window_size,
            state: Mutex::new(state),
            clock,
        }
    }

    /// Register one hit and return the new window total.
    pub fn hit(&self) -> i64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.discard(now, self.window_size);

        match state.entries.back_mut() {
            // A clock that stepped backwards folds into the newest bucket
            Some(last) if last.timestamp >= now => last.hits = last.hits.saturating_add(1),
            _ => state.entries.push_back(Entry::new(now, 1)),
        }
        state.total = state.total.saturating_add(1);
        state.total
    }

    /// Current window total. Evicts stale entries but registers no hit.
    pub fn count(&self) -> i64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.discard(now, self.window_size);
        state.total
    }

    /// Copy of the current window, oldest first.
    pub fn window(&self) -> Vec<Entry> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.discard(now, self.window_size);
        state.entries.iter().copied().collect()
    }

    /// Length of the trailing window in seconds.
    pub fn window_size(&self) -> i64 {
        self.window_size
    }
}

/// Sort entries by timestamp and merge any that share a second.
///
/// Hit counts come from a dump file, so merged sums saturate at `i64::MAX`.
fn coalesce(mut entries: Vec<Entry>) -> VecDeque<Entry> {
    entries.sort_by_key(|e| e.timestamp);
    let mut out: VecDeque<Entry> = VecDeque::with_capacity(entries.len());
    for entry in entries {
        match out.back_mut() {
            Some(last) if last.timestamp == entry.timestamp => {
                last.hits = last.hits.saturating_add(entry.hits)
            }
            _ => out.push_back(entry),
        }
    }
    out
}
