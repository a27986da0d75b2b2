//! Sliding-window rate limiting logic and state management.

mod clock;
mod counter;
mod entry;
mod limiter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{SlidingWindowCounter, DEFAULT_WINDOW_SECS};
pub use entry::{Entry, Snapshot, GLOBAL_KEY};
pub use limiter::{HitOutcome, LimiterSettings, RateLimiter};
