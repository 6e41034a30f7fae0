//! Summarised warnings for events that may repeat in bursts.
//!
//! Dropped records, undecodable bytes and encode failures can occur once per
//! line. Logging each one would flood the local log, so callers count them
//! and emit one summary per interval.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default minimum spacing between summarised warnings.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct WarnState {
    last_warned: Option<Instant>,
    suppressed: u64,
}

/// Counts repeated events and reports them at most once per interval.
///
/// The first summary is due immediately; later ones wait for `interval` to
/// pass since the previous summary. [`flush`](Self::flush) reports whatever
/// is outstanding regardless of timing.
#[derive(Debug)]
pub struct RateLimitedWarner {
    state: Mutex<WarnState>,
    interval: Duration,
}

impl Default for RateLimitedWarner {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_INTERVAL)
    }
}

impl RateLimitedWarner {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(WarnState::default()),
            interval,
        }
    }

    /// Count one occurrence.
    pub fn record_drop(&self) {
        self.state.lock().suppressed += 1;
    }

    /// Occurrences not yet reported.
    pub fn outstanding(&self) -> u64 {
        self.state.lock().suppressed
    }

    /// Call `warn` with the outstanding count if the interval has passed.
    pub fn warn_if_due(&self, warn: impl FnOnce(u64)) {
        let now = Instant::now();
        let count = {
            let mut state = self.state.lock();
            let due = state
                .last_warned
                .is_none_or(|last| now.duration_since(last) >= self.interval);
            if !due || state.suppressed == 0 {
                return;
            }
            state.last_warned = Some(now);
            std::mem::take(&mut state.suppressed)
        };
        warn(count);
    }

    /// Report anything outstanding immediately.
    pub fn flush(&self, warn: impl FnOnce(u64)) {
        let count = {
            let mut state = self.state.lock();
            if state.suppressed == 0 {
                return;
            }
            state.last_warned = Some(Instant::now());
            std::mem::take(&mut state.suppressed)
        };
        warn(count);
    }
}
