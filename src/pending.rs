//! In-memory holding area for records that could not be delivered.
//!
//! Every access happens under a single `parking_lot::Mutex`; the lock is
//! held only for the queue mutation itself, never across I/O. The buffer is
//! bounded and its overflow policy is explicit. Contents live only as long
//! as the process does.

use std::collections::VecDeque;

use log::warn;
use parking_lot::Mutex;

use crate::{log_record::ShipRecord, rate_limited_warner::RateLimitedWarner};

/// Default number of undelivered records retained.
pub const DEFAULT_PENDING_CAPACITY: usize = 500;

/// What happens when a full buffer receives another record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest buffered record to make room.
    #[default]
    DropOldest,
    /// Keep the buffer as is and discard the incoming record.
    RejectNew,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "drop-oldest" => Ok(Self::DropOldest),
            "reject-new" => Ok(Self::RejectNew),
            other => Err(format!("unknown overflow policy {other:?}")),
        }
    }
}

/// Result of [`PendingBuffer::append`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored without eviction.
    Stored,
    /// Stored after evicting the oldest record, which is returned.
    Evicted(ShipRecord),
    /// Not stored because the buffer is full.
    Rejected(ShipRecord),
}

/// Bounded, lock-guarded queue of undelivered records.
#[derive(Debug)]
pub struct PendingBuffer {
    entries: Mutex<VecDeque<ShipRecord>>,
    capacity: usize,
    policy: OverflowPolicy,
    warner: RateLimitedWarner,
}

impl Default for PendingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY, OverflowPolicy::default())
    }
}

impl PendingBuffer {
    /// Create a buffer holding at most `capacity` records.
    ///
    /// A zero capacity keeps nothing: every append is an overflow.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            policy,
            warner: RateLimitedWarner::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Store a record that failed to send.
    pub fn append(&self, record: ShipRecord) -> AppendOutcome {
        let outcome = {
            let mut entries = self.entries.lock();
            if entries.len() < self.capacity {
                entries.push_back(record);
                AppendOutcome::Stored
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => match entries.pop_front() {
                        Some(oldest) => {
                            entries.push_back(record);
                            AppendOutcome::Evicted(oldest)
                        }
                        None => AppendOutcome::Rejected(record),
                    },
                    OverflowPolicy::RejectNew => AppendOutcome::Rejected(record),
                }
            }
        };
        if !matches!(outcome, AppendOutcome::Stored) {
            self.warner.record_drop();
            self.warner.warn_if_due(|count| {
                warn!(
                    "PendingBuffer full (capacity {}); dropped {count} undelivered records",
                    self.capacity
                );
            });
        }
        outcome
    }

    /// Atomically remove and return every buffered record, oldest first.
    pub fn drain_all(&self) -> Vec<ShipRecord> {
        let drained: Vec<ShipRecord> = self.entries.lock().drain(..).collect();
        self.warner.flush(|count| {
            warn!("PendingBuffer dropped {count} undelivered records before drain");
        });
        drained
    }

    /// Clone the buffered records without removing them.
    pub fn snapshot(&self) -> Vec<ShipRecord> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use rstest::rstest;

    use super::*;
    use crate::log_record::ShipperIdentity;

    fn record(message: &str) -> ShipRecord {
        ShipRecord::capture(&ShipperIdentity::new("h", "p", 1), message)
    }

    fn messages(records: &[ShipRecord]) -> Vec<&str> {
        records.iter().map(|r| r.message.as_str()).collect()
    }

    #[rstest]
    fn drain_returns_records_in_order_and_empties() {
        let buffer = PendingBuffer::default();
        buffer.append(record("a"));
        buffer.append(record("b"));
        let drained = buffer.drain_all();
        assert_eq!(messages(&drained), ["a", "b"]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[rstest]
    fn drop_oldest_evicts_front() {
        let buffer = PendingBuffer::new(2, OverflowPolicy::DropOldest);
        buffer.append(record("a"));
        buffer.append(record("b"));
        let outcome = buffer.append(record("c"));
        assert!(matches!(outcome, AppendOutcome::Evicted(r) if r.message == "a"));
        assert_eq!(messages(&buffer.snapshot()), ["b", "c"]);
    }

    #[rstest]
    fn reject_new_keeps_existing() {
        let buffer = PendingBuffer::new(1, OverflowPolicy::RejectNew);
        assert_eq!(buffer.append(record("a")), AppendOutcome::Stored);
        let outcome = buffer.append(record("b"));
        assert!(matches!(outcome, AppendOutcome::Rejected(r) if r.message == "b"));
        assert_eq!(messages(&buffer.snapshot()), ["a"]);
    }

    #[rstest]
    fn zero_capacity_keeps_nothing() {
        let buffer = PendingBuffer::new(0, OverflowPolicy::DropOldest);
        assert!(matches!(buffer.append(record("a")), AppendOutcome::Rejected(_)));
        assert!(buffer.is_empty());
    }

    #[rstest]
    #[case::drop_oldest("drop-oldest", OverflowPolicy::DropOldest)]
    #[case::underscore("DROP_OLDEST", OverflowPolicy::DropOldest)]
    #[case::reject("reject-new", OverflowPolicy::RejectNew)]
    fn parses_overflow_policy(#[case] text: &str, #[case] expected: OverflowPolicy) {
        assert_eq!(text.parse::<OverflowPolicy>().unwrap(), expected);
    }

    #[rstest]
    fn concurrent_appends_are_not_lost() {
        let buffer = Arc::new(PendingBuffer::new(1000, OverflowPolicy::RejectNew));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..50 {
                        buffer.append(record(&format!("{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.drain_all().len(), 200);
    }
}
