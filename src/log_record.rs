//! Record types shipped to the collector.
//!
//! A [`ShipRecord`] wraps one observed line with the identity of the shipper
//! that observed it. A [`HeartbeatRecord`] carries only its creation time.

use std::fmt;

use chrono::{DateTime, Utc};

/// Identity stamped onto every record by this shipper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShipperIdentity {
    /// Host the followed file lives on.
    pub hostname: String,
    /// Name of the program whose output is followed.
    pub program: String,
    /// Process identifier reported alongside each line.
    pub pid: u32,
}

impl ShipperIdentity {
    pub fn new(hostname: impl Into<String>, program: impl Into<String>, pid: u32) -> Self {
        Self {
            hostname: hostname.into(),
            program: program.into(),
            pid,
        }
    }
}

impl Default for ShipperIdentity {
    fn default() -> Self {
        Self::new("localhost", "femtoship", std::process::id())
    }
}

/// One observed line, immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShipRecord {
    /// Instant the line was captured.
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub program: String,
    pub pid: u32,
    /// Raw line text without its terminator.
    pub message: String,
}

impl ShipRecord {
    /// Capture `message` now, stamped with `identity`.
    pub fn capture(identity: &ShipperIdentity, message: impl Into<String>) -> Self {
        Self::at(Utc::now(), identity, message)
    }

    /// Build a record with an explicit capture time.
    pub fn at(
        timestamp: DateTime<Utc>,
        identity: &ShipperIdentity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            hostname: identity.hostname.clone(),
            program: identity.program.clone(),
            pid: identity.pid,
            message: message.into(),
        }
    }
}

impl fmt::Display for ShipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}[{}]: {}",
            self.hostname, self.program, self.pid, self.message
        )
    }
}

/// Keep-alive marker emitted on every heartbeat tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub timestamp: DateTime<Utc>,
}

impl HeartbeatRecord {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
        }
    }
}
