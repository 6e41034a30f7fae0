//! Lifecycle of a delivery run.

use std::{fmt, io};

use log::{debug, error};

/// `Connecting -> Streaming -> Draining -> Terminated`.
///
/// A failed connect goes straight from `Connecting` to `Terminated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Connecting,
    Streaming,
    Draining,
    Terminated,
}

impl DeliveryState {
    pub fn can_advance_to(self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        matches!(
            (self, next),
            (Connecting, Streaming)
                | (Connecting, Terminated)
                | (Streaming, Draining)
                | (Draining, Terminated)
        )
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: DeliveryState) -> bool {
        if self.can_advance_to(next) {
            debug!("delivery state {self} -> {next}");
            *self = next;
            true
        } else {
            error!("invalid delivery state transition {self} -> {next}");
            false
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Connecting => "CONNECTING",
            DeliveryState::Streaming => "STREAMING",
            DeliveryState::Draining => "DRAINING",
            DeliveryState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// What was being written when the stream failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    Line,
    Heartbeat,
}

/// Why streaming stopped.
#[derive(Debug)]
pub enum Termination {
    /// A shutdown was requested through a [`ShutdownHandle`](super::ShutdownHandle).
    Shutdown,
    /// The followed file went away and the line sequence ended.
    SourceClosed,
    /// A write to the stream failed. Never retried.
    WriteFailed { during: WriteKind, error: io::Error },
    /// The collector finished or reset its side of the stream.
    PeerClosed(io::Error),
}

impl Termination {
    pub fn is_clean(&self) -> bool {
        !matches!(
            self,
            Termination::WriteFailed { .. } | Termination::PeerClosed(_)
        )
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() { 0 } else { 1 }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Shutdown => f.write_str("shutdown requested"),
            Termination::SourceClosed => f.write_str("followed file is gone"),
            Termination::WriteFailed { during, error } => {
                let what = match during {
                    WriteKind::Line => "log record",
                    WriteKind::Heartbeat => "heartbeat",
                };
                write!(f, "writing {what} failed: {error}")
            }
            Termination::PeerClosed(error) => write!(f, "collector closed the stream: {error}"),
        }
    }
}
