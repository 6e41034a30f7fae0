//! Configuration consumed by [`LineSource`](super::LineSource).

use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};

/// Default bounded queue capacity between the poller and its consumer.
pub const DEFAULT_LINE_CAPACITY: usize = 1024;
/// Default interval between polls of the followed file.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Upper bound for the poll interval so heartbeat-to-line latency stays small.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default maximum length of a single line in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1 << 20; // 1 MiB
/// Default wait for a removed file to reappear before the source ends.
pub const DEFAULT_REOPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Where following starts when the file is first opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// Skip existing content and follow only new lines.
    #[default]
    End,
    /// Ship the whole file, then follow.
    Beginning,
    /// Start at a byte offset. Offsets past the end restart from zero.
    Offset(u64),
}

impl std::str::FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "end" => Ok(Self::End),
            "beginning" | "start" => Ok(Self::Beginning),
            other => other
                .parse::<u64>()
                .map(Self::Offset)
                .map_err(|_| format!("invalid start position {other:?}")),
        }
    }
}

/// Tuning for the file follower.
#[derive(Clone, Debug)]
pub struct TailConfig {
    pub start: StartPosition,
    pub poll_interval: Duration,
    pub capacity: usize,
    pub max_line_bytes: usize,
    /// Encoding of the followed file.
    pub encoding: &'static Encoding,
    /// How long a removed file may stay missing; `None` waits forever.
    pub reopen_timeout: Option<Duration>,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            start: StartPosition::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            capacity: DEFAULT_LINE_CAPACITY,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            encoding: UTF_8,
            reopen_timeout: Some(DEFAULT_REOPEN_TIMEOUT),
        }
    }
}

impl TailConfig {
    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reopen_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reopen_timeout = timeout;
        self
    }
}
