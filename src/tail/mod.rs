//! File follower producing a lazy sequence of lines.
//!
//! [`LineSource`] owns a poller thread that reads the followed file through a
//! [`FileCursor`] and pushes complete lines into a bounded channel. Callers
//! either block on [`LineSource::next_line`] or wait on
//! [`LineSource::lines`] inside a `select!` alongside other channels.
//! Polling rather than filesystem notifications keeps the follower correct on
//! network mounts and across rotation.

mod config;
mod cursor;
mod worker;

use std::{
    io,
    path::{Path, PathBuf},
    thread::JoinHandle,
};

use crossbeam_channel::{Receiver, Sender};
use log::warn;

pub use config::{
    DEFAULT_LINE_CAPACITY, DEFAULT_MAX_LINE_BYTES, DEFAULT_POLL_INTERVAL, DEFAULT_REOPEN_TIMEOUT,
    MAX_POLL_INTERVAL, StartPosition, TailConfig,
};
pub use cursor::{FileCursor, PollOutcome};

/// A followed file exposed as a blocking sequence of lines.
pub struct LineSource {
    path: PathBuf,
    rx: Receiver<String>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LineSource {
    /// Start following `path`.
    ///
    /// Fails if the file cannot be opened or the configuration is out of
    /// range. Later I/O errors are logged by the poller and never end the
    /// sequence.
    pub fn open(path: impl AsRef<Path>, config: TailConfig) -> io::Result<Self> {
        if config.poll_interval.is_zero() || config.poll_interval > MAX_POLL_INTERVAL {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "poll interval must be between 1ms and {}ms",
                    MAX_POLL_INTERVAL.as_millis()
                ),
            ));
        }
        if config.capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "line capacity must be greater than zero",
            ));
        }
        let path = path.as_ref().to_path_buf();
        let cursor = FileCursor::open(&path, &config)?;
        let parts = worker::spawn_poller(cursor, config.poll_interval, config.capacity)?;
        Ok(Self {
            path,
            rx: parts.rx,
            stop_tx: Some(parts.stop_tx),
            handle: Some(parts.handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the next line arrives; `None` once the sequence ended.
    pub fn next_line(&self) -> Option<String> {
        self.rx.recv().ok()
    }

    /// The queue of ready lines, for use with `select!`.
    ///
    /// The channel disconnects once the file is gone or the source stopped.
    pub fn lines(&self) -> &Receiver<String> {
        &self.rx
    }

    /// Stop polling and wait for the poller thread to exit.
    ///
    /// Lines already queued remain readable; the sequence then ends.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("LineSource: poller thread for {} panicked", self.path.display());
        }
    }
}

impl Iterator for LineSource {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line()
    }
}

impl Drop for LineSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource")
            .field("path", &self.path)
            .field("queued", &self.rx.len())
            .finish()
    }
}
