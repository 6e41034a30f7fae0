//! Restartable reader for one followed path.
//!
//! `FileCursor` performs a single non-blocking poll at a time: it reads
//! whatever complete lines have been appended since the previous poll and
//! then checks whether the path still names the file it has open. The poller
//! thread in [`super::worker`] drives it on a fixed interval.
//!
//! Rotation (the path now names a different file) drains the old handle to
//! its end before switching. Truncation restarts from offset zero and
//! discards any partial line. It is detected either by the file being shorter
//! than the consumed offset or by the last consumed bytes (up to
//! [`FINGERPRINT_BYTES`]) no longer matching what the file holds before the
//! offset, which catches a file truncated and rewritten past the old offset
//! between two polls.

use std::{
    fs::{self, File, Metadata},
    io::{self, Read, Seek, SeekFrom},
    mem,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use encoding_rs::Encoding;
use log::{info, warn};

use super::config::{StartPosition, TailConfig};
use crate::rate_limited_warner::RateLimitedWarner;

/// Maximum number of bytes consumed by a single poll.
pub(crate) const READ_CHUNK: u64 = 64 * 1024;
/// Number of consumed bytes re-read on every poll to detect rewrites.
pub(crate) const FINGERPRINT_BYTES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        let created = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            dev: 0,
            ino: created,
        }
    }
}

/// Result of a single [`FileCursor::poll`].
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Complete lines read during this poll, in file order.
    Lines(Vec<String>),
    /// Nothing new.
    Idle,
    /// The path has been missing for longer than the reopen timeout.
    Gone,
}

enum PathState {
    Current,
    Replaced,
    Missing,
    Unreadable(io::Error),
}

/// Tracks the read position within a followed file.
pub struct FileCursor {
    path: PathBuf,
    file: File,
    identity: FileIdentity,
    offset: u64,
    /// The bytes immediately before `offset`, at most `FINGERPRINT_BYTES`.
    fingerprint: Vec<u8>,
    partial: Vec<u8>,
    discarding: bool,
    missing_since: Option<Instant>,
    encoding: &'static Encoding,
    max_line_bytes: usize,
    reopen_timeout: Option<Duration>,
    decode_warner: RateLimitedWarner,
    reopen_warner: RateLimitedWarner,
}

impl FileCursor {
    /// Open `path` and position the cursor according to `config.start`.
    pub fn open(path: impl Into<PathBuf>, config: &TailConfig) -> io::Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let meta = file.metadata()?;
        let offset = match config.start {
            StartPosition::End => meta.len(),
            StartPosition::Beginning => 0,
            StartPosition::Offset(offset) => offset,
        };
        let fingerprint = read_fingerprint(&mut file, offset, FINGERPRINT_BYTES)?;
        Ok(Self {
            path,
            identity: FileIdentity::of(&meta),
            file,
            offset,
            fingerprint,
            partial: Vec::new(),
            discarding: false,
            missing_since: None,
            encoding: config.encoding,
            max_line_bytes: config.max_line_bytes.max(1),
            reopen_timeout: config.reopen_timeout,
            decode_warner: RateLimitedWarner::default(),
            reopen_warner: RateLimitedWarner::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next unread byte in the current file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read newly appended lines and follow rotation or truncation.
    pub fn poll(&mut self, now: Instant) -> PollOutcome {
        let mut lines = Vec::new();
        if !self.read_available(&mut lines) {
            return PollOutcome::Lines(lines);
        }
        match self.check_path() {
            PathState::Current => self.missing_since = None,
            PathState::Replaced => {
                self.flush_partial(&mut lines);
                match self.reopen() {
                    Ok(()) => {
                        info!("{} was rotated; following the new file", self.path.display());
                        self.read_available(&mut lines);
                    }
                    Err(err) => {
                        if self.unavailable(now, err) && lines.is_empty() {
                            return PollOutcome::Gone;
                        }
                    }
                }
            }
            PathState::Unreadable(err) => {
                if self.unavailable(now, err) {
                    self.flush_partial(&mut lines);
                    if lines.is_empty() {
                        return PollOutcome::Gone;
                    }
                }
            }
            PathState::Missing => {
                if self.missing_since.is_none() {
                    info!(
                        "{} was removed; waiting for it to reappear",
                        self.path.display()
                    );
                }
                if self.unavailable_expired(now) {
                    self.flush_partial(&mut lines);
                    if lines.is_empty() {
                        return PollOutcome::Gone;
                    }
                }
            }
        }
        if lines.is_empty() {
            PollOutcome::Idle
        } else {
            PollOutcome::Lines(lines)
        }
    }

    /// Start or continue the unavailability clock after `err`.
    ///
    /// Returns `true` once the path has been unusable for the reopen timeout.
    fn unavailable(&mut self, now: Instant, err: io::Error) -> bool {
        self.reopen_warner.record_drop();
        self.reopen_warner.warn_if_due(|count| {
            warn!(
                "cannot reopen {} ({count} attempts): {err}",
                self.path.display()
            );
        });
        self.unavailable_expired(now)
    }

    fn unavailable_expired(&mut self, now: Instant) -> bool {
        let since = *self.missing_since.get_or_insert(now);
        self.reopen_timeout
            .is_some_and(|timeout| now.duration_since(since) >= timeout)
    }

    /// True when the file no longer holds the bytes consumed before `offset`.
    fn rewritten(&mut self) -> bool {
        if self.fingerprint.is_empty() {
            return false;
        }
        match read_fingerprint(&mut self.file, self.offset, self.fingerprint.len()) {
            Ok(current) => current != self.fingerprint,
            Err(err) => {
                warn!("failed to read {}: {err}", self.path.display());
                false
            }
        }
    }

    fn restart(&mut self) {
        self.offset = 0;
        self.fingerprint.clear();
        self.partial.clear();
        self.discarding = false;
    }

    fn remember_consumed(&mut self, buf: &[u8]) {
        self.fingerprint.extend_from_slice(buf);
        let excess = self.fingerprint.len().saturating_sub(FINGERPRINT_BYTES);
        self.fingerprint.drain(..excess);
    }

    /// Returns `false` when more data is pending beyond this poll's chunk.
    fn read_available(&mut self, lines: &mut Vec<String>) -> bool {
        let len = match self.file.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!("failed to stat {}: {err}", self.path.display());
                return true;
            }
        };
        if len < self.offset || self.rewritten() {
            info!(
                "{} was truncated; resuming from the start",
                self.path.display()
            );
            self.restart();
        }
        if len == self.offset {
            return true;
        }
        let mut buf = Vec::new();
        let file = &mut self.file;
        let read = file
            .seek(SeekFrom::Start(self.offset))
            .and_then(|_| file.take(READ_CHUNK).read_to_end(&mut buf));
        match read {
            Ok(n) => {
                self.offset += n as u64;
                self.remember_consumed(&buf);
                self.split_lines(&buf, lines);
                self.offset >= len
            }
            Err(err) => {
                warn!(
                    "failed to read {}: {err}; skipping {} bytes",
                    self.path.display(),
                    len - self.offset
                );
                self.offset = len;
                self.fingerprint.clear();
                self.partial.clear();
                self.discarding = false;
                true
            }
        }
    }

    fn check_path(&self) -> PathState {
        match fs::metadata(&self.path) {
            Ok(meta) if self.identity == FileIdentity::of(&meta) => PathState::Current,
            Ok(_) => PathState::Replaced,
            Err(err) if err.kind() == io::ErrorKind::NotFound => PathState::Missing,
            Err(err) => PathState::Unreadable(err),
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = File::open(&self.path)?;
        let meta = file.metadata()?;
        self.identity = FileIdentity::of(&meta);
        self.file = file;
        self.restart();
        self.missing_since = None;
        self.reopen_warner.flush(|count| {
            warn!(
                "reopened {} after {count} failed attempts",
                self.path.display()
            );
        });
        Ok(())
    }

    fn split_lines(&mut self, buf: &[u8], lines: &mut Vec<String>) {
        let mut rest = buf;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let segment = &rest[..pos];
            rest = &rest[pos + 1..];
            if self.discarding {
                self.discarding = false;
                continue;
            }
            self.partial.extend_from_slice(segment);
            let line = mem::take(&mut self.partial);
            self.push_line(line, lines);
        }
        if self.discarding {
            return;
        }
        self.partial.extend_from_slice(rest);
        if self.partial.len() > self.max_line_bytes {
            let line = mem::take(&mut self.partial);
            self.push_line(line, lines);
            self.discarding = true;
        }
    }

    fn flush_partial(&mut self, lines: &mut Vec<String>) {
        let line = mem::take(&mut self.partial);
        if !line.is_empty() && !self.discarding {
            self.push_line(line, lines);
        }
        self.discarding = false;
    }

    fn push_line(&self, mut line: Vec<u8>, lines: &mut Vec<String>) {
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        let (text, had_errors) = if line.len() > self.max_line_bytes {
            warn!(
                "line in {} exceeds {} bytes; truncating",
                self.path.display(),
                self.max_line_bytes
            );
            line.truncate(self.max_line_bytes);
            self.decode_cut(&line)
        } else {
            let (text, had_errors) = self.encoding.decode_without_bom_handling(&line);
            (text.into_owned(), had_errors)
        };
        if had_errors {
            self.decode_warner.record_drop();
            self.decode_warner.warn_if_due(|count| {
                warn!(
                    "{count} lines in {} contained malformed {} sequences",
                    self.path.display(),
                    self.encoding.name()
                );
            });
        }
        lines.push(text);
    }

    /// Decode a line cut at an arbitrary byte.
    ///
    /// The input is not treated as final, so a character split by the cut is
    /// dropped instead of being replaced with U+FFFD.
    fn decode_cut(&self, bytes: &[u8]) -> (String, bool) {
        let mut decoder = self.encoding.new_decoder_without_bom_handling();
        let capacity = decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len().saturating_mul(3));
        let mut text = String::with_capacity(capacity);
        let (_, _, had_errors) = decoder.decode_to_string(bytes, &mut text, false);
        (text, had_errors)
    }
}

/// Read the bytes that precede `offset`, at most [`FINGERPRINT_BYTES`].
/// Up to `len` bytes ending at `offset`.
fn read_fingerprint(file: &mut File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let start = offset.saturating_sub(len as u64);
    let mut buf = Vec::with_capacity(len);
    file.seek(SeekFrom::Start(start))?;
    file.take(offset - start).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
#[path = "cursor_tests.rs"]
mod tests;
