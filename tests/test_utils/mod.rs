//! Shared helpers for the integration tests.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use femtoship::{
    delivery::RecordSink,
    envelope::{self, WireRecord},
    tail::TailConfig,
};

/// In-memory collector: keeps every byte the delivery loop writes.
#[derive(Clone, Default)]
pub struct CollectingSink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CollectingSink {
    pub fn records(&self) -> Vec<WireRecord> {
        let bytes = self.buffer.lock().expect("sink mutex poisoned").clone();
        envelope::decode_stream(&bytes).expect("collector received valid records")
    }

    /// Messages of the log records received, heartbeats skipped.
    pub fn messages(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                WireRecord::Log(log) => Some(log.message),
                WireRecord::Heartbeat { .. } => None,
            })
            .collect()
    }
}

impl Write for CollectingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("sink mutex poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RecordSink for CollectingSink {}

pub fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .expect("open for append");
    file.write_all(text.as_bytes()).expect("append to followed file");
}

/// Tail settings with a short poll so tests run quickly.
pub fn fast_tail() -> TailConfig {
    TailConfig::default().with_poll_interval(Duration::from_millis(10))
}
