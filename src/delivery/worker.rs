//! The delivery loop: sole reader of the line queue, sole owner of the
//! heartbeat timer and sole writer to the stream.

use std::{
    convert::Infallible,
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use log::{error, info, warn};

use super::{
    config::DeliveryConfig,
    state::{DeliveryState, Termination, WriteKind},
};
use crate::{
    envelope,
    log_record::{HeartbeatRecord, ShipRecord, ShipperIdentity},
    pending::{AppendOutcome, PendingBuffer},
    rate_limited_warner::RateLimitedWarner,
    transport::StreamHandle,
};

/// Byte sink the delivery loop writes encoded records to.
pub trait RecordSink: Write {
    /// Take whatever the peer has sent back, without blocking.
    ///
    /// Returns the number of bytes consumed. An error means the peer has
    /// closed its side and the run must stop.
    fn drain_replies(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    /// Release the sink once streaming has stopped.
    fn close(self) -> io::Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

impl RecordSink for StreamHandle {
    fn drain_replies(&mut self) -> io::Result<usize> {
        StreamHandle::drain_replies(self)
    }

    fn close(self) -> io::Result<()> {
        StreamHandle::close(self)
    }
}

impl RecordSink for Vec<u8> {}

impl<W: RecordSink + ?Sized> RecordSink for &mut W {
    fn drain_replies(&mut self) -> io::Result<usize> {
        (**self).drain_replies()
    }
}

/// Requests a clean stop of a running [`DeliveryLoop`].
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Sender<()>,
}

impl ShutdownHandle {
    /// Ask the loop to stop after the record it is currently writing.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Receiving side of a shutdown channel.
///
/// Holds a sender of its own so dropping every [`ShutdownHandle`] never
/// looks like a shutdown request.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
    keep_open: Sender<()>,
}

/// Create a linked shutdown handle and signal.
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = bounded(1);
    (
        ShutdownHandle { tx: tx.clone() },
        ShutdownSignal {
            rx,
            keep_open: tx,
        },
    )
}

/// Counters reported when a delivery run ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub lines_sent: u64,
    pub heartbeats_sent: u64,
    pub encode_failures: u64,
    /// Bytes the collector sent back.
    pub reply_bytes: u64,
}

/// Multiplexes lines and heartbeats onto one sink.
pub struct DeliveryLoop<W: RecordSink> {
    sink: W,
    identity: ShipperIdentity,
    heartbeat_interval: Duration,
    pending: Arc<PendingBuffer>,
    shutdown: ShutdownSignal,
    state: DeliveryState,
    stats: DeliveryStats,
    encode_warner: RateLimitedWarner,
}

impl<W: RecordSink> DeliveryLoop<W> {
    /// Attach a loop to an already connected sink.
    pub fn new(
        sink: W,
        identity: ShipperIdentity,
        config: &DeliveryConfig,
        pending: Arc<PendingBuffer>,
    ) -> Self {
        match Self::connect(|| Ok::<_, Infallible>(sink), identity, config, pending) {
            Ok(delivery) => delivery,
            Err(never) => match never {},
        }
    }

    /// Run the connecting step and attach to the sink it yields.
    ///
    /// The run starts in `Connecting` and moves to `Streaming` once `open`
    /// succeeds. A failed `open` ends the run in `Terminated` and its error
    /// is returned.
    pub fn connect<E>(
        open: impl FnOnce() -> Result<W, E>,
        identity: ShipperIdentity,
        config: &DeliveryConfig,
        pending: Arc<PendingBuffer>,
    ) -> Result<Self, E> {
        let mut state = DeliveryState::Connecting;
        let sink = match open() {
            Ok(sink) => sink,
            Err(err) => {
                state.advance(DeliveryState::Terminated);
                return Err(err);
            }
        };
        state.advance(DeliveryState::Streaming);
        let (_, shutdown) = shutdown_channel();
        Ok(Self {
            sink,
            identity,
            heartbeat_interval: config.heartbeat_interval,
            pending,
            shutdown,
            state,
            stats: DeliveryStats::default(),
            encode_warner: RateLimitedWarner::default(),
        })
    }

    /// Listen on an externally created shutdown signal.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// A handle that stops this loop when triggered.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.keep_open.clone(),
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    /// Stream until the line sequence ends, a shutdown arrives, a write
    /// fails or the collector closes its side.
    ///
    /// Each event results in exactly one write, after which any replies are
    /// drained. The heartbeat timer starts when this is called and keeps its
    /// period regardless of line traffic. On return the loop is `Draining`;
    /// call [`finish`](Self::finish) to release the sink.
    pub fn run(&mut self, lines: &Receiver<String>) -> Termination {
        if self.state != DeliveryState::Streaming {
            error!("delivery loop is {}; refusing to stream", self.state);
            return Termination::Shutdown;
        }
        let ticker = tick(self.heartbeat_interval);
        let shutdown_rx = self.shutdown.rx.clone();
        let termination = loop {
            select! {
                recv(lines) -> line => match line {
                    Ok(line) => {
                        if let Err(error) = self.ship_line(line) {
                            break Termination::WriteFailed { during: WriteKind::Line, error };
                        }
                        if let Err(error) = self.collect_replies() {
                            break Termination::PeerClosed(error);
                        }
                    }
                    Err(_) => break Termination::SourceClosed,
                },
                recv(ticker) -> _ => {
                    if let Err(error) = self.ship_heartbeat() {
                        break Termination::WriteFailed { during: WriteKind::Heartbeat, error };
                    }
                    if let Err(error) = self.collect_replies() {
                        break Termination::PeerClosed(error);
                    }
                },
                recv(shutdown_rx) -> _ => break Termination::Shutdown,
            }
        };
        self.state.advance(DeliveryState::Draining);
        if termination.is_clean() {
            info!("delivery stopped: {termination}");
        } else {
            error!("delivery stopped: {termination}");
        }
        termination
    }

    /// Close the sink and report what was delivered.
    pub fn finish(mut self) -> DeliveryStats {
        if let Err(err) = self.sink.close() {
            warn!("closing the collector stream failed: {err}");
        }
        self.state.advance(DeliveryState::Terminated);
        self.encode_warner.flush(|count| {
            warn!("skipped {count} records that could not be encoded");
        });
        info!(
            "delivered {} lines and {} heartbeats",
            self.stats.lines_sent, self.stats.heartbeats_sent
        );
        self.stats
    }

    fn ship_line(&mut self, line: String) -> io::Result<()> {
        let record = ShipRecord::capture(&self.identity, line);
        let bytes = match envelope::encode(&record) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.note_encode_failure(&err);
                return Ok(());
            }
        };
        if let Err(err) = self.write_record(&bytes) {
            self.buffer_failed(record);
            return Err(err);
        }
        self.stats.lines_sent += 1;
        Ok(())
    }

    fn ship_heartbeat(&mut self) -> io::Result<()> {
        let bytes = match envelope::encode_heartbeat(&HeartbeatRecord::now()) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.note_encode_failure(&err);
                return Ok(());
            }
        };
        self.write_record(&bytes)?;
        self.stats.heartbeats_sent += 1;
        Ok(())
    }

    fn collect_replies(&mut self) -> io::Result<()> {
        let taken = self.sink.drain_replies()?;
        self.stats.reply_bytes += taken as u64;
        Ok(())
    }

    fn write_record(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.sink.write_all(bytes)?;
        self.sink.flush()
    }

    fn buffer_failed(&self, record: ShipRecord) {
        match self.pending.append(record) {
            AppendOutcome::Stored => {
                info!(
                    "kept undelivered record in memory ({} pending)",
                    self.pending.len()
                );
            }
            AppendOutcome::Evicted(_) => {
                warn!("pending buffer full; evicted its oldest record");
            }
            AppendOutcome::Rejected(_) => {
                warn!("pending buffer full; undelivered record discarded");
            }
        }
    }

    fn note_encode_failure(&mut self, err: &crate::error::EnvelopeError) {
        self.stats.encode_failures += 1;
        self.encode_warner.record_drop();
        self.encode_warner.warn_if_due(|count| {
            warn!("skipped {count} records that could not be encoded: {err}");
        });
    }
}
