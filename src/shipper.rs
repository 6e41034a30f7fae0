//! Wires the follower, the transport and the delivery loop together.

use std::sync::Arc;

use log::{info, warn};

use crate::{
    builder::ShipperConfig,
    delivery::{
        DeliveryLoop, DeliveryStats, RecordSink, ShutdownHandle, ShutdownSignal, Termination,
        shutdown_channel,
    },
    error::ShipError,
    pending::PendingBuffer,
    tail::LineSource,
    transport::Session,
};

/// Outcome of a completed run.
#[derive(Debug)]
pub struct ShipReport {
    pub termination: Termination,
    pub stats: DeliveryStats,
    /// Records left in the pending buffer; lost when the process exits.
    pub undelivered: usize,
}

impl ShipReport {
    pub fn exit_code(&self) -> i32 {
        self.termination.exit_code()
    }
}

/// One shipping run from connect to termination.
pub struct Shipper {
    config: ShipperConfig,
    pending: Arc<PendingBuffer>,
    shutdown: ShutdownHandle,
    signal: ShutdownSignal,
}

impl Shipper {
    pub fn new(config: ShipperConfig) -> Self {
        let pending = Arc::new(PendingBuffer::new(
            config.delivery.pending_capacity,
            config.delivery.overflow,
        ));
        let (shutdown, signal) = shutdown_channel();
        Self {
            config,
            pending,
            shutdown,
            signal,
        }
    }

    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    /// Records whose write failed. Shared so callers can inspect them after
    /// the run.
    pub fn pending(&self) -> Arc<PendingBuffer> {
        Arc::clone(&self.pending)
    }

    /// Handle that stops the run cleanly, e.g. from a signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Open the file, connect and stream until termination.
    ///
    /// The file is opened before connecting so lines appended during the
    /// handshake are not skipped. File-open, connect and stream-open
    /// failures are fatal and returned as errors. A write failure during
    /// streaming is reported through the returned [`ShipReport`].
    pub fn run(self) -> Result<ShipReport, ShipError> {
        let addr = self.config.transport.address();
        info!(
            "shipping {} to {addr} as {}",
            self.config.path.display(),
            self.config.identity.program
        );
        let source = LineSource::open(&self.config.path, self.config.tail.clone()).map_err(
            |source| ShipError::FileOpen {
                path: self.config.path.clone(),
                source,
            },
        )?;

        let mut session = None;
        let transport = &self.config.transport;
        let delivery = DeliveryLoop::connect(
            || {
                let mut connected = Session::connect(transport).map_err(|source| {
                    ShipError::Connect {
                        addr: addr.clone(),
                        source,
                    }
                })?;
                match connected.open_stream() {
                    Ok(stream) => {
                        session = Some(connected);
                        Ok(stream)
                    }
                    Err(source) => {
                        connected.close();
                        Err(ShipError::StreamOpen {
                            addr: addr.clone(),
                            source,
                        })
                    }
                }
            },
            self.config.identity.clone(),
            &self.config.delivery,
            Arc::clone(&self.pending),
        )?;

        let report = self.deliver(delivery, source);
        if let Some(session) = session {
            session.close();
        }
        Ok(report)
    }

    /// Stream lines from an open source into an already connected sink.
    pub fn stream_to<W: RecordSink>(self, sink: W, source: LineSource) -> ShipReport {
        let delivery = DeliveryLoop::new(
            sink,
            self.config.identity.clone(),
            &self.config.delivery,
            Arc::clone(&self.pending),
        );
        self.deliver(delivery, source)
    }

    fn deliver<W: RecordSink>(
        self,
        delivery: DeliveryLoop<W>,
        mut source: LineSource,
    ) -> ShipReport {
        let Shipper {
            pending,
            signal,
            ..
        } = self;
        let mut delivery = delivery.with_shutdown(signal);
        let termination = delivery.run(source.lines());
        source.stop();
        let stats = delivery.finish();

        let undelivered = pending.len();
        if undelivered > 0 {
            warn!("{undelivered} records were not delivered and will be lost at exit");
        }
        ShipReport {
            termination,
            stats,
            undelivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        io::Write,
        net::UdpSocket,
        thread,
        time::{Duration, Instant},
    };

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        builder::ShipperBuilder,
        envelope::{self, WireRecord},
        tail::StartPosition,
        transport::{
            DEFAULT_ALPN,
            test_collector::{Behaviour, TestCollector},
        },
    };

    fn config(dir: &TempDir) -> ShipperConfig {
        ShipperBuilder::new()
            .with_collector("127.0.0.1", 1)
            .with_path(dir.path().join("app.log"))
            .with_start(StartPosition::Beginning)
            .with_poll_interval_ms(20)
            .with_heartbeat_ms(60_000)
            .build()
            .expect("valid config")
    }

    #[rstest]
    fn stream_to_ships_file_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        fs::write(&config.path, "one\ntwo\n").unwrap();
        let source = LineSource::open(&config.path, config.tail.clone()).unwrap();
        let shipper = Shipper::new(config);
        let handle = shipper.shutdown_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            handle.shutdown();
        });

        let mut sink = Vec::new();
        let report = shipper.stream_to(&mut sink, source);
        stopper.join().unwrap();

        assert!(matches!(report.termination, Termination::Shutdown));
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.stats.lines_sent, 2);
        assert_eq!(report.undelivered, 0);
        let records = envelope::decode_stream(&sink).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[rstest]
    fn unreachable_collector_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        fs::File::create(&config.path).unwrap().write_all(b"x\n").unwrap();
        let silent = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        config.transport.port = silent.local_addr().unwrap().port();
        config.transport.connect_timeout = Duration::from_millis(300);

        let err = Shipper::new(config).run().expect_err("nobody answers");
        assert!(matches!(err, ShipError::Connect { .. }), "unexpected {err:?}");
        assert_eq!(err.exit_code(), 1);
    }

    #[rstest]
    fn missing_file_fails_before_connecting() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        let silent = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        config.transport.port = silent.local_addr().unwrap().port();
        config.transport.connect_timeout = Duration::from_secs(10);

        let start = Instant::now();
        let err = Shipper::new(config).run().expect_err("file does not exist");
        assert!(matches!(err, ShipError::FileOpen { .. }), "unexpected {err:?}");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[rstest]
    fn run_ships_file_to_collector() {
        let collector = TestCollector::start(DEFAULT_ALPN, Behaviour::Collect);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one\ntwo\n").unwrap();
        let config = ShipperBuilder::new()
            .with_collector("127.0.0.1", collector.port())
            .with_server_name("localhost")
            .with_ca_file(collector.ca_file())
            .with_path(&path)
            .with_start(StartPosition::Beginning)
            .with_poll_interval_ms(20)
            .with_heartbeat_ms(60_000)
            .build()
            .expect("valid config");
        let shipper = Shipper::new(config);
        let handle = shipper.shutdown_handle();
        let runner = thread::spawn(move || shipper.run());

        thread::sleep(Duration::from_millis(500));
        handle.shutdown();
        let report = runner.join().unwrap().expect("run completes");
        assert!(matches!(report.termination, Termination::Shutdown));
        assert_eq!(report.stats.lines_sent, 2);

        let received = collector
            .received()
            .recv_timeout(Duration::from_secs(5))
            .expect("collector read the stream");
        let messages: Vec<String> = envelope::decode_stream(&received)
            .unwrap()
            .into_iter()
            .filter_map(|record| match record {
                WireRecord::Log(log) => Some(log.message),
                WireRecord::Heartbeat { .. } => None,
            })
            .collect();
        assert_eq!(messages, ["one", "two"]);
    }
}
