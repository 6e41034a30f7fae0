//! QUIC connection to the collector.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use log::{debug, info};
use quinn::{Connection, ConnectionError, Endpoint, TransportErrorCode, VarInt};
use tokio::runtime::{self, Runtime};

use super::{config::TransportConfig, stream::StreamHandle};
use crate::error::TransportError;

/// TLS alert raised when client and server share no application protocol.
const NO_APPLICATION_PROTOCOL_ALERT: u8 = 120;
/// How long closing waits for the close frame to leave the endpoint.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// The one open connection to the collector.
///
/// Owns a small Tokio runtime that drives the QUIC endpoint in the
/// background, so keep-alives flow while the delivery thread is blocked
/// waiting for lines. Hands out a single [`StreamHandle`]; closing the
/// session makes any in-flight write on that stream fail.
pub struct Session {
    addr: String,
    protocol: String,
    io_timeout: Duration,
    connection: Connection,
    endpoint: Endpoint,
    stream_opened: bool,
    closed: bool,
    runtime: Arc<Runtime>,
}

fn build_runtime() -> io::Result<Runtime> {
    runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("femtoship-quic")
        .enable_all()
        .build()
}

fn unspecified_for(target: SocketAddr) -> SocketAddr {
    if target.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    }
}

fn negotiated_protocol(connection: &Connection) -> Option<String> {
    let data = connection
        .handshake_data()?
        .downcast::<quinn::crypto::rustls::HandshakeData>()
        .ok()?;
    data.protocol
        .map(|proto| String::from_utf8_lossy(&proto).into_owned())
}

fn handshake_failure(err: ConnectionError, config: &TransportConfig) -> TransportError {
    let alpn_refused = TransportErrorCode::crypto(NO_APPLICATION_PROTOCOL_ALERT);
    match err {
        ConnectionError::ConnectionClosed(ref close) if close.error_code == alpn_refused => {
            TransportError::AlpnMismatch {
                expected: config.tls.alpn.clone(),
                negotiated: None,
            }
        }
        ConnectionError::TransportError(ref local) if local.code == alpn_refused => {
            TransportError::AlpnMismatch {
                expected: config.tls.alpn.clone(),
                negotiated: None,
            }
        }
        ConnectionError::TimedOut => TransportError::Connect {
            addr: config.address(),
            source: io::Error::new(io::ErrorKind::TimedOut, err),
        },
        err => TransportError::Handshake {
            addr: config.address(),
            reason: err.to_string(),
        },
    }
}

/// One handshake attempt against a resolved address.
async fn dial(
    target: SocketAddr,
    config: &TransportConfig,
    client_config: quinn::ClientConfig,
) -> Result<(Endpoint, Connection), TransportError> {
    let mut endpoint = Endpoint::client(unspecified_for(target))?;
    endpoint.set_default_client_config(client_config);
    let connecting =
        endpoint
            .connect(target, &config.tls.domain)
            .map_err(|err| TransportError::Handshake {
                addr: config.address(),
                reason: err.to_string(),
            })?;
    let connection = match tokio::time::timeout(config.connect_timeout, connecting).await {
        Ok(Ok(connection)) => connection,
        Ok(Err(err)) => return Err(handshake_failure(err, config)),
        Err(_) => {
            return Err(TransportError::Connect {
                addr: config.address(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no handshake within {:?}", config.connect_timeout),
                ),
            });
        }
    };
    let negotiated = negotiated_protocol(&connection);
    if negotiated.as_deref() != Some(config.tls.alpn.as_str()) {
        connection.close(VarInt::from_u32(0), b"unexpected protocol");
        return Err(TransportError::AlpnMismatch {
            expected: config.tls.alpn.clone(),
            negotiated,
        });
    }
    Ok((endpoint, connection))
}

impl Session {
    /// Resolve the collector and complete the QUIC handshake.
    ///
    /// Each resolved address gets one attempt bounded by `connect_timeout`.
    /// Fails unless the collector selects the configured ALPN identifier.
    pub fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let addr = config.address();
        let targets = config
            .socket_addrs()
            .map_err(|source| TransportError::Resolve {
                addr: addr.clone(),
                source,
            })?;
        let client_config = config.client_config()?;
        let runtime = Arc::new(build_runtime()?);

        let mut last_err = TransportError::Connect {
            addr: addr.clone(),
            source: io::Error::new(
                io::ErrorKind::NotFound,
                "address resolved to no socket addresses",
            ),
        };
        for target in targets {
            match runtime.block_on(dial(target, config, client_config.clone())) {
                Ok((endpoint, connection)) => {
                    info!(
                        "connected to collector {addr} ({target}) using {}",
                        config.tls.alpn
                    );
                    return Ok(Self {
                        addr,
                        protocol: config.tls.alpn.clone(),
                        io_timeout: config.idle_timeout,
                        connection,
                        endpoint,
                        stream_opened: false,
                        closed: false,
                        runtime,
                    });
                }
                Err(err) => {
                    debug!("connecting to {target} failed: {err}");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Open the session's only stream.
    ///
    /// The stream is bidirectional so the collector may answer; a second
    /// call fails with [`TransportError::StreamAlreadyOpen`].
    pub fn open_stream(&mut self) -> Result<StreamHandle, TransportError> {
        if self.stream_opened {
            return Err(TransportError::StreamAlreadyOpen);
        }
        let timeout = self.io_timeout;
        let connection = &self.connection;
        let opened = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, connection.open_bi()).await });
        let (send, recv) = match opened {
            Ok(Ok(pair)) => pair,
            Ok(Err(err)) => return Err(io::Error::other(err).into()),
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "collector granted no stream credit",
                )
                .into());
            }
        };
        self.stream_opened = true;
        debug!("opened stream {} to {}", send.id(), self.addr);
        Ok(StreamHandle::new(
            Arc::clone(&self.runtime),
            send,
            recv,
            self.io_timeout,
        ))
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    /// Protocol identifier agreed with the collector.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Close the connection and let the close frame reach the collector.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.connection.close(VarInt::from_u32(0), b"done");
        let endpoint = &self.endpoint;
        let idle = self
            .runtime
            .block_on(async { tokio::time::timeout(CLOSE_GRACE, endpoint.wait_idle()).await });
        if idle.is_err() {
            debug!("close frame to {} not confirmed within {CLOSE_GRACE:?}", self.addr);
        }
        info!("closed connection to collector {}", self.addr);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.addr)
            .field("remote", &self.connection.remote_address())
            .field("protocol", &self.protocol)
            .field("stream_opened", &self.stream_opened)
            .field("closed", &self.closed)
            .finish()
    }
}
