//! Connection parameters for the collector transport.

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use quinn::{IdleTimeout, crypto::rustls::QuicClientConfig};

use super::tls::TlsOptions;
use crate::error::TransportError;

/// Application protocol identifier negotiated during the TLS handshake.
pub const DEFAULT_ALPN: &str = "quic-log-protocol";
/// Default bound on the QUIC handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default interval between QUIC keep-alive packets.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);
/// Default silence after which the connection is considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how to reach the collector.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Hostname or IP address of the collector.
    pub host: String,
    pub port: u16,
    pub tls: TlsOptions,
    pub connect_timeout: Duration,
    /// Interval between keep-alive packets while the stream is quiet.
    pub keep_alive: Duration,
    /// Silence after which the connection is dropped; also bounds a stalled
    /// write.
    pub idle_timeout: Duration,
}

impl TransportConfig {
    /// Target `host:port`, verifying the certificate against `host`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            tls: TlsOptions::new(host.clone()),
            host,
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Parse a `host:port` or `[v6]:port` collector address.
    pub fn parse_address(addr: &str) -> Result<(String, u16), String> {
        let addr = addr.trim();
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| format!("collector address {addr:?} is missing a port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(format!("collector address {addr:?} is missing a host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("collector address {addr:?} has an invalid port"))?;
        Ok((host.to_owned(), port))
    }

    /// Human readable `host:port` used in diagnostics.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub(crate) fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }

    /// QUIC client config carrying the TLS options and liveness timers.
    pub(crate) fn client_config(&self) -> Result<quinn::ClientConfig, TransportError> {
        let crypto = QuicClientConfig::try_from(self.tls.client_config()?)
            .map_err(|err| TransportError::Setup(err.to_string()))?;
        let idle = IdleTimeout::try_from(self.idle_timeout)
            .map_err(|err| TransportError::Setup(format!("idle timeout: {err}")))?;
        let mut transport = quinn::TransportConfig::default();
        transport
            .keep_alive_interval(Some(self.keep_alive))
            .max_idle_timeout(Some(idle));
        let mut client = quinn::ClientConfig::new(Arc::new(crypto));
        client.transport_config(Arc::new(transport));
        Ok(client)
    }
}
