//! Error types shared across the shipper.
//!
//! Each layer owns a small `thiserror` enum. Only [`ShipError`] is fatal:
//! it is returned while connecting or opening the followed file and maps to
//! a non-zero process exit code.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while validating or loading shipper configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid shipper configuration: {0}")]
    InvalidConfig(String),
    /// Configuration file could not be read or parsed.
    #[error("failed to load configuration file: {0}")]
    Ini(#[from] ini::Error),
    /// Underlying I/O error whilst building the shipper.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures establishing or using the encrypted transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The collector address did not resolve to any socket address.
    #[error("could not resolve collector address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// TLS or QUIC parameters could not be turned into a client config.
    #[error("cannot set up the collector transport: {0}")]
    Setup(String),
    /// Every resolved address refused or timed out.
    #[error("unable to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// The QUIC/TLS handshake was rejected.
    #[error("handshake with {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },
    /// The collector did not agree on the application protocol.
    #[error("collector negotiated protocol {negotiated:?}, expected {expected:?}")]
    AlpnMismatch {
        expected: String,
        negotiated: Option<String>,
    },
    /// The session already handed out its only stream.
    #[error("stream already opened for this session")]
    StreamAlreadyOpen,
    /// Socket or runtime level failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Envelope serialisation failures.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The record could not be serialised.
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
    /// The payload was not a valid JSON object.
    #[error("failed to decode record: {0}")]
    Decode(#[source] serde_json::Error),
    /// A log record was missing one of its content fields.
    #[error("log record is missing field `{0}`")]
    MissingField(&'static str),
}

/// Fatal errors that stop the shipper before streaming starts.
#[derive(Debug, Error)]
pub enum ShipError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] BuildError),
    /// The followed file could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The connection to the collector could not be established.
    #[error("failed to connect to collector {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: TransportError,
    },
    /// The connection was established but the stream could not be opened.
    #[error("failed to open stream to collector {addr}: {source}")]
    StreamOpen {
        addr: String,
        #[source]
        source: TransportError,
    },
}

impl ShipError {
    /// Process exit code reported for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShipError::Config(_) => 2,
            _ => 1,
        }
    }
}
