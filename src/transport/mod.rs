//! QUIC transport to the collector.
//!
//! A [`Session`] is one multiplexed, TLS 1.3 encrypted QUIC connection with
//! keep-alive and an idle timeout. It yields exactly one [`StreamHandle`],
//! the ordered sub-stream every record is written to. Plaintext is never
//! attempted.

mod config;
mod session;
mod stream;
mod tls;

#[cfg(test)]
pub(crate) mod test_collector;

pub use config::{
    DEFAULT_ALPN, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_KEEP_ALIVE,
    TransportConfig,
};
pub use session::Session;
pub use stream::StreamHandle;
pub use tls::TlsOptions;
