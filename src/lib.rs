//! Log shipping client.
//!
//! Follows a growing text file and forwards every new line, wrapped in a
//! JSON envelope, over one ordered stream of a persistent QUIC connection
//! to a remote collector. Heartbeats keep the stream alive while the file
//! is quiet.
//!
//! ```no_run
//! use femtoship::{builder::ShipperBuilder, shipper::Shipper};
//!
//! let config = ShipperBuilder::new()
//!     .with_path("/var/log/app.log")
//!     .with_collector("collector.example.com", 8081)
//!     .build()?;
//! let report = Shipper::new(config).run()?;
//! std::process::exit(report.exit_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod file_config;
pub mod log_record;
pub mod pending;
pub mod rate_limited_warner;
pub mod shipper;
pub mod tail;
pub mod transport;

pub use builder::{ShipperBuilder, ShipperConfig};
pub use error::{BuildError, EnvelopeError, ShipError, TransportError};
pub use log_record::{HeartbeatRecord, ShipRecord, ShipperIdentity};
pub use shipper::{ShipReport, Shipper};
