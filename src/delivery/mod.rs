//! Moves lines from the followed file onto the collector stream.
//!
//! A [`DeliveryLoop`] owns the single [`RecordSink`] for a run. Lines and
//! heartbeats are multiplexed on one thread, so records are never
//! interleaved and arrive in the order the file produced them. A failed
//! write ends the run: the affected line goes to the
//! [`PendingBuffer`](crate::pending::PendingBuffer) and nothing is retried.

mod config;
mod state;
mod worker;


pub use config::{DEFAULT_HEARTBEAT_INTERVAL, DeliveryConfig};
pub use state::{DeliveryState, Termination, WriteKind};
pub use worker::{
    DeliveryLoop, DeliveryStats, RecordSink, ShutdownHandle, ShutdownSignal, shutdown_channel,
};
