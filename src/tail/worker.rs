//! Poller thread feeding the bounded line queue.

use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use log::{debug, info};

use super::cursor::{FileCursor, PollOutcome};

/// Handles returned to the owning [`LineSource`](super::LineSource).
pub(crate) struct PollerParts {
    pub(crate) rx: Receiver<String>,
    pub(crate) stop_tx: Sender<()>,
    pub(crate) handle: JoinHandle<()>,
}

pub(crate) fn spawn_poller(
    cursor: FileCursor,
    poll_interval: Duration,
    capacity: usize,
) -> std::io::Result<PollerParts> {
    let (tx, rx) = bounded(capacity);
    let (stop_tx, stop_rx) = bounded(1);
    let handle = thread::Builder::new()
        .name("femtoship-tail".into())
        .spawn(move || poll_loop(cursor, tx, stop_rx, poll_interval))?;
    Ok(PollerParts {
        rx,
        stop_tx,
        handle,
    })
}

/// Poll until the file is gone, the consumer hangs up, or a stop arrives.
///
/// A full queue blocks the poller rather than dropping lines; the stop
/// channel is watched while blocked so shutdown is never delayed by it.
fn poll_loop(
    mut cursor: FileCursor,
    tx: Sender<String>,
    stop_rx: Receiver<()>,
    poll_interval: Duration,
) {
    loop {
        match cursor.poll(Instant::now()) {
            PollOutcome::Lines(lines) => {
                for line in lines {
                    select! {
                        send(tx, line) -> res => if res.is_err() {
                            debug!("line consumer for {} went away", cursor.path().display());
                            return;
                        },
                        recv(stop_rx) -> _ => return,
                    }
                }
                continue;
            }
            PollOutcome::Idle => {}
            PollOutcome::Gone => {
                info!(
                    "{} did not reappear; ending line source",
                    cursor.path().display()
                );
                return;
            }
        }
        select! {
            recv(stop_rx) -> _ => return,
            default(poll_interval) => {}
        }
    }
}
