//! The single ordered stream carried by a [`Session`](super::Session).

use std::{
    future::Future,
    io::{self, Write},
    pin::pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::Duration,
};

use log::debug;
use quinn::{RecvStream, SendStream};
use tokio::runtime::Runtime;

/// Largest reply chunk taken per read.
const REPLY_CHUNK: usize = 4096;

/// Both directions of the collector stream.
///
/// Only one exists per session and it is not `Clone`: whoever owns it is the
/// only writer, so records can never interleave on the wire.
pub struct StreamHandle {
    send: SendStream,
    recv: RecvStream,
    io_timeout: Duration,
    runtime: Arc<Runtime>,
}

impl StreamHandle {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        send: SendStream,
        recv: RecvStream,
        io_timeout: Duration,
    ) -> Self {
        Self {
            send,
            recv,
            io_timeout,
            runtime,
        }
    }

    /// Consume replies the collector has already sent, without waiting.
    ///
    /// Returns the number of reply bytes taken. Fails once the collector has
    /// finished or reset its side of the stream.
    pub fn drain_replies(&mut self) -> io::Result<usize> {
        let mut buf = [0u8; REPLY_CHUNK];
        let mut total = 0;
        let mut cx = Context::from_waker(Waker::noop());
        loop {
            let polled = pin!(self.recv.read(&mut buf)).poll(&mut cx);
            match polled {
                Poll::Pending => return Ok(total),
                Poll::Ready(Ok(Some(n))) => {
                    debug!(
                        "collector replied: {}",
                        String::from_utf8_lossy(&buf[..n]).trim_end()
                    );
                    total += n;
                }
                Poll::Ready(Ok(None)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "collector finished its side of the stream",
                    ));
                }
                Poll::Ready(Err(err)) => return Err(io::Error::other(err)),
            }
        }
    }

    /// Finish the stream and wait until the collector has everything.
    ///
    /// Waits at most the idle timeout for the collector to acknowledge.
    pub fn close(mut self) -> io::Result<()> {
        self.send.finish().map_err(io::Error::other)?;
        let timeout = self.io_timeout;
        let send = &mut self.send;
        let stopped = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, send.stopped()).await });
        match stopped {
            Ok(Ok(None)) => Ok(()),
            Ok(Ok(Some(code))) => {
                debug!("collector stopped the stream with code {code}");
                Ok(())
            }
            Ok(Err(err)) => Err(io::Error::other(err)),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("collector did not acknowledge the stream end within {timeout:?}"),
            )),
        }
    }
}

impl Write for StreamHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let timeout = self.io_timeout;
        let send = &mut self.send;
        let written = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, send.write_all(buf)).await });
        match written {
            Ok(Ok(())) => Ok(buf.len()),
            Ok(Err(err)) => Err(io::Error::other(err)),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("stream write stalled for {timeout:?}"),
            )),
        }
    }

    /// Written data is queued for transmission immediately.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.send.id())
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}
