//! Inactivity bounds for accepted client connections.
//!
//! hyper only bounds reading the request head. A client that stops reading
//! its response, or that holds a keep-alive connection open without sending,
//! is cut off here instead.

use axum_server::accept::Accept;
use std::future::{ready, Future, Ready};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

/// Idle connections are closed after this long without any traffic.
pub const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// A response write that makes no progress for this long fails.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection inactivity limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// No bytes read or written
    pub idle: Duration,
    /// A pending write without progress
    pub write: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            idle: CONNECTION_IDLE_TIMEOUT,
            write: WRITE_TIMEOUT,
        }
    }
}

/// Acceptor wrapping every connection in an [`IdleTimeoutStream`].
///
/// Placed under the TLS acceptor so the handshake is bounded too.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleTimeoutAcceptor {
    timeouts: ConnectionTimeouts,
}

impl IdleTimeoutAcceptor {
    /// Acceptor applying `timeouts` to every connection.
    #[must_use]
    pub const fn new(timeouts: ConnectionTimeouts) -> Self {
        Self { timeouts }
    }
}

impl<I, S> Accept<I, S> for IdleTimeoutAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin,
{
    type Stream = IdleTimeoutStream<I>;
    type Service = S;
    type Future = Ready<io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        ready(Ok((IdleTimeoutStream::new(stream, self.timeouts), service)))
    }
}

/// Stream failing with [`io::ErrorKind::TimedOut`] once it goes quiet.
///
/// Any completed read or write pushes the idle deadline back and disarms
/// the write deadline.
#[derive(Debug)]
pub struct IdleTimeoutStream<S> {
    inner: S,
    timeouts: ConnectionTimeouts,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> IdleTimeoutStream<S> {
    /// Wrap a connection.
    pub fn new(inner: S, timeouts: ConnectionTimeouts) -> Self {
        Self {
            inner,
            timeouts,
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// The wrapped connection
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn touch(&mut self) {
        let now = Instant::now();
        if let Some(deadline) = self.read_deadline.as_mut() {
            deadline.as_mut().reset(now + self.timeouts.idle);
        }
        // Re-armed by the next write that stalls.
        self.write_deadline = None;
    }
}

fn elapsed(slot: &mut Option<Pin<Box<Sleep>>>, limit: Duration, cx: &mut Context<'_>) -> bool {
    slot.get_or_insert_with(|| Box::pin(sleep(limit)))
        .as_mut()
        .poll(cx)
        .is_ready()
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("client connection {what} timed out"))
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleTimeoutStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.touch();
                Poll::Ready(result)
            }
            Poll::Pending if elapsed(&mut this.read_deadline, this.timeouts.idle, cx) => {
                Poll::Ready(Err(timed_out("idle")))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleTimeoutStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.touch();
                Poll::Ready(result)
            }
            Poll::Pending if elapsed(&mut this.write_deadline, this.timeouts.write, cx) => {
                Poll::Ready(Err(timed_out("write")))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.touch();
                Poll::Ready(result)
            }
            Poll::Pending if elapsed(&mut this.write_deadline, this.timeouts.write, cx) => {
                Poll::Ready(Err(timed_out("write")))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
