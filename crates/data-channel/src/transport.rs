//! Core [`Transport`] over a tokio `TcpStream`.

use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use purple_xfer::{Condition, Transport};
use tokio::net::TcpStream;
use tracing::debug;

/// A connected TCP stream handed to a transfer.
///
/// All I/O is non-blocking (`try_read`/`try_write`); readiness is polled
/// by [`TokioEventLoop`](crate::TokioEventLoop). Closing drops the stream.
pub struct TcpTransport {
    stream: Mutex<Option<TcpStream>>,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }
        Self {
            stream: Mutex::new(Some(stream)),
            peer,
            local,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_port(&self) -> u16 {
        self.local.map_or(0, |a| a.port())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_stream<T>(&self, f: impl FnOnce(&TcpStream) -> io::Result<T>) -> io::Result<T> {
        match self.lock().as_ref() {
            Some(stream) => f(stream),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

impl Transport for TcpTransport {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.with_stream(|s| s.try_read(buf))
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.with_stream(|s| s.try_write(buf))
    }

    fn poll_ready(&self, cx: &mut Context<'_>, condition: Condition) -> Poll<io::Result<()>> {
        match self.lock().as_ref() {
            Some(stream) => match condition {
                Condition::Read => stream.poll_read_ready(cx),
                Condition::Write => stream.poll_write_ready(cx),
            },
            None => Poll::Ready(Err(io::ErrorKind::NotConnected.into())),
        }
    }

    fn close(&self) {
        if let Some(stream) = self.lock().take() {
            debug!(peer = ?self.peer, "closing TCP transport");
            drop(stream);
        }
    }
}
