//! [`EventLoop`] implementation on a tokio runtime.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use purple_xfer::{Condition, ConnectCallback, EventLoop, InputCallback, Transport, WatchId};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::TCP_CONNECT_TIMEOUT;
use crate::transport::TcpTransport;

#[derive(Default)]
struct Watches {
    next_id: u64,
    tasks: HashMap<WatchId, AbortHandle>,
}

/// Runs each readiness watcher as a task that waits on the transport and
/// then invokes the core's callback.
///
/// Callbacks run on the runtime's worker threads and may do blocking file
/// I/O for one buffer at a time.
pub struct TokioEventLoop {
    handle: Handle,
    watches: Mutex<Watches>,
    connect_timeout: Duration,
}

impl TokioEventLoop {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            watches: Mutex::new(Watches::default()),
            connect_timeout: TCP_CONNECT_TIMEOUT,
        }
    }

    /// Binds to the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Number of live watchers.
    pub fn watch_count(&self) -> usize {
        self.lock().tasks.len()
    }

    fn lock(&self) -> MutexGuard<'_, Watches> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventLoop for TokioEventLoop {
    fn input_add(
        &self,
        transport: Arc<dyn Transport>,
        condition: Condition,
        mut callback: InputCallback,
    ) -> WatchId {
        // Held across spawn so a callback removing its own watcher always
        // finds it registered.
        let mut watches = self.lock();
        watches.next_id += 1;
        let id = WatchId(watches.next_id);

        let task = self.handle.spawn(async move {
            loop {
                let ready =
                    std::future::poll_fn(|cx| transport.poll_ready(cx, condition)).await;
                callback();
                if let Err(e) = ready {
                    debug!(watch = id.0, error = %e, "transport no longer pollable");
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        watches.tasks.insert(id, task.abort_handle());
        id
    }

    fn input_remove(&self, id: WatchId) -> bool {
        let task = self.lock().tasks.remove(&id);
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn connect(&self, host: &str, port: u16, callback: ConnectCallback) {
        let host = host.to_string();
        let timeout = self.connect_timeout;
        self.handle.spawn(async move {
            let result =
                match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await
                {
                    Ok(Ok(stream)) => {
                        debug!(%host, port, "connected");
                        Ok(Arc::new(TcpTransport::new(stream)) as Arc<dyn Transport>)
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => {
                        warn!(%host, port, "connect timed out");
                        Err(io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))
                    }
                };
            callback(result);
        });
    }
}

impl Drop for TokioEventLoop {
    fn drop(&mut self) {
        for (_, task) in self.lock().tasks.drain() {
            task.abort();
        }
    }
}
