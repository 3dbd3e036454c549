//! Seams between the core and whatever event loop drives it.
//!
//! The core never blocks and never spawns. It registers readiness
//! watchers on a [`Transport`] through an [`EventLoop`] and expects the
//! loop to invoke the callback whenever the transport may make progress.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

/// Readiness condition a watcher waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Read,
    Write,
}

/// Handle returned by [`EventLoop::input_add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchId(pub u64);

/// A non-blocking byte stream owned by a transfer.
///
/// `try_read` returning `Ok(0)` means end of stream. Both calls return
/// `ErrorKind::WouldBlock` when no progress is possible right now.
pub trait Transport: Send + Sync {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Polls until the transport may be ready for `condition`. Loops that
    /// dispatch watchers explicitly never call this.
    fn poll_ready(&self, _cx: &mut Context<'_>, _condition: Condition) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Releases the underlying descriptor. Called at most once per
    /// transfer.
    fn close(&self);
}

/// Watcher callback, invoked each time the transport becomes ready.
pub type InputCallback = Box<dyn FnMut() + Send>;

/// Completion of [`EventLoop::connect`].
pub type ConnectCallback = Box<dyn FnOnce(io::Result<Arc<dyn Transport>>) + Send>;

/// The event loop the core schedules its pump on.
pub trait EventLoop: Send + Sync {
    fn input_add(
        &self,
        transport: Arc<dyn Transport>,
        condition: Condition,
        callback: InputCallback,
    ) -> WatchId;

    /// Returns `false` if the watcher was already gone.
    fn input_remove(&self, id: WatchId) -> bool;

    /// Opens an outbound connection and reports the result through
    /// `callback`, never synchronously from inside this call.
    fn connect(&self, host: &str, port: u16, callback: ConnectCallback);
}

struct Watch {
    condition: Condition,
    callback: Arc<Mutex<InputCallback>>,
}

struct PendingConnect {
    host: String,
    port: u16,
    callback: ConnectCallback,
}

#[derive(Default)]
struct ManualInner {
    next_id: u64,
    watches: BTreeMap<WatchId, Watch>,
    connects: VecDeque<PendingConnect>,
}

/// Deterministic event loop where the embedder decides when watchers
/// fire and how connects complete.
///
/// Useful for tests and for hosts that already own a loop and only want
/// to forward readiness into the core.
#[derive(Default)]
pub struct ManualEventLoop {
    inner: Mutex<ManualInner>,
}

impl ManualEventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fires one watcher. Returns `false` if it is not registered.
    ///
    /// The callback must not dispatch its own watcher again.
    pub fn dispatch(&self, id: WatchId) -> bool {
        let callback = match self.lock().watches.get(&id) {
            Some(watch) => Arc::clone(&watch.callback),
            None => return false,
        };
        let mut cb = callback.lock().unwrap_or_else(PoisonError::into_inner);
        (cb)();
        true
    }

    /// Fires every watcher registered at the time of the call, in
    /// registration order. Returns how many fired.
    pub fn dispatch_all(&self) -> usize {
        let ids: Vec<WatchId> = self.lock().watches.keys().copied().collect();
        ids.into_iter().filter(|id| self.dispatch(*id)).count()
    }

    pub fn watch_count(&self) -> usize {
        self.lock().watches.len()
    }

    pub fn watches(&self) -> Vec<(WatchId, Condition)> {
        self.lock()
            .watches
            .iter()
            .map(|(id, w)| (*id, w.condition))
            .collect()
    }

    /// `(host, port)` of every connect still waiting for completion.
    pub fn pending_connects(&self) -> Vec<(String, u16)> {
        self.lock()
            .connects
            .iter()
            .map(|c| (c.host.clone(), c.port))
            .collect()
    }

    /// Completes the oldest pending connect. Returns `false` if none.
    pub fn complete_connect(&self, result: io::Result<Arc<dyn Transport>>) -> bool {
        let pending = self.lock().connects.pop_front();
        match pending {
            Some(p) => {
                (p.callback)(result);
                true
            }
            None => false,
        }
    }
}

impl EventLoop for ManualEventLoop {
    fn input_add(
        &self,
        _transport: Arc<dyn Transport>,
        condition: Condition,
        callback: InputCallback,
    ) -> WatchId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = WatchId(inner.next_id);
        inner.watches.insert(
            id,
            Watch {
                condition,
                callback: Arc::new(Mutex::new(callback)),
            },
        );
        id
    }

    fn input_remove(&self, id: WatchId) -> bool {
        let removed = self.lock().watches.remove(&id);
        // Dropped outside the lock: the callback may own the last
        // reference to a transfer whose teardown re-enters the loop.
        removed.is_some()
    }

    fn connect(&self, host: &str, port: u16, callback: ConnectCallback) {
        self.lock().connects.push_back(PendingConnect {
            host: host.to_string(),
            port,
            callback,
        });
    }
}
