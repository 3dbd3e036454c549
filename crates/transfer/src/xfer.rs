use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::event_loop::{Transport, WatchId};
use crate::manager::Shared;
use crate::ops::XferOps;
use crate::pump::PumpLock;
use crate::readiness::ReadinessGate;
use crate::signals::{SignalBus, XferSignal};
use crate::types::{PromptKind, Thumbnail, XferId, XferProgress, XferRole, XferStatus};

/// Local side of the byte stream.
pub(crate) enum LocalIo {
    Closed,
    File(File),
    /// The UI's custom I/O is the source or sink.
    Ui,
}

pub(crate) struct XferState {
    pub(crate) status: XferStatus,
    pub(crate) message: Option<String>,
    pub(crate) filename: Option<String>,
    pub(crate) local_path: Option<PathBuf>,
    pub(crate) total_size: u64,
    pub(crate) bytes_transferred: u64,
    pub(crate) bytes_remaining: u64,
    pub(crate) buffer_size: usize,
    pub(crate) remote_ip: Option<String>,
    pub(crate) remote_port: u16,
    pub(crate) local_port: u16,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) end_time: Option<DateTime<Utc>>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) watcher: Option<WatchId>,
    pub(crate) local_io: LocalIo,
    /// Bytes read from the source but not yet accepted by the transport.
    /// `None` when the UI takes unsent data back itself.
    pub(crate) pending: Option<Vec<u8>>,
    pub(crate) ops: Option<Arc<dyn XferOps>>,
    pub(crate) gate: ReadinessGate,
    pub(crate) prompt: Option<PromptKind>,
    /// Reference held by the lifecycle between `request` and the
    /// terminal transition.
    pub(crate) keep_alive: Option<Arc<Transfer>>,
    /// Set once resources have been released.
    pub(crate) torn_down: bool,
    pub(crate) thumbnail: Option<Thumbnail>,
}

impl XferState {
    pub(crate) fn recompute_remaining(&mut self) {
        self.bytes_remaining = self.total_size.saturating_sub(self.bytes_transferred);
    }

    /// Applies a state-machine transition. Returns the signal to emit.
    pub(crate) fn transition(&mut self, role: XferRole, next: XferStatus) -> Option<XferSignal> {
        if !self.status.can_transition_to(next) {
            if self.status != next {
                debug!(from = %self.status, to = %next, "status change ignored");
            }
            return None;
        }
        debug!(from = %self.status, to = %next, "status");
        self.status = next;
        if next.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
        XferSignal::for_status(role, next)
    }
}

/// One file moving to or from a peer.
///
/// Created through [`XferManager::new_xfer`](crate::XferManager::new_xfer)
/// and shared as `Arc<Transfer>`. All methods take `&self`; collaborator
/// hooks are always invoked with the internal lock released so they may
/// call back into the transfer.
pub struct Transfer {
    id: XferId,
    role: XferRole,
    account: String,
    peer: String,
    me: Weak<Transfer>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) state: Mutex<XferState>,
    pub(crate) pump_lock: PumpLock,
}

impl Transfer {
    pub(crate) fn new(
        id: XferId,
        role: XferRole,
        account: &str,
        peer: &str,
        shared: Arc<Shared>,
    ) -> Arc<Self> {
        let ui_io = shared
            .ui_ops
            .as_ref()
            .is_some_and(|ui| ui.custom_io().is_some());
        let keeps_pending = !shared
            .ui_ops
            .as_ref()
            .is_some_and(|ui| ui.takes_unsent_data());
        let buffer_size = shared.config.initial_buffer_size;

        Arc::new_cyclic(|me| Self {
            id,
            role,
            account: account.to_string(),
            peer: peer.to_string(),
            me: me.clone(),
            state: Mutex::new(XferState {
                status: XferStatus::NotStarted,
                message: None,
                filename: None,
                local_path: None,
                total_size: 0,
                bytes_transferred: 0,
                bytes_remaining: 0,
                buffer_size,
                remote_ip: None,
                remote_port: 0,
                local_port: 0,
                start_time: None,
                end_time: None,
                transport: None,
                watcher: None,
                local_io: LocalIo::Closed,
                pending: keeps_pending.then(Vec::new),
                ops: None,
                gate: ReadinessGate::new(!ui_io),
                prompt: None,
                keep_alive: None,
                torn_down: false,
                thumbnail: None,
            }),
            pump_lock: PumpLock::default(),
            shared,
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, XferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A strong handle, or `None` while the transfer is being dropped.
    pub fn handle(&self) -> Option<Arc<Transfer>> {
        self.me.upgrade()
    }

    pub(crate) fn emit(&self, signal: Option<XferSignal>) {
        if let Some(sig) = signal {
            self.shared.signals.emit(sig, self);
        }
    }

    pub fn id(&self) -> XferId {
        self.id
    }

    pub fn role(&self) -> XferRole {
        self.role
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Name of the remote party.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn signals(&self) -> &SignalBus {
        &self.shared.signals
    }

    pub fn status(&self) -> XferStatus {
        self.lock().status
    }

    /// Moves the state machine and emits the matching lifecycle signal.
    ///
    /// Transitions the state machine forbids are ignored; returns whether
    /// the status changed. Terminal statuses set here do not release
    /// resources; use [`end`](Self::end) or the cancel calls for that.
    pub fn set_status(&self, status: XferStatus) -> bool {
        let signal = {
            let mut st = self.lock();
            let before = st.status;
            let sig = st.transition(self.role, status);
            if st.status == before {
                return false;
            }
            sig
        };
        self.emit(signal);
        true
    }

    pub fn is_completed(&self) -> bool {
        self.status() == XferStatus::Done
    }

    pub fn is_cancelled(&self) -> bool {
        self.status().is_cancelled()
    }

    pub fn ops(&self) -> Option<Arc<dyn XferOps>> {
        self.lock().ops.clone()
    }

    /// Installs the backend hooks. Must happen before [`request`](Self::request).
    pub fn set_ops(&self, ops: Arc<dyn XferOps>) {
        self.lock().ops = Some(ops);
    }

    pub fn message(&self) -> Option<String> {
        self.lock().message.clone()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.lock().message = Some(message.into());
    }

    /// Name shown to the user.
    pub fn filename(&self) -> Option<String> {
        self.lock().filename.clone()
    }

    pub fn set_filename(&self, name: impl Into<String>) {
        self.lock().filename = Some(name.into());
    }

    pub fn local_path(&self) -> Option<PathBuf> {
        self.lock().local_path.clone()
    }

    pub fn set_local_path(&self, path: impl AsRef<Path>) {
        self.lock().local_path = Some(path.as_ref().to_path_buf());
    }

    /// Total size in bytes, 0 if unknown.
    pub fn size(&self) -> u64 {
        self.lock().total_size
    }

    pub fn set_size(&self, size: u64) {
        let mut st = self.lock();
        st.total_size = size;
        if size > 0 && st.bytes_transferred > size {
            warn!(xfer = %self.id, size, sent = st.bytes_transferred, "size below transferred count");
            st.bytes_transferred = size;
        }
        st.recompute_remaining();
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.lock().bytes_transferred
    }

    /// Pre-sets the transferred count, e.g. to resume at an offset.
    pub fn set_bytes_transferred(&self, bytes: u64) {
        let mut st = self.lock();
        st.bytes_transferred = if st.total_size > 0 {
            bytes.min(st.total_size)
        } else {
            bytes
        };
        st.recompute_remaining();
    }

    /// Bytes still expected. Zero once cancelled.
    pub fn bytes_remaining(&self) -> u64 {
        self.lock().bytes_remaining
    }

    pub fn buffer_size(&self) -> usize {
        self.lock().buffer_size
    }

    /// Fraction in `[0, 1]`, 0 when the size is unknown.
    pub fn progress(&self) -> f64 {
        let st = self.lock();
        if st.total_size == 0 {
            return 0.0;
        }
        st.bytes_transferred as f64 / st.total_size as f64
    }

    pub fn remote_ip(&self) -> Option<String> {
        self.lock().remote_ip.clone()
    }

    pub fn remote_port(&self) -> u16 {
        self.lock().remote_port
    }

    /// Records where the peer can be reached, shown when asking the user.
    pub fn set_remote_address(&self, ip: impl Into<String>, port: u16) {
        let mut st = self.lock();
        st.remote_ip = Some(ip.into());
        st.remote_port = port;
    }

    pub fn local_port(&self) -> u16 {
        self.lock().local_port
    }

    pub fn set_local_port(&self, port: u16) {
        self.lock().local_port = port;
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.lock().start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.lock().end_time
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.lock().transport.clone()
    }

    pub fn watcher(&self) -> Option<WatchId> {
        self.lock().watcher
    }

    /// Bytes waiting for the transport after a partial write.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.as_ref().map_or(0, Vec::len)
    }

    pub fn pending_prompt(&self) -> Option<PromptKind> {
        self.lock().prompt
    }

    pub fn thumbnail(&self) -> Option<Thumbnail> {
        self.lock().thumbnail.clone()
    }

    pub fn set_thumbnail(&self, data: Vec<u8>, mimetype: impl Into<String>) {
        self.lock().thumbnail = Some(Thumbnail {
            data,
            mimetype: mimetype.into(),
        });
    }

    /// Lets the UI attach a preview before the offer is shown.
    pub fn prepare_thumbnail(&self, formats: &str) {
        if let Some(ui) = &self.shared.ui_ops {
            ui.add_thumbnail(self, formats);
        }
    }

    pub fn snapshot(&self) -> XferProgress {
        let st = self.lock();
        XferProgress {
            id: self.id,
            role: self.role,
            status: st.status,
            peer: self.peer.clone(),
            filename: st.filename.clone(),
            total_size: st.total_size,
            bytes_transferred: st.bytes_transferred,
            bytes_remaining: st.bytes_remaining,
            started_at: st.start_time,
            ended_at: st.end_time,
        }
    }

    /// Marks completion for backends that learn it out of band.
    pub fn set_completed(&self, completed: bool) {
        if completed {
            let (signal, filename) = {
                let mut st = self.lock();
                (st.transition(self.role, XferStatus::Done), st.filename.clone())
            };
            if signal.is_some() {
                self.emit(signal);
                let msg = match filename {
                    Some(name) => format!("Transfer of file {name} complete"),
                    None => "File transfer complete".to_string(),
                };
                self.shared.conversation_write(self, &msg, false);
            } else {
                warn!(xfer = %self.id, status = %self.status(), "cannot complete from this status");
            }
        }
        self.update_progress();
    }

    pub(crate) fn update_progress(&self) {
        if let Some(ui) = &self.shared.ui_ops {
            ui.update_progress(self, self.progress());
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("status", &st.status)
            .field("filename", &st.filename)
            .field("bytes_transferred", &st.bytes_transferred)
            .field("total_size", &st.total_size)
            .finish()
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        self.close_requests();
        if self.lock().status == XferStatus::Started {
            self.cancel_local();
        }
        if let Some(ui) = &self.shared.ui_ops {
            ui.destroy(self);
        }
        self.shared.registry.remove(self.id);
        debug!(xfer = %self.id, "transfer disposed");
    }
}
