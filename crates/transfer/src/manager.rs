use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::event_loop::EventLoop;
use crate::ops::{XferNotifier, XferUiOps};
use crate::registry::Registry;
use crate::signals::SignalBus;
use crate::types::{Prompt, XferConfig, XferId, XferRole};
use crate::Transfer;

/// State shared by every transfer created from one manager.
pub(crate) struct Shared {
    pub(crate) event_loop: Arc<dyn EventLoop>,
    pub(crate) ui_ops: Option<Arc<dyn XferUiOps>>,
    pub(crate) notifier: Option<Arc<dyn XferNotifier>>,
    pub(crate) config: XferConfig,
    pub(crate) registry: Registry,
    pub(crate) signals: SignalBus,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn conversation_write(&self, xfer: &Transfer, message: &str, is_error: bool) {
        if let Some(n) = &self.notifier {
            n.conversation_write(xfer, message, is_error);
        }
    }

    /// Raises the "File transfer to/from PEER failed." notification.
    pub(crate) fn xfer_error(&self, role: XferRole, account: &str, peer: &str, message: &str) {
        let title = match role {
            XferRole::Send => format!("File transfer to {peer} failed."),
            XferRole::Receive => format!("File transfer from {peer} failed."),
        };
        self.notify_error(account, &title, message);
    }

    pub(crate) fn notify_error(&self, account: &str, title: &str, message: &str) {
        if let Some(n) = &self.notifier {
            n.notify_error(account, title, message);
        }
    }

    pub(crate) fn request(&self, xfer: &Transfer, prompt: &Prompt) {
        if let Some(n) = &self.notifier {
            n.request(xfer, prompt);
        }
    }

    pub(crate) fn close_requests(&self, xfer: &Transfer) {
        if let Some(n) = &self.notifier {
            n.close_requests(xfer);
        }
    }
}

/// Root context owning the registry, signal bus and collaborators.
///
/// Cheap to clone; every clone refers to the same registry.
#[derive(Clone)]
pub struct XferManager {
    shared: Arc<Shared>,
}

impl XferManager {
    pub fn builder(event_loop: Arc<dyn EventLoop>) -> XferManagerBuilder {
        XferManagerBuilder {
            event_loop,
            ui_ops: None,
            notifier: None,
            config: XferConfig::default(),
        }
    }

    /// Creates a transfer, registers it and tells the UI about it.
    ///
    /// The backend must install its [`XferOps`](crate::XferOps) before
    /// calling [`Transfer::request`].
    pub fn new_xfer(&self, role: XferRole, account: &str, peer: &str) -> Arc<Transfer> {
        let id = XferId(self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let xfer = Transfer::new(id, role, account, peer, Arc::clone(&self.shared));
        self.shared.registry.add(&xfer);
        debug!(xfer = %id, %role, peer, "new transfer");

        if let Some(ui) = &self.shared.ui_ops {
            ui.new_xfer(&xfer);
        }
        xfer
    }

    pub fn signals(&self) -> &SignalBus {
        &self.shared.signals
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    pub fn get(&self, id: XferId) -> Option<Arc<Transfer>> {
        self.shared.registry.get(id)
    }

    pub fn all(&self) -> Vec<Arc<Transfer>> {
        self.shared.registry.all()
    }

    pub fn config(&self) -> XferConfig {
        self.shared.config
    }
}

pub struct XferManagerBuilder {
    event_loop: Arc<dyn EventLoop>,
    ui_ops: Option<Arc<dyn XferUiOps>>,
    notifier: Option<Arc<dyn XferNotifier>>,
    config: XferConfig,
}

impl XferManagerBuilder {
    pub fn ui_ops(mut self, ui_ops: Arc<dyn XferUiOps>) -> Self {
        self.ui_ops = Some(ui_ops);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn XferNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(mut self, config: XferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> XferManager {
        XferManager {
            shared: Arc::new(Shared {
                event_loop: self.event_loop,
                ui_ops: self.ui_ops,
                notifier: self.notifier,
                config: self.config.clamped(),
                registry: Registry::default(),
                signals: SignalBus::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}
