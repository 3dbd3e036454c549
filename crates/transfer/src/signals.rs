use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::Transfer;
use crate::types::{XferRole, XferStatus};

/// Lifecycle broadcast fired by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XferSignal {
    RecvRequest,
    SendAccept,
    RecvAccept,
    SendStart,
    RecvStart,
    SendCancel,
    RecvCancel,
    SendComplete,
    RecvComplete,
}

impl XferSignal {
    pub fn name(self) -> &'static str {
        match self {
            Self::RecvRequest => "file-recv-request",
            Self::SendAccept => "file-send-accept",
            Self::RecvAccept => "file-recv-accept",
            Self::SendStart => "file-send-start",
            Self::RecvStart => "file-recv-start",
            Self::SendCancel => "file-send-cancel",
            Self::RecvCancel => "file-recv-cancel",
            Self::SendComplete => "file-send-complete",
            Self::RecvComplete => "file-recv-complete",
        }
    }

    /// Signal emitted when a transfer of `role` enters `status`.
    pub fn for_status(role: XferRole, status: XferStatus) -> Option<Self> {
        let send = role == XferRole::Send;
        let sig = match status {
            XferStatus::NotStarted => return None,
            XferStatus::Accepted if send => Self::SendAccept,
            XferStatus::Accepted => Self::RecvAccept,
            XferStatus::Started if send => Self::SendStart,
            XferStatus::Started => Self::RecvStart,
            XferStatus::Done if send => Self::SendComplete,
            XferStatus::Done => Self::RecvComplete,
            XferStatus::CancelledLocal | XferStatus::CancelledRemote if send => Self::SendCancel,
            XferStatus::CancelledLocal | XferStatus::CancelledRemote => Self::RecvCancel,
        };
        Some(sig)
    }
}

impl fmt::Display for XferSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle returned by [`SignalBus::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(XferSignal, &Transfer) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    filter: Option<XferSignal>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subs: Vec<Subscription>,
}

/// Fire-and-forget observers of transfer lifecycle events.
///
/// Handlers run synchronously on the emitting thread and may call back
/// into the transfer (for example `cancel_local` to veto a request).
#[derive(Default)]
pub struct SignalBus {
    inner: Mutex<BusInner>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect<F>(&self, signal: XferSignal, handler: F) -> SubscriptionId
    where
        F: Fn(&Transfer) + Send + Sync + 'static,
    {
        self.subscribe(Some(signal), Arc::new(move |_, xfer| handler(xfer)))
    }

    pub fn connect_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(XferSignal, &Transfer) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(handler))
    }

    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.subs.len();
        inner.subs.retain(|s| s.id != id);
        inner.subs.len() != before
    }

    pub fn emit(&self, signal: XferSignal, xfer: &Transfer) {
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner
                .subs
                .iter()
                .filter(|s| s.filter.is_none_or(|f| f == signal))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };
        tracing::debug!(xfer = %xfer.id(), signal = signal.name(), "emit");
        for handler in handlers {
            handler(signal, xfer);
        }
    }

    fn subscribe(&self, filter: Option<XferSignal>, handler: Handler) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subs.push(Subscription {
            id,
            filter,
            handler,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_role_and_status() {
        assert_eq!(
            XferSignal::for_status(XferRole::Send, XferStatus::Started),
            Some(XferSignal::SendStart)
        );
        assert_eq!(
            XferSignal::for_status(XferRole::Receive, XferStatus::CancelledRemote),
            Some(XferSignal::RecvCancel)
        );
        assert_eq!(
            XferSignal::for_status(XferRole::Receive, XferStatus::Done)
                .map(XferSignal::name),
            Some("file-recv-complete")
        );
        assert_eq!(XferSignal::for_status(XferRole::Send, XferStatus::NotStarted), None);
    }
}
