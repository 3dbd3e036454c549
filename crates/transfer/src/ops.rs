//! Capability traits supplied by protocol backends and presentation layers.

use std::io;

use crate::Transfer;
use crate::types::Prompt;

/// Custom byte source/sink replacing raw transport or file I/O.
pub trait XferIo: Send + Sync {
    /// Reads up to `max` bytes. An empty buffer means nothing is
    /// available yet; `WouldBlock` is treated the same way.
    fn read(&self, xfer: &Transfer, max: usize) -> io::Result<Vec<u8>>;

    /// Writes a prefix of `data` and returns its length.
    fn write(&self, xfer: &Transfer, data: &[u8]) -> io::Result<usize>;
}

/// Hooks a protocol backend provides for its transfers.
///
/// Only `init` is required. It is the backend's cue to negotiate and
/// eventually call [`Transfer::start`].
pub trait XferOps: Send + Sync {
    fn init(&self, xfer: &Transfer);

    fn request_denied(&self, _xfer: &Transfer) {}

    fn start(&self, _xfer: &Transfer) {}

    fn end(&self, _xfer: &Transfer) {}

    fn cancel_send(&self, _xfer: &Transfer) {}

    fn cancel_recv(&self, _xfer: &Transfer) {}

    /// Called with every chunk that crossed the transport.
    fn ack(&self, _xfer: &Transfer, _chunk: &[u8]) {}

    /// Replaces raw transport reads/writes when present.
    fn custom_io(&self) -> Option<&dyn XferIo> {
        None
    }
}

/// Presentation-layer hooks shared by every transfer of a manager.
pub trait XferUiOps: Send + Sync {
    fn new_xfer(&self, _xfer: &Transfer) {}

    fn destroy(&self, _xfer: &Transfer) {}

    fn add_xfer(&self, _xfer: &Transfer) {}

    fn update_progress(&self, _xfer: &Transfer, _fraction: f64) {}

    fn cancel_local(&self, _xfer: &Transfer) {}

    fn cancel_remote(&self, _xfer: &Transfer) {}

    /// When present the local file is never opened; the UI becomes the
    /// byte source (send) or sink (receive) and must call
    /// [`Transfer::ui_ready`] whenever it can take part in a pump.
    fn custom_io(&self) -> Option<&dyn XferIo> {
        None
    }

    /// Whether the UI retries unsent bytes itself through
    /// [`data_not_sent`](Self::data_not_sent). Otherwise the core keeps
    /// them in a pending buffer.
    fn takes_unsent_data(&self) -> bool {
        false
    }

    fn data_not_sent(&self, _xfer: &Transfer, _data: &[u8]) {}

    /// Asks the UI to render a thumbnail in one of `formats`
    /// (comma-separated mimetypes) and attach it with
    /// [`Transfer::set_thumbnail`].
    fn add_thumbnail(&self, _xfer: &Transfer, _formats: &str) {}
}

/// Where user-visible text and questions go.
pub trait XferNotifier: Send + Sync {
    /// A system line in the conversation with the transfer's peer.
    fn conversation_write(&self, _xfer: &Transfer, _message: &str, _is_error: bool) {}

    /// A modal error not tied to a conversation.
    fn notify_error(&self, _account: &str, _title: &str, _message: &str) {}

    /// Shows a question. The answer comes back through
    /// [`Transfer::respond_accept`] or [`Transfer::respond_file`], possibly
    /// before this call returns.
    fn request(&self, _xfer: &Transfer, _prompt: &Prompt) {}

    /// Withdraws any question shown for `xfer`.
    fn close_requests(&self, _xfer: &Transfer) {}
}
