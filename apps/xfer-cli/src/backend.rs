//! TCP protocol backend: the stream is already connected and the offer
//! header exchanged, so `init` simply starts the transfer.

use std::sync::{Arc, Mutex, PoisonError};

use purple_xfer::{Transfer, Transport, XferOps};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

pub struct TcpBackend {
    transport: Mutex<Option<Arc<dyn Transport>>>,
    hasher: Mutex<Sha256>,
    digest: Mutex<Option<String>>,
}

impl TcpBackend {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            hasher: Mutex::new(Sha256::new()),
            digest: Mutex::new(None),
        }
    }

    /// Hex SHA-256 of every byte that crossed the wire, once finished.
    pub fn digest(&self) -> Option<String> {
        self.digest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl XferOps for TcpBackend {
    fn init(&self, xfer: &Transfer) {
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if transport.is_none() {
            warn!(xfer = %xfer.id(), "init without a transport");
            return;
        }
        if let Err(e) = xfer.start(transport, None) {
            warn!(xfer = %xfer.id(), error = %e, "failed to start transfer");
        }
    }

    fn ack(&self, _xfer: &Transfer, chunk: &[u8]) {
        self.hasher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(chunk);
    }

    fn end(&self, xfer: &Transfer) {
        let hasher = std::mem::take(
            &mut *self.hasher.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let digest = hex::encode(hasher.finalize());
        info!(
            xfer = %xfer.id(),
            sha256 = %digest,
            bytes = xfer.bytes_transferred(),
            "transfer digest"
        );
        *self.digest.lock().unwrap_or_else(PoisonError::into_inner) = Some(digest);
    }

    fn cancel_send(&self, xfer: &Transfer) {
        debug!(xfer = %xfer.id(), "send cancelled");
    }

    fn cancel_recv(&self, xfer: &Transfer) {
        debug!(xfer = %xfer.id(), "receive cancelled");
    }

    fn request_denied(&self, xfer: &Transfer) {
        debug!(xfer = %xfer.id(), "offer declined");
        if let Some(transport) = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            transport.close();
        }
    }
}
