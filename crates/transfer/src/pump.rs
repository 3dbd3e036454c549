//! One step of the byte pump, invoked per readiness notification.

use std::io::{self, Read, Write};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{error, trace, warn};

use crate::Transfer;
use crate::types::{XferRole, XferStatus};
use crate::xfer::LocalIo;

/// Next buffer size after a saturating read or write: `min(cur * 1.5, max)`.
pub fn grow_buffer_size(current: usize, max: usize) -> usize {
    (current.saturating_mul(3) / 2).min(max)
}

/// Serializes pump steps of one transfer across threads.
///
/// A step that re-enters from a hook on the thread already pumping is
/// skipped; the outer step finishes the work.
#[derive(Default)]
pub(crate) struct PumpLock {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

pub(crate) struct PumpTurn<'a> {
    lock: &'a PumpLock,
}

impl PumpLock {
    pub(crate) fn enter(&self) -> Option<PumpTurn<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(me) {
            return None;
        }
        while owner.is_some() {
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
        Some(PumpTurn { lock: self })
    }
}

impl Drop for PumpTurn<'_> {
    fn drop(&mut self) {
        *self
            .lock
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.lock.released.notify_one();
    }
}

enum Chunk {
    Data(Vec<u8>),
    NotReady,
    Failed(io::Error),
}

fn would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl Transfer {
    pub(crate) fn pump(&self) {
        let Some(_turn) = self.pump_lock.enter() else {
            trace!(xfer = %self.id(), "pump re-entered, skipping");
            return;
        };
        if self.status() != XferStatus::Started {
            return;
        }
        match self.role() {
            XferRole::Receive => self.pump_receive(),
            XferRole::Send => self.pump_send(),
        }
        if self.is_completed() {
            self.end();
        }
    }

    fn grow_buffer(&self) {
        let max = self.shared.config.max_buffer_size;
        let mut st = self.lock();
        st.buffer_size = grow_buffer_size(st.buffer_size, max);
    }

    /// Reads from the protocol side: backend I/O or the transport.
    fn read_remote(&self, max: usize) -> Chunk {
        let ops = self.ops();
        if let Some(io) = ops.as_deref().and_then(|o| o.custom_io()) {
            return match io.read(self, max) {
                Ok(data) if data.is_empty() => Chunk::NotReady,
                Ok(data) => Chunk::Data(data),
                Err(e) if would_block(&e) => Chunk::NotReady,
                Err(e) => Chunk::Failed(e),
            };
        }

        let Some(transport) = self.transport() else {
            return Chunk::Failed(io::ErrorKind::NotConnected.into());
        };
        let mut buf = vec![0u8; max];
        match transport.try_read(&mut buf) {
            Ok(0) => Chunk::Failed(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf.truncate(n);
                Chunk::Data(buf)
            }
            Err(e) if would_block(&e) => Chunk::NotReady,
            Err(e) => Chunk::Failed(e),
        }
    }

    /// Writes to the protocol side. `Ok(0)` when the peer cannot take
    /// anything right now.
    fn write_remote(&self, data: &[u8]) -> io::Result<usize> {
        let ops = self.ops();
        let result = match ops.as_deref().and_then(|o| o.custom_io()) {
            Some(io) => io.write(self, data),
            None => match self.transport() {
                Some(transport) => transport.try_write(data),
                None => Err(io::ErrorKind::NotConnected.into()),
            },
        };
        match result {
            Ok(n) => Ok(n.min(data.len())),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Reads the local source (file or UI). Faults cancel locally.
    fn read_local(&self, max: usize) -> Chunk {
        if let Some(io) = self.shared.ui_ops.as_deref().and_then(|ui| ui.custom_io()) {
            return match io.read(self, max) {
                Ok(data) if data.is_empty() => Chunk::NotReady,
                Ok(data) if data.len() > max => {
                    error!(xfer = %self.id(), got = data.len(), max, "got too much data from UI");
                    self.cancel_local();
                    Chunk::Failed(io::ErrorKind::InvalidData.into())
                }
                Ok(data) => Chunk::Data(data),
                Err(e) if would_block(&e) => Chunk::NotReady,
                Err(e) => {
                    warn!(xfer = %self.id(), error = %e, "UI read failed");
                    self.cancel_local();
                    Chunk::Failed(e)
                }
            };
        }

        let result = {
            let mut st = self.lock();
            let torn_down = st.torn_down;
            match &mut st.local_io {
                LocalIo::File(file) => {
                    let mut buf = Vec::with_capacity(max);
                    match Read::by_ref(file).take(max as u64).read_to_end(&mut buf) {
                        Ok(0) => Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "file ended before the announced size",
                        )),
                        Ok(_) => Ok(buf),
                        Err(e) => Err(e),
                    }
                }
                _ if torn_down => return Chunk::Failed(io::ErrorKind::NotConnected.into()),
                _ => Err(io::Error::other("file is not opened for reading")),
            }
        };
        match result {
            Ok(data) => Chunk::Data(data),
            Err(e) => {
                warn!(xfer = %self.id(), error = %e, "local read failed");
                if let Some(path) = self.local_path() {
                    self.show_file_error(&path, &e);
                }
                self.cancel_local();
                Chunk::Failed(e)
            }
        }
    }

    /// Writes the local sink (file or UI). Returns `false` after a fault,
    /// which has already cancelled the transfer.
    fn write_local(&self, data: &[u8]) -> bool {
        if let Some(io) = self.shared.ui_ops.as_deref().and_then(|ui| ui.custom_io()) {
            return match io.write(self, data) {
                Ok(n) if n == data.len() => true,
                Ok(n) => {
                    error!(xfer = %self.id(), wrote = n, len = data.len(), "unable to write whole buffer");
                    self.cancel_local();
                    false
                }
                Err(e) => {
                    warn!(xfer = %self.id(), error = %e, "UI write failed");
                    self.cancel_local();
                    false
                }
            };
        }

        let result = {
            let mut st = self.lock();
            let torn_down = st.torn_down;
            match &mut st.local_io {
                LocalIo::File(file) => file.write_all(data),
                // Cancelled from another thread mid-step.
                _ if torn_down => return false,
                _ => Err(io::Error::other("file is not opened for writing")),
            }
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(xfer = %self.id(), error = %e, "local write failed");
                if let Some(path) = self.local_path() {
                    self.show_file_error(&path, &e);
                }
                self.cancel_local();
                false
            }
        }
    }

    /// Counts `chunk` as moved, acks it and refreshes progress.
    fn record_progress(&self, chunk: &[u8]) {
        let completed = {
            let mut st = self.lock();
            st.bytes_transferred += chunk.len() as u64;
            if st.total_size > 0 {
                st.recompute_remaining();
            }
            st.total_size > 0 && st.bytes_transferred >= st.total_size
        };
        trace!(xfer = %self.id(), bytes = chunk.len(), "chunk");

        if let Some(ops) = self.ops() {
            ops.ack(self, chunk);
        }
        self.update_progress();
        if completed {
            self.set_completed(true);
        }
    }

    fn pump_receive(&self) {
        let (max, buffer_size, known, remaining) = {
            let st = self.lock();
            let known = st.total_size > 0;
            let max = if known {
                st.bytes_remaining.min(st.buffer_size as u64) as usize
            } else {
                st.buffer_size
            };
            (max, st.buffer_size, known, st.bytes_remaining)
        };
        if max == 0 {
            return;
        }

        let mut data = match self.read_remote(max) {
            Chunk::Data(data) => data,
            Chunk::NotReady => {
                trace!(xfer = %self.id(), "nothing to read yet");
                return;
            }
            Chunk::Failed(e) => {
                warn!(xfer = %self.id(), error = %e, "read from peer failed");
                self.cancel_remote();
                return;
            }
        };

        if data.len() == buffer_size {
            self.grow_buffer();
        }
        if known && data.len() as u64 > remaining {
            warn!(xfer = %self.id(), size = self.size(), "got too much data, truncating");
            data.truncate(remaining as usize);
        }
        if !self.write_local(&data) {
            return;
        }
        self.record_progress(&data);
    }

    fn pump_send(&self) {
        let (mut want, pending_len) = {
            let st = self.lock();
            (
                st.bytes_remaining.min(st.buffer_size as u64) as usize,
                st.pending.as_ref().map(Vec::len),
            )
        };

        // Nothing left to send; the backend may keep the link open.
        if want == 0 {
            self.remove_watcher();
            return;
        }

        let need_read = match pending_len {
            Some(len) if len >= want => false,
            Some(len) => {
                want -= len;
                true
            }
            None => true,
        };

        let mut fresh = Vec::new();
        if need_read {
            match self.read_local(want) {
                Chunk::Data(data) => fresh = data,
                Chunk::NotReady => {
                    // The UI will call ui_ready, which re-adds the watcher.
                    self.remove_watcher();
                    self.lock().gate.note_protocol_ready();
                    return;
                }
                Chunk::Failed(_) => return,
            }
        }

        let (chunk, keeps_pending) = {
            let mut st = self.lock();
            match st.pending.as_mut() {
                Some(pending) => {
                    let mut chunk = std::mem::take(pending);
                    chunk.extend_from_slice(&fresh);
                    (chunk, true)
                }
                None => (fresh, false),
            }
        };

        let written = match self.write_remote(&chunk) {
            Ok(n) => n,
            Err(e) => {
                warn!(xfer = %self.id(), error = %e, "write to peer failed");
                self.cancel_remote();
                return;
            }
        };

        if written == chunk.len() {
            self.grow_buffer();
        } else if keeps_pending {
            if let Some(pending) = self.lock().pending.as_mut() {
                pending.extend_from_slice(&chunk[written..]);
            }
        } else if let Some(ui) = &self.shared.ui_ops {
            ui.data_not_sent(self, &chunk[written..]);
        }

        if written > 0 {
            self.record_progress(&chunk[..written]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{INITIAL_BUFFER_SIZE, MAX_BUFFER_SIZE};

    #[test]
    fn growth_sequence_saturates() {
        let mut size = INITIAL_BUFFER_SIZE;
        let mut seen = vec![size];
        for _ in 0..10 {
            let next = grow_buffer_size(size, MAX_BUFFER_SIZE);
            assert!(next >= size);
            assert_eq!(next, ((size as f64 * 1.5).floor() as usize).min(MAX_BUFFER_SIZE));
            size = next;
            seen.push(size);
        }
        assert_eq!(&seen[..6], &[4096, 6144, 9216, 13824, 20736, 31104]);
        assert_eq!(seen[7], MAX_BUFFER_SIZE);
        assert_eq!(*seen.last().unwrap(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn growth_never_exceeds_max() {
        assert_eq!(grow_buffer_size(60_000, MAX_BUFFER_SIZE), MAX_BUFFER_SIZE);
        assert_eq!(grow_buffer_size(MAX_BUFFER_SIZE, MAX_BUFFER_SIZE), MAX_BUFFER_SIZE);
        assert_eq!(grow_buffer_size(usize::MAX, 10), 10);
    }
}
