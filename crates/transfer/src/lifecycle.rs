//! Request, negotiation, start and terminal transitions of a transfer.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::event_loop::{Condition, Transport, WatchId};
use crate::signals::XferSignal;
use crate::types::{Prompt, PromptKind, XferRole, XferStatus};
use crate::validation::{LocalFileCheck, check_local_path, validate_local_filename};
use crate::xfer::{LocalIo, XferState};
use crate::{Transfer, XferError, format_size};

/// Resources detached from a transfer, released with the lock dropped.
pub(crate) struct Released {
    watcher: Option<WatchId>,
    transport: Option<Arc<dyn Transport>>,
    keep_alive: Option<Arc<Transfer>>,
}

impl XferState {
    pub(crate) fn detach(&mut self) -> Released {
        self.local_io = LocalIo::Closed;
        Released {
            watcher: self.watcher.take(),
            transport: self.transport.take(),
            keep_alive: self.keep_alive.take(),
        }
    }
}

impl Transfer {
    fn ui_has_custom_io(&self) -> bool {
        self.shared
            .ui_ops
            .as_ref()
            .is_some_and(|ui| ui.custom_io().is_some())
    }

    fn release(&self, released: Released) -> Option<Arc<Transfer>> {
        if let Some(watcher) = released.watcher {
            self.shared.event_loop.input_remove(watcher);
        }
        if let Some(transport) = released.transport {
            transport.close();
        }
        released.keep_alive
    }

    /// Entry point once the backend knows enough to involve the user.
    ///
    /// Receive: emits `file-recv-request` (a handler may veto by
    /// cancelling), then asks where to save, auto-proceeds with a preset
    /// local path, or asks whether to accept at all. Send: asks which file
    /// to send. The transfer keeps itself alive until a terminal
    /// transition.
    pub fn request(&self) -> Result<(), XferError> {
        if self.ops().is_none() {
            return Err(XferError::MissingInit);
        }
        {
            let mut st = self.lock();
            if st.status.is_terminal() {
                return Err(XferError::Terminal(st.status));
            }
            if st.keep_alive.is_none() {
                st.keep_alive = self.handle();
            }
        }
        debug!(xfer = %self.id(), role = %self.role(), peer = self.peer(), "request");

        if self.role() == XferRole::Send {
            self.choose_file();
            return Ok(());
        }

        self.shared.signals.emit(XferSignal::RecvRequest, self);

        let (status, torn_down, filename, local_path) = {
            let st = self.lock();
            (
                st.status,
                st.torn_down,
                st.filename.clone(),
                st.local_path.clone(),
            )
        };
        if status.is_terminal() {
            debug!(xfer = %self.id(), "request vetoed");
            if !torn_down {
                self.cancel_local();
            }
            return Ok(());
        }

        if filename.is_some() || status == XferStatus::Accepted {
            let msg = match &filename {
                Some(name) => format!("{} is offering to send file {name}", self.peer()),
                None => format!("{} is offering to send a file", self.peer()),
            };
            self.shared.conversation_write(self, &msg, false);

            match local_path {
                Some(path) => self.request_accepted(Some(&path))?,
                None => self.ask_recv(),
            }
        } else {
            self.ask_accept();
        }
        Ok(())
    }

    fn show_prompt(&self, prompt: Prompt) {
        self.lock().prompt = Some(prompt.kind());
        self.shared.request(self, &prompt);
    }

    fn ask_recv(&self) {
        let (status, filename, size, message, thumbnail) = {
            let st = self.lock();
            (
                st.status,
                st.filename.clone(),
                st.total_size,
                st.message.clone(),
                st.thumbnail.clone(),
            )
        };
        if status == XferStatus::Accepted {
            self.choose_file();
            return;
        }

        let primary = match filename {
            Some(name) => format!(
                "{} wants to send you {name} ({})",
                self.peer(),
                format_size(size)
            ),
            None => format!("{} wants to send you a file", self.peer()),
        };
        if let Some(message) = message {
            self.shared.conversation_write(self, &message, false);
        }
        self.show_prompt(Prompt::Offer { primary, thumbnail });
    }

    fn ask_accept(&self) {
        let (ip, port) = {
            let st = self.lock();
            (st.remote_ip.clone(), st.remote_port)
        };
        let primary = format!("Accept file transfer request from {}?", self.peer());
        let secondary = match ip {
            Some(ip) if port != 0 => Some(format!(
                "A file is available for download from:\nRemote host: {ip}\nRemote port: {port}"
            )),
            _ => None,
        };
        self.show_prompt(Prompt::Accept { primary, secondary });
    }

    fn choose_file(&self) {
        let suggested = self.filename();
        self.show_prompt(Prompt::ChooseFile {
            suggested,
            save: self.role() == XferRole::Receive,
        });
    }

    fn take_prompt(&self, accepted: &[PromptKind]) -> Result<PromptKind, XferError> {
        let mut st = self.lock();
        let pending = st.prompt;
        match pending {
            Some(kind) if accepted.contains(&kind) => {
                st.prompt = None;
                Ok(kind)
            }
            other => {
                warn!(xfer = %self.id(), pending = ?other, "stale prompt response ignored");
                Err(XferError::NoPendingPrompt)
            }
        }
    }

    /// Answers an [`Prompt::Offer`] or [`Prompt::Accept`] question.
    pub fn respond_accept(&self, accept: bool) -> Result<(), XferError> {
        let kind = self.take_prompt(&[PromptKind::Offer, PromptKind::Accept])?;
        match (kind, accept) {
            (PromptKind::Offer, true) => {
                self.choose_file();
                Ok(())
            }
            (PromptKind::Accept, true) => self.request_accepted(None),
            _ => {
                self.request_denied();
                Ok(())
            }
        }
    }

    /// Answers a [`Prompt::ChooseFile`] question; `None` means the user
    /// backed out.
    pub fn respond_file(&self, path: Option<&Path>) -> Result<(), XferError> {
        self.take_prompt(&[PromptKind::ChooseFile])?;
        match path {
            Some(path) => self.request_accepted(Some(path)),
            None if self.role() == XferRole::Send => {
                self.cancel_local();
                Ok(())
            }
            None => {
                self.request_denied();
                Ok(())
            }
        }
    }

    /// Withdraws any pending question.
    pub fn close_requests(&self) {
        let had_prompt = self.lock().prompt.take().is_some();
        if had_prompt {
            self.shared.close_requests(self);
        }
    }

    /// Accepts the transfer, binding `path` as the local file.
    ///
    /// `None` is only meaningful for receives whose save location is
    /// decided later: the transfer becomes `Accepted` and the backend's
    /// `init` runs. Every rejection is reported to the user before the
    /// error is returned.
    pub fn request_accepted(&self, path: Option<&Path>) -> Result<(), XferError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(XferError::Terminal(status));
        }
        let ops = self.ops().ok_or(XferError::MissingInit)?;
        let role = self.role();

        let Some(path) = path else {
            if role == XferRole::Send {
                return Err(XferError::NoFileChosen);
            }
            let signal = self.lock().transition(role, XferStatus::Accepted);
            self.emit(signal);
            ops.init(self);
            return Ok(());
        };

        if let Err(err) = validate_local_filename(path) {
            let msg = format!("{} is not a valid filename.", path.display());
            warn!(xfer = %self.id(), path = %path.display(), "rejected local path");
            self.shared
                .xfer_error(role, self.account(), self.peer(), &msg);
            self.request_denied();
            return Err(err);
        }

        let size = if role == XferRole::Send && self.ui_has_custom_io() {
            None
        } else {
            match check_local_path(role, path) {
                Ok(LocalFileCheck::Source { size }) => Some(size),
                Ok(_) => None,
                Err(err) => {
                    self.reject_local_path(path, &err);
                    return Err(err);
                }
            }
        };

        let (signal, filename) = {
            let mut st = self.lock();
            st.local_path = Some(path.to_path_buf());
            if let Some(size) = size {
                st.total_size = size;
                st.recompute_remaining();
            }
            if role == XferRole::Send {
                st.filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
            }
            (st.transition(role, XferStatus::Accepted), st.filename.clone())
        };
        self.emit(signal);

        let name = filename.as_deref().unwrap_or("file");
        let msg = match role {
            XferRole::Send => format!("Offering to send {name} to {}", self.peer()),
            XferRole::Receive => format!("Starting transfer of {name} from {}", self.peer()),
        };
        self.shared.conversation_write(self, &msg, false);
        debug!(xfer = %self.id(), path = %path.display(), "request accepted");

        if let Some(ui) = &self.shared.ui_ops {
            ui.add_xfer(self);
        }
        ops.init(self);
        Ok(())
    }

    fn reject_local_path(&self, path: &Path, err: &XferError) {
        let role = self.role();
        let report = |msg: &str| {
            self.shared
                .xfer_error(role, self.account(), self.peer(), msg)
        };
        warn!(xfer = %self.id(), path = %path.display(), error = %err, "local path rejected");

        match err {
            XferError::Io(e) => {
                self.show_file_error(path, e);
                self.cancel_local();
            }
            XferError::EmptyFile(_) => {
                report("Cannot send a file of 0 bytes.");
                self.request_denied();
            }
            XferError::IsDirectory(_) => {
                report("Cannot send a directory.");
                self.request_denied();
            }
            XferError::NotRegularFile(_) => {
                report(&format!(
                    "{} is not a regular file. Cowardly refusing to overwrite it.",
                    path.display()
                ));
                self.request_denied();
            }
            XferError::DirectoryNotWritable(_) => {
                report("Directory is not writable.");
                self.request_denied();
            }
            XferError::NotReadable(_) => {
                report("File is not readable.");
                self.choose_file();
            }
            _ => self.cancel_local(),
        }
    }

    pub(crate) fn show_file_error(&self, path: &Path, err: &io::Error) {
        let verb = match self.role() {
            XferRole::Send => "reading",
            XferRole::Receive => "writing",
        };
        let msg = format!("Error {verb} {}: \n{err}.", path.display());
        self.shared
            .xfer_error(self.role(), self.account(), self.peer(), &msg);
    }

    /// The user or application declined. Ends in `CancelledLocal`.
    pub fn request_denied(&self) {
        self.close_requests();
        let signal = {
            let mut st = self.lock();
            if st.torn_down {
                warn!(xfer = %self.id(), "request_denied after teardown");
                return;
            }
            st.torn_down = true;
            st.transition(self.role(), XferStatus::CancelledLocal)
        };
        debug!(xfer = %self.id(), "request denied");
        self.emit(signal);

        if let Some(ops) = self.ops() {
            ops.request_denied(self);
        }
        let released = self.lock().detach();
        let keep_alive = self.release(released);
        drop(keep_alive);
    }

    /// Binds the transport and begins moving bytes.
    ///
    /// For a receive with `remote` set the core connects first and
    /// `transport` is ignored; otherwise `transport` (if any) is watched
    /// for write (send) or read (receive) readiness. Without a transport
    /// the backend drives the pump through
    /// [`protocol_ready`](Self::protocol_ready).
    pub fn start(
        &self,
        transport: Option<Arc<dyn Transport>>,
        remote: Option<(&str, u16)>,
    ) -> Result<(), XferError> {
        {
            let st = self.lock();
            if st.status.is_terminal() {
                return Err(XferError::Terminal(st.status));
            }
            if st.start_time.is_some() || st.status == XferStatus::Started {
                error!(xfer = %self.id(), "transfer is being started multiple times");
                return Err(XferError::AlreadyStarted);
            }
        }
        let signal = self.lock().transition(self.role(), XferStatus::Started);
        self.emit(signal);
        if self.status() != XferStatus::Started {
            // A start handler cancelled.
            return Ok(());
        }

        match (self.role(), remote) {
            (XferRole::Receive, Some((ip, port))) => {
                if let Some(unused) = transport {
                    unused.close();
                }
                {
                    let mut st = self.lock();
                    st.remote_ip = Some(ip.to_string());
                    st.remote_port = port;
                }
                debug!(xfer = %self.id(), ip, port, "connecting");
                let me = self.handle();
                let weak = me.as_ref().map(Arc::downgrade);
                self.shared.event_loop.connect(
                    ip,
                    port,
                    Box::new(move |result: io::Result<Arc<dyn Transport>>| match weak.and_then(|w| w.upgrade()) {
                        Some(xfer) => xfer.connect_done(result),
                        None => {
                            if let Ok(t) = result {
                                t.close();
                            }
                        }
                    }),
                );
                Ok(())
            }
            (role, _) => {
                self.lock().transport = transport;
                let cond = match role {
                    XferRole::Send => Condition::Write,
                    XferRole::Receive => Condition::Read,
                };
                self.begin_transfer(cond)
            }
        }
    }

    fn connect_done(&self, result: io::Result<Arc<dyn Transport>>) {
        match result {
            Err(e) => {
                let (live, ip, port) = {
                    let st = self.lock();
                    (!st.torn_down, st.remote_ip.clone(), st.remote_port)
                };
                warn!(xfer = %self.id(), error = %e, "connect failed");
                if live {
                    let msg = format!(
                        "Unable to connect to {}:{port}: {e}",
                        ip.as_deref().unwrap_or("peer")
                    );
                    self.shared
                        .xfer_error(self.role(), self.account(), self.peer(), &msg);
                    self.cancel_local();
                }
            }
            Ok(transport) => {
                let stale = {
                    let mut st = self.lock();
                    let stale = st.torn_down || st.status != XferStatus::Started;
                    if !stale {
                        st.transport = Some(Arc::clone(&transport));
                    }
                    stale
                };
                if stale {
                    debug!(xfer = %self.id(), "late connect, closing");
                    transport.close();
                    return;
                }
                if let Err(e) = self.begin_transfer(Condition::Read) {
                    debug!(xfer = %self.id(), error = %e, "begin after connect failed");
                }
            }
        }
    }

    fn begin_transfer(&self, cond: Condition) -> Result<(), XferError> {
        let (path, offset) = {
            let st = self.lock();
            if st.start_time.is_some() {
                error!(xfer = %self.id(), "transfer is being started multiple times");
                return Err(XferError::AlreadyStarted);
            }
            (st.local_path.clone(), st.bytes_transferred)
        };

        let local_io = if self.ui_has_custom_io() {
            LocalIo::Ui
        } else {
            let Some(path) = path else {
                let err = io::Error::new(io::ErrorKind::NotFound, "no local file chosen");
                self.show_file_error(Path::new(""), &err);
                self.cancel_local();
                return Err(err.into());
            };
            match self.open_local(&path, offset) {
                Ok(file) => LocalIo::File(file),
                Err(e) => {
                    self.show_file_error(&path, &e);
                    self.cancel_local();
                    return Err(e.into());
                }
            }
        };

        let transport = {
            let mut st = self.lock();
            st.local_io = local_io;
            st.start_time = Some(Utc::now());
            st.transport.clone()
        };
        if let Some(transport) = transport {
            self.add_watcher(transport, cond);
        }
        info!(xfer = %self.id(), role = %self.role(), peer = self.peer(), offset, "transfer started");

        if let Some(ops) = self.ops() {
            ops.start(self);
        }
        Ok(())
    }

    fn open_local(&self, path: &Path, offset: u64) -> io::Result<File> {
        let mut file = match self.role() {
            XferRole::Receive => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(offset == 0)
                .open(path)?,
            XferRole::Send => File::open(path)?,
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(file)
    }

    pub(crate) fn add_watcher(&self, transport: Arc<dyn Transport>, cond: Condition) {
        let weak = self.handle().map(|me| Arc::downgrade(&me));
        let id = self.shared.event_loop.input_add(
            transport,
            cond,
            Box::new(move || {
                if let Some(xfer) = weak.as_ref().and_then(|w| w.upgrade()) {
                    xfer.on_transport_ready();
                }
            }),
        );
        let stale = {
            let mut st = self.lock();
            if st.torn_down {
                true
            } else {
                st.watcher = Some(id);
                false
            }
        };
        if stale {
            self.shared.event_loop.input_remove(id);
        }
    }

    pub(crate) fn remove_watcher(&self) {
        let watcher = self.lock().watcher.take();
        if let Some(id) = watcher {
            self.shared.event_loop.input_remove(id);
        }
    }

    fn on_transport_ready(&self) {
        let go = {
            let mut st = self.lock();
            if st.status != XferStatus::Started {
                return;
            }
            st.gate.mark_protocol_ready()
        };
        if go {
            self.pump();
        } else {
            debug!(xfer = %self.id(), "protocol ready, waiting for UI");
            self.remove_watcher();
        }
    }

    /// The UI can take part in the next pump (custom UI I/O only).
    pub fn ui_ready(&self) {
        let (go, rewatch) = {
            let mut st = self.lock();
            let go = st.gate.mark_ui_ready();
            let rewatch = if go && st.watcher.is_none() && st.status == XferStatus::Started {
                st.transport.clone()
            } else {
                None
            };
            (go, rewatch)
        };
        if !go {
            debug!(xfer = %self.id(), "UI ready, waiting for protocol");
            return;
        }
        if let Some(transport) = rewatch {
            let cond = match self.role() {
                XferRole::Send => Condition::Write,
                XferRole::Receive => Condition::Read,
            };
            self.add_watcher(transport, cond);
        }
        self.pump();
    }

    /// The backend can take part in the next pump. Needed only when there
    /// is no transport to watch.
    pub fn protocol_ready(&self) {
        let go = self.lock().gate.mark_protocol_ready();
        if go {
            self.pump();
        } else {
            debug!(xfer = %self.id(), "protocol ready, waiting for UI");
        }
    }

    /// Successful end. On a transfer that is not `Done` this is a local
    /// cancel.
    pub fn end(&self) {
        if !self.is_completed() {
            self.cancel_local();
            return;
        }
        {
            let mut st = self.lock();
            if st.torn_down {
                warn!(xfer = %self.id(), "end after teardown");
                return;
            }
            st.torn_down = true;
            if st.end_time.is_none() {
                st.end_time = Some(Utc::now());
            }
        }
        if let Some(ops) = self.ops() {
            ops.end(self);
        }
        let released = self.lock().detach();
        let keep_alive = self.release(released);
        info!(
            xfer = %self.id(),
            role = %self.role(),
            bytes = self.bytes_transferred(),
            "transfer complete"
        );
        drop(keep_alive);
    }

    /// Local abort. Safe to call more than once.
    pub fn cancel_local(&self) {
        self.cancel(XferStatus::CancelledLocal);
    }

    /// The peer aborted or the transport failed.
    pub fn cancel_remote(&self) {
        self.cancel(XferStatus::CancelledRemote);
    }

    fn cancel(&self, status: XferStatus) {
        self.close_requests();
        let (signal, filename) = {
            let mut st = self.lock();
            if st.torn_down {
                warn!(xfer = %self.id(), %status, "duplicate terminal call ignored");
                return;
            }
            st.torn_down = true;
            let signal = st.transition(self.role(), status);
            if st.end_time.is_none() {
                st.end_time = Some(Utc::now());
            }
            (signal, st.filename.clone())
        };
        self.emit(signal);

        let remote = status == XferStatus::CancelledRemote;
        let msg = match (remote, &filename) {
            (false, Some(name)) => format!("You cancelled the transfer of {name}"),
            (false, None) => "File transfer cancelled".to_string(),
            (true, Some(name)) => format!("{} cancelled the transfer of {name}", self.peer()),
            (true, None) => format!("{} cancelled the file transfer", self.peer()),
        };
        self.shared.conversation_write(self, &msg, remote);
        if remote {
            self.shared
                .xfer_error(self.role(), self.account(), self.peer(), &msg);
        }

        if let Some(ops) = self.ops() {
            match self.role() {
                XferRole::Send => ops.cancel_send(self),
                XferRole::Receive => ops.cancel_recv(self),
            }
        }

        let released = {
            let mut st = self.lock();
            st.bytes_remaining = 0;
            st.detach()
        };
        let keep_alive = self.release(released);

        if let Some(ui) = &self.shared.ui_ops {
            if remote {
                ui.cancel_remote(self);
            } else {
                ui.cancel_local(self);
            }
        }
        info!(xfer = %self.id(), %status, "transfer cancelled");
        drop(keep_alive);
    }
}
