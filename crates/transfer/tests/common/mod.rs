#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use purple_xfer::{
    ManualEventLoop, Prompt, Transfer, Transport, XferConfig, XferIo, XferManager, XferNotifier,
    XferOps, XferRole, XferUiOps,
};

/// In-memory transport with scripted reads, optional write cap and a
/// close counter.
#[derive(Default)]
pub struct MockTransport {
    inbound: Mutex<VecDeque<Vec<u8>>>,
    eof: AtomicBool,
    fail_writes: AtomicBool,
    write_cap: Option<usize>,
    written: Mutex<Vec<u8>>,
    closes: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_write_cap(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            write_cap: Some(cap),
            ..Self::default()
        })
    }

    pub fn push_inbound(&self, data: &[u8]) {
        self.inbound.lock().unwrap().push_back(data.to_vec());
    }

    pub fn set_eof(&self) {
        self.eof.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.inbound.lock().unwrap();
        match inbound.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    inbound.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None if self.eof.load(Ordering::SeqCst) => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = self.write_cap.map_or(buf.len(), |cap| cap.min(buf.len()));
        self.written.lock().unwrap().extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

type InitHook = Box<dyn Fn(&Transfer) + Send + Sync>;

/// Backend that records every hook and every acked byte.
#[derive(Default)]
pub struct RecordingBackend {
    pub events: Mutex<Vec<&'static str>>,
    pub acked: Mutex<Vec<u8>>,
    on_init: Option<InitHook>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_init(hook: impl Fn(&Transfer) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            on_init: Some(Box::new(hook)),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    pub fn acked(&self) -> Vec<u8> {
        self.acked.lock().unwrap().clone()
    }

    fn push(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

impl XferOps for RecordingBackend {
    fn init(&self, xfer: &Transfer) {
        self.push("init");
        if let Some(hook) = &self.on_init {
            hook(xfer);
        }
    }
    fn request_denied(&self, _xfer: &Transfer) {
        self.push("request_denied");
    }
    fn start(&self, _xfer: &Transfer) {
        self.push("start");
    }
    fn end(&self, _xfer: &Transfer) {
        self.push("end");
    }
    fn cancel_send(&self, _xfer: &Transfer) {
        self.push("cancel_send");
    }
    fn cancel_recv(&self, _xfer: &Transfer) {
        self.push("cancel_recv");
    }
    fn ack(&self, _xfer: &Transfer, chunk: &[u8]) {
        self.acked.lock().unwrap().extend_from_slice(chunk);
    }
}

/// Byte source/sink owned by the UI, used for custom I/O tests.
#[derive(Default)]
pub struct UiBuffer {
    pub source: Mutex<VecDeque<u8>>,
    pub sink: Mutex<Vec<u8>>,
}

impl XferIo for UiBuffer {
    fn read(&self, _xfer: &Transfer, max: usize) -> io::Result<Vec<u8>> {
        let mut src = self.source.lock().unwrap();
        let n = max.min(src.len());
        Ok(src.drain(..n).collect())
    }

    fn write(&self, _xfer: &Transfer, data: &[u8]) -> io::Result<usize> {
        self.sink.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }
}

/// UI + notifier recording everything the core tells it.
#[derive(Default)]
pub struct RecordingUi {
    pub events: Mutex<Vec<&'static str>>,
    pub messages: Mutex<Vec<(String, bool)>>,
    pub errors: Mutex<Vec<(String, String)>>,
    pub prompts: Mutex<Vec<Prompt>>,
    pub progress: Mutex<Vec<f64>>,
    pub unsent: Mutex<Vec<u8>>,
    pub closed_requests: AtomicUsize,
    /// Answer every ChooseFile prompt with this path, from inside the call.
    pub auto_file: Mutex<Option<PathBuf>>,
    /// Answer every accept prompt with yes, from inside the call.
    pub auto_accept: AtomicBool,
    pub io: Option<Arc<UiBuffer>>,
    pub takes_unsent: bool,
}

impl RecordingUi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_custom_io(io: Arc<UiBuffer>, takes_unsent: bool) -> Arc<Self> {
        Arc::new(Self {
            io: Some(io),
            takes_unsent,
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(String, bool)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.errors.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts.lock().unwrap().last().cloned()
    }

    fn push(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

impl XferUiOps for RecordingUi {
    fn new_xfer(&self, _xfer: &Transfer) {
        self.push("new");
    }
    fn destroy(&self, _xfer: &Transfer) {
        self.push("destroy");
    }
    fn add_xfer(&self, _xfer: &Transfer) {
        self.push("add");
    }
    fn update_progress(&self, _xfer: &Transfer, fraction: f64) {
        self.progress.lock().unwrap().push(fraction);
    }
    fn cancel_local(&self, _xfer: &Transfer) {
        self.push("cancel_local");
    }
    fn cancel_remote(&self, _xfer: &Transfer) {
        self.push("cancel_remote");
    }
    fn custom_io(&self) -> Option<&dyn XferIo> {
        self.io.as_deref().map(|io| io as &dyn XferIo)
    }
    fn takes_unsent_data(&self) -> bool {
        self.takes_unsent
    }
    fn data_not_sent(&self, _xfer: &Transfer, data: &[u8]) {
        self.unsent.lock().unwrap().extend_from_slice(data);
    }
}

impl XferNotifier for RecordingUi {
    fn conversation_write(&self, _xfer: &Transfer, message: &str, is_error: bool) {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), is_error));
    }

    fn notify_error(&self, _account: &str, title: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }

    fn request(&self, xfer: &Transfer, prompt: &Prompt) {
        self.prompts.lock().unwrap().push(prompt.clone());
        match prompt {
            Prompt::ChooseFile { .. } => {
                let path = self.auto_file.lock().unwrap().clone();
                if let Some(path) = path {
                    let _ = xfer.respond_file(Some(&path));
                }
            }
            Prompt::Offer { .. } | Prompt::Accept { .. } => {
                if self.auto_accept.load(Ordering::SeqCst) {
                    let _ = xfer.respond_accept(true);
                }
            }
        }
    }

    fn close_requests(&self, _xfer: &Transfer) {
        self.closed_requests.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Fixture {
    pub event_loop: Arc<ManualEventLoop>,
    pub ui: Arc<RecordingUi>,
    pub manager: XferManager,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_ui(RecordingUi::new(), XferConfig::default())
    }

    pub fn with_ui(ui: Arc<RecordingUi>, config: XferConfig) -> Self {
        let event_loop = Arc::new(ManualEventLoop::new());
        let manager = XferManager::builder(event_loop.clone())
            .ui_ops(ui.clone())
            .notifier(ui.clone())
            .config(config)
            .build();
        Self {
            event_loop,
            ui,
            manager,
        }
    }

    pub fn xfer(&self, role: XferRole, backend: &Arc<RecordingBackend>) -> Arc<Transfer> {
        let xfer = self.manager.new_xfer(role, "me@example.org", "alice");
        xfer.set_ops(backend.clone());
        xfer
    }

    /// Fires watchers until none remain or `limit` rounds pass.
    pub fn run(&self, limit: usize) -> usize {
        let mut rounds = 0;
        while rounds < limit && self.event_loop.dispatch_all() > 0 {
            rounds += 1;
        }
        rounds
    }
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
