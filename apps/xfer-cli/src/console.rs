//! Terminal presentation: progress line (or JSON lines) and user prompts.

use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use purple_xfer::{
    Prompt, SpeedCalculator, Transfer, XferId, XferNotifier, XferSignal, XferUiOps, format_size,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};

const REDRAW_INTERVAL: Duration = Duration::from_millis(200);

/// What the core tells the application loop.
#[derive(Debug)]
pub enum AppEvent {
    Prompt(XferId, Prompt),
    Signal(XferSignal),
}

#[derive(Default)]
struct Meter {
    last_bytes: u64,
    last_draw: Option<Instant>,
}

/// Draws progress on stderr, or prints one JSON snapshot per update on
/// stdout.
pub struct ConsoleUi {
    json: bool,
    speed: SpeedCalculator,
    meter: Mutex<Meter>,
}

impl ConsoleUi {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            speed: SpeedCalculator::default(),
            meter: Mutex::new(Meter::default()),
        }
    }

    fn finish_line(&self) {
        if !self.json {
            eprintln!();
        }
    }
}

impl XferUiOps for ConsoleUi {
    fn add_xfer(&self, xfer: &Transfer) {
        let name = xfer.filename().unwrap_or_else(|| "file".into());
        if !self.json {
            eprintln!("{name} ({}) with {}", format_size(xfer.size()), xfer.peer());
        }
    }

    fn update_progress(&self, xfer: &Transfer, fraction: f64) {
        let bytes = xfer.bytes_transferred();
        {
            let mut meter = self.meter.lock().unwrap_or_else(PoisonError::into_inner);
            self.speed.add_sample(bytes.saturating_sub(meter.last_bytes));
            meter.last_bytes = bytes;

            let due = meter
                .last_draw
                .is_none_or(|at| at.elapsed() >= REDRAW_INTERVAL);
            if !due && fraction < 1.0 {
                return;
            }
            meter.last_draw = Some(Instant::now());
        }

        if self.json {
            match serde_json::to_string(&xfer.snapshot()) {
                Ok(line) => println!("{line}"),
                Err(e) => error!(error = %e, "failed to encode progress"),
            }
            return;
        }

        let speed = self.speed.bytes_per_second();
        let eta = self
            .speed
            .eta(xfer.bytes_remaining())
            .map_or_else(|| "--".to_string(), |d| format!("{}s", d.as_secs()));
        eprint!(
            "\r{:5.1}%  {} / {}  {}/s  ETA {eta}   ",
            fraction * 100.0,
            format_size(bytes),
            format_size(xfer.size()),
            format_size(speed as u64),
        );
        let _ = std::io::stderr().flush();
    }

    fn cancel_local(&self, _xfer: &Transfer) {
        self.finish_line();
    }

    fn cancel_remote(&self, _xfer: &Transfer) {
        self.finish_line();
    }
}

/// Routes conversation lines and errors to the terminal and forwards
/// prompts to the application loop.
pub struct ConsoleNotifier {
    events: UnboundedSender<AppEvent>,
}

impl ConsoleNotifier {
    pub fn new(events: UnboundedSender<AppEvent>) -> Self {
        Self { events }
    }
}

impl XferNotifier for ConsoleNotifier {
    fn conversation_write(&self, xfer: &Transfer, message: &str, is_error: bool) {
        if is_error {
            warn!(xfer = %xfer.id(), "{message}");
        } else {
            debug!(xfer = %xfer.id(), "{message}");
        }
        eprintln!("{message}");
    }

    fn notify_error(&self, account: &str, title: &str, message: &str) {
        error!(account, "{title} {message}");
        eprintln!("{title}\n{message}");
    }

    fn request(&self, xfer: &Transfer, prompt: &Prompt) {
        if self
            .events
            .send(AppEvent::Prompt(xfer.id(), prompt.clone()))
            .is_err()
        {
            warn!(xfer = %xfer.id(), "prompt dropped, application loop gone");
        }
    }

    fn close_requests(&self, xfer: &Transfer) {
        debug!(xfer = %xfer.id(), "prompts closed");
    }
}
