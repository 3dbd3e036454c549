//! File-transfer core for instant-messaging clients.
//!
//! A [`Transfer`] is one file moving to or from a remote peer. Protocol
//! backends plug in through [`XferOps`], the presentation layer through
//! [`XferUiOps`] and [`XferNotifier`], and the surrounding event loop
//! through [`EventLoop`]. Everything is driven by readiness callbacks:
//! the pump moves at most one buffer per invocation and never blocks.
//!
//! ```text
//! new_xfer -> request -> request_accepted -> (backend init) -> start
//!          -> pump ... pump -> end | cancel_local | cancel_remote
//! ```

mod event_loop;
mod lifecycle;
mod manager;
mod ops;
mod progress;
mod pump;
mod readiness;
mod registry;
mod signals;
mod types;
mod validation;
mod xfer;

pub use event_loop::{
    Condition, ConnectCallback, EventLoop, InputCallback, ManualEventLoop, Transport, WatchId,
};
pub use manager::{XferManager, XferManagerBuilder};
pub use ops::{XferIo, XferNotifier, XferOps, XferUiOps};
pub use progress::{SpeedCalculator, format_size};
pub use pump::grow_buffer_size;
pub use readiness::{Readiness, ReadinessGate};
pub use registry::Registry;
pub use signals::{SignalBus, SubscriptionId, XferSignal};
pub use types::{
    Prompt, PromptKind, Thumbnail, XferConfig, XferId, XferProgress, XferRole, XferStatus,
};
pub use validation::{LocalFileCheck, check_local_path, validate_local_filename, validate_remote_filename};
pub use xfer::Transfer;

use std::path::PathBuf;

/// Buffer size used for the first pump iteration.
pub const INITIAL_BUFFER_SIZE: usize = 4096;

/// Upper bound for the adaptive pump buffer.
pub const MAX_BUFFER_SIZE: usize = 65535;

/// Errors produced by the transfer core.
#[derive(Debug, thiserror::Error)]
pub enum XferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("cannot send a file of 0 bytes: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("cannot send a directory: {}", .0.display())]
    IsDirectory(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotRegularFile(PathBuf),

    #[error("file is not readable: {}", .0.display())]
    NotReadable(PathBuf),

    #[error("directory is not writable: {}", .0.display())]
    DirectoryNotWritable(PathBuf),

    #[error("backend has not provided transfer operations")]
    MissingInit,

    #[error("no file was chosen")]
    NoFileChosen,

    #[error("no prompt of that kind is pending")]
    NoPendingPrompt,

    #[error("transfer already {0}")]
    Terminal(XferStatus),

    #[error("transfer is being started multiple times")]
    AlreadyStarted,

    #[error("no transport is bound to the transfer")]
    NoTransport,
}
