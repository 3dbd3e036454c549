//! Tokio plumbing for the purple-xfer core.
//!
//! [`TokioEventLoop`] drives the core's readiness watchers on a tokio
//! runtime, [`TcpTransport`] adapts a non-blocking `TcpStream` to the
//! core's [`Transport`](purple_xfer::Transport) seam, and [`wire`] holds
//! the small offer header exchanged before the file bytes.
//!
//! # Wire format
//!
//! See [`wire`] module for the header layout.

pub mod error;
pub mod event_loop;
pub mod listener;
pub mod transport;
pub mod wire;

pub use error::ChannelError;
pub use event_loop::TokioEventLoop;
pub use listener::OfferListener;
pub use transport::TcpTransport;
pub use wire::OfferHeader;

use std::time::Duration;

/// Timeout for an outbound connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a sender waits for the receiving peer to connect.
pub const TCP_ACCEPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for exchanging the offer header.
pub const HEADER_TIMEOUT: Duration = Duration::from_secs(5);
