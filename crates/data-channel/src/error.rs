//! Error types for the data channel.

/// Errors produced by the TCP data channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid file name: {0}")]
    InvalidPath(String),
}

impl From<purple_xfer::XferError> for ChannelError {
    fn from(e: purple_xfer::XferError) -> Self {
        match e {
            purple_xfer::XferError::InvalidPath(msg) => Self::InvalidPath(msg),
            purple_xfer::XferError::Io(e) => Self::Io(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}
