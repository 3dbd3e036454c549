use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{INITIAL_BUFFER_SIZE, MAX_BUFFER_SIZE};

/// Process-unique transfer identifier, assigned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct XferId(pub u64);

impl fmt::Display for XferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xfer-{}", self.0)
    }
}

/// Direction of a transfer, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XferRole {
    Send,
    Receive,
}

impl fmt::Display for XferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Receive => f.write_str("receive"),
        }
    }
}

/// Transfer state.
///
/// ```text
/// NotStarted -> Accepted -> Started -> Done
///      \            \          \
///       +------------+----------+--> CancelledLocal | CancelledRemote
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XferStatus {
    NotStarted,
    Accepted,
    Started,
    Done,
    CancelledLocal,
    CancelledRemote,
}

impl XferStatus {
    /// `Done`, `CancelledLocal` and `CancelledRemote` are never left.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::CancelledLocal | Self::CancelledRemote
        )
    }

    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::CancelledLocal | Self::CancelledRemote)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: XferStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        match next {
            Self::NotStarted => false,
            Self::Accepted => self == Self::NotStarted,
            Self::Started => matches!(self, Self::NotStarted | Self::Accepted),
            Self::Done => self == Self::Started,
            Self::CancelledLocal | Self::CancelledRemote => true,
        }
    }
}

impl fmt::Display for XferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Accepted => "accepted",
            Self::Started => "started",
            Self::Done => "done",
            Self::CancelledLocal => "cancelled locally",
            Self::CancelledRemote => "cancelled remotely",
        };
        f.write_str(s)
    }
}

/// Pump buffer sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XferConfig {
    #[serde(default = "default_initial_buffer_size")]
    pub initial_buffer_size: usize,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

fn default_initial_buffer_size() -> usize {
    INITIAL_BUFFER_SIZE
}

fn default_max_buffer_size() -> usize {
    MAX_BUFFER_SIZE
}

impl Default for XferConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: INITIAL_BUFFER_SIZE,
            max_buffer_size: MAX_BUFFER_SIZE,
        }
    }
}

impl XferConfig {
    /// Returns a copy with `1 <= initial <= max`.
    pub fn clamped(self) -> Self {
        let max = self.max_buffer_size.max(1);
        Self {
            initial_buffer_size: self.initial_buffer_size.clamp(1, max),
            max_buffer_size: max,
        }
    }
}

/// Preview image attached to an offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub data: Vec<u8>,
    pub mimetype: String,
}

/// A question the core needs the user (or an automated policy) to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Incoming offer with a known name. Answer with `respond_accept`.
    Offer {
        primary: String,
        thumbnail: Option<Thumbnail>,
    },
    /// Incoming request whose name is not known yet. Answer with
    /// `respond_accept`.
    Accept {
        primary: String,
        secondary: Option<String>,
    },
    /// Pick a file to send (`save == false`) or a place to save into.
    /// Answer with `respond_file`.
    ChooseFile {
        suggested: Option<String>,
        save: bool,
    },
}

impl Prompt {
    pub fn kind(&self) -> PromptKind {
        match self {
            Self::Offer { .. } => PromptKind::Offer,
            Self::Accept { .. } => PromptKind::Accept,
            Self::ChooseFile { .. } => PromptKind::ChooseFile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Offer,
    Accept,
    ChooseFile,
}

/// Point-in-time view of a transfer, suitable for serialising to a UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XferProgress {
    pub id: XferId,
    pub role: XferRole,
    pub status: XferStatus,
    pub peer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub total_size: u64,
    pub bytes_transferred: u64,
    pub bytes_remaining: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl XferProgress {
    /// Completion in percent, 0 when the size is unknown.
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_size as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(XferStatus::NotStarted.to_string(), "not started");
        assert_eq!(XferStatus::CancelledLocal.to_string(), "cancelled locally");
        assert_eq!(XferStatus::CancelledRemote.to_string(), "cancelled remotely");
    }

    #[test]
    fn terminal_states_are_never_left() {
        let all = [
            XferStatus::NotStarted,
            XferStatus::Accepted,
            XferStatus::Started,
            XferStatus::Done,
            XferStatus::CancelledLocal,
            XferStatus::CancelledRemote,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn nothing_returns_to_not_started() {
        assert!(!XferStatus::Accepted.can_transition_to(XferStatus::NotStarted));
        assert!(!XferStatus::Started.can_transition_to(XferStatus::NotStarted));
    }

    #[test]
    fn done_only_from_started() {
        assert!(XferStatus::Started.can_transition_to(XferStatus::Done));
        assert!(!XferStatus::NotStarted.can_transition_to(XferStatus::Done));
        assert!(!XferStatus::Accepted.can_transition_to(XferStatus::Done));
    }

    #[test]
    fn cancel_from_any_live_state() {
        for s in [XferStatus::NotStarted, XferStatus::Accepted, XferStatus::Started] {
            assert!(s.can_transition_to(XferStatus::CancelledLocal));
            assert!(s.can_transition_to(XferStatus::CancelledRemote));
        }
    }

    #[test]
    fn config_clamps() {
        let c = XferConfig {
            initial_buffer_size: 0,
            max_buffer_size: 0,
        }
        .clamped();
        assert_eq!(c.initial_buffer_size, 1);
        assert_eq!(c.max_buffer_size, 1);

        let c = XferConfig {
            initial_buffer_size: 100_000,
            max_buffer_size: 8192,
        }
        .clamped();
        assert_eq!(c.initial_buffer_size, 8192);
    }

    #[test]
    fn config_defaults_from_partial_json() {
        let c: XferConfig = serde_json::from_str(r#"{"max_buffer_size": 8192}"#).unwrap();
        assert_eq!(c.initial_buffer_size, INITIAL_BUFFER_SIZE);
        assert_eq!(c.max_buffer_size, 8192);
    }

    #[test]
    fn progress_serializes_camel_case() {
        let p = XferProgress {
            id: XferId(7),
            role: XferRole::Send,
            status: XferStatus::Started,
            peer: "alice".into(),
            filename: Some("a.txt".into()),
            total_size: 200,
            bytes_transferred: 50,
            bytes_remaining: 150,
            started_at: None,
            ended_at: None,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"bytesTransferred\":50"));
        assert!(json.contains("\"status\":\"started\""));
        assert!(!json.contains("startedAt"));
        assert_eq!(p.percentage(), 25.0);
    }
}
