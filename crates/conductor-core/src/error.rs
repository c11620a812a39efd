//! Error taxonomy shared by both sides of the bridge.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors surfaced by the session coordinator and the task registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A second deposit or relay was attempted before the first resolved.
    #[error("a request is already pending on this side of the session")]
    AlreadyPending,

    /// The session was terminated; no further exchanges are possible.
    #[error("the session has been closed")]
    SessionClosed,

    /// The other side went away while this side was waiting.
    #[error("the peer disconnected before the exchange completed")]
    PeerDisconnected,

    /// A task unit is missing or could not be loaded.
    #[error("task {name:?} could not be loaded: {reason}")]
    TaskNotFound { name: String, reason: String },
}

impl BridgeError {
    /// Stable snake_case identifier used on the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyPending => ErrorKind::AlreadyPending,
            Self::SessionClosed => ErrorKind::SessionClosed,
            Self::PeerDisconnected => ErrorKind::PeerDisconnected,
            Self::TaskNotFound { .. } => ErrorKind::TaskNotFound,
        }
    }
}

/// Wire identifier for a [`BridgeError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyPending,
    SessionClosed,
    PeerDisconnected,
    TaskNotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyPending => "already_pending",
            Self::SessionClosed => "session_closed",
            Self::PeerDisconnected => "peer_disconnected",
            Self::TaskNotFound => "task_not_found",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorKind {
    type Err = ErrorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "already_pending" => Ok(Self::AlreadyPending),
            "session_closed" => Ok(Self::SessionClosed),
            "peer_disconnected" => Ok(Self::PeerDisconnected),
            "task_not_found" => Ok(Self::TaskNotFound),
            other => Err(ErrorKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an unknown [`ErrorKind`] string.
#[derive(Debug, Clone, Error)]
#[error("unknown error kind: {0:?}")]
pub struct ErrorKindParseError(pub String);
