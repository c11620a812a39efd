use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
///
/// ```text
/// awaiting_agent_connection    -> awaiting_operator_connection  (agent attaches)
/// awaiting_agent_connection    -> ready                         (agent attaches, operator already did)
/// awaiting_operator_connection -> ready                         (operator attaches)
/// ready                        -> closed                        (termination delivered)
/// any non-terminal             -> aborted                       (a side disconnects)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingAgentConnection,
    AwaitingOperatorConnection,
    Ready,
    Closed,
    Aborted,
}

impl SessionState {
    /// Check whether `from -> to` is an edge of the lifecycle graph.
    pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
        use SessionState::{Aborted, AwaitingAgentConnection, AwaitingOperatorConnection, Closed, Ready};

        matches!(
            (from, to),
            (AwaitingAgentConnection, AwaitingOperatorConnection)
                | (AwaitingAgentConnection, Ready)
                | (AwaitingOperatorConnection, Ready)
                | (Ready, Closed)
                | (AwaitingAgentConnection, Aborted)
                | (AwaitingOperatorConnection, Aborted)
                | (Ready, Aborted)
        )
    }

    /// `true` for `closed` and `aborted`; no edge leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingAgentConnection => "awaiting_agent_connection",
            Self::AwaitingOperatorConnection => "awaiting_operator_connection",
            Self::Ready => "ready",
            Self::Closed => "closed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionState {
    type Err = SessionStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_agent_connection" => Ok(Self::AwaitingAgentConnection),
            "awaiting_operator_connection" => Ok(Self::AwaitingOperatorConnection),
            "ready" => Ok(Self::Ready),
            "closed" => Ok(Self::Closed),
            "aborted" => Ok(Self::Aborted),
            other => Err(SessionStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SessionState`] string.
#[derive(Debug, Clone)]
pub struct SessionStateParseError(pub String);

impl fmt::Display for SessionStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session state: {:?}", self.0)
    }
}

impl std::error::Error for SessionStateParseError {}
