use std::fmt;

use serde::{Deserialize, Serialize};

/// A unit of work relayed from the operator to the agent.
///
/// The text is opaque to the bridge; the label is only shown in status
/// output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Instruction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// What the agent reported back for the most recent instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub output: String,
    /// The agent's own judgement of whether it completed the instruction.
    pub success: bool,
}

impl Outcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }
}

/// The next thing the agent should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentAction {
    Instruction(Instruction),
    /// End of session; no further instructions follow.
    Terminate,
}

/// One of the two parties of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Agent,
    Operator,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => f.write_str("agent"),
            Self::Operator => f.write_str("operator"),
        }
    }
}
