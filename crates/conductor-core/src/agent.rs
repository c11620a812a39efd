//! Agent-facing adapter: turns the coordinator into a single repeatable tool.
//!
//! Every tool invocation carries the previous result (absent on the first
//! call) and returns text describing what the agent should do next.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::BridgeError;
use crate::session::{AgentAction, Instruction, Outcome, SessionCoordinator, Side};

/// Default name under which the tool is registered with the agent.
pub const DEFAULT_TOOL_NAME: &str = "conductor";

/// Text returned once the operator has ended the session.
pub const COMPLETION_MESSAGE: &str =
    "Conductor mode completed successfully. There are no further instructions; you can stop now.";

/// Arguments of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdvanceRequest {
    /// Result of the previous instruction. Leave out on the first call.
    #[serde(default)]
    pub output: Option<String>,
    /// Whether the previous instruction was completed.
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

impl AdvanceRequest {
    /// The first call of a session: nothing to report.
    pub fn first() -> Self {
        Self {
            output: None,
            success: true,
        }
    }

    pub fn report(output: impl Into<String>, success: bool) -> Self {
        Self {
            output: Some(output.into()),
            success,
        }
    }

    fn into_outcome(self) -> Option<Outcome> {
        self.output.map(|output| Outcome {
            output,
            success: self.success,
        })
    }
}

/// Exposes a [`SessionCoordinator`] through the agent's calling convention.
#[derive(Debug, Clone)]
pub struct AgentAdapter {
    coordinator: Arc<SessionCoordinator>,
    tool_name: String,
    bootstrap_hint: Option<String>,
}

impl AgentAdapter {
    pub fn new(coordinator: Arc<SessionCoordinator>) -> Self {
        Self {
            coordinator,
            tool_name: DEFAULT_TOOL_NAME.to_string(),
            bootstrap_hint: None,
        }
    }

    /// Register the tool under a different name. The name also appears in
    /// the guidance text so the agent knows what to call back.
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    /// Answer the very first, empty invocation with `hint` instead of
    /// blocking, e.g. to tell the agent how to start the operator.
    pub fn with_bootstrap_hint(mut self, hint: impl Into<String>) -> Self {
        self.bootstrap_hint = Some(hint.into());
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// Handle one tool invocation.
    pub async fn advance(&self, request: AdvanceRequest) -> Result<String, BridgeError> {
        if request.output.is_none() {
            if let Some(hint) = &self.bootstrap_hint {
                if !self.coordinator.is_attached(Side::Agent) {
                    self.coordinator.attach(Side::Agent)?;
                    return Ok(hint.clone());
                }
            }
        }

        match self.coordinator.next_agent_action(request.into_outcome()).await? {
            AgentAction::Instruction(instruction) => Ok(self.render_instruction(&instruction)),
            AgentAction::Terminate => Ok(COMPLETION_MESSAGE.to_string()),
        }
    }

    /// Report that the agent transport went away.
    pub fn disconnect(&self) {
        self.coordinator.disconnect(Side::Agent);
    }

    fn render_instruction(&self, instruction: &Instruction) -> String {
        let tool = &self.tool_name;
        format!(
            "Carry out exactly the following instructions:\n\
             <instructions>\n\n{text}\n\n</instructions>\n\n\
             When you are done, call the `{tool}` tool again and put the result in its `output` field. \
             Do not reply with the result directly.\n\
             Do only what the instructions describe. Do not try to fix problems or make extra changes \
             unless the instructions explicitly ask for it.\n\
             If you cannot complete the instructions, call the `{tool}` tool with `success` set to false \
             and a short explanation of what went wrong in `output`.",
            text = instruction.text.trim_end(),
        )
    }
}
