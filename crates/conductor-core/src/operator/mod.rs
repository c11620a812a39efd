//! Operator-facing adapter and its HTTP surface.
//!
//! ```text
//! task loop --OperatorClient--> POST /relay --routes--> OperatorAdapter::relay
//!                                                        |
//!                                                        v
//!                                             SessionCoordinator::relay_to_agent
//! ```

pub mod client;
pub mod routes;

use std::sync::Arc;

use crate::error::BridgeError;
use crate::session::{Instruction, Outcome, SessionCoordinator, SessionSnapshot};

pub use client::{ClientError, OperatorClient};
pub use routes::build_router;

/// Exposes a [`SessionCoordinator`] as "ask the agent, get the text back"
/// plus a one-shot "end the session".
#[derive(Debug, Clone)]
pub struct OperatorAdapter {
    coordinator: Arc<SessionCoordinator>,
}

impl OperatorAdapter {
    pub fn new(coordinator: Arc<SessionCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Relay one instruction and wait for the agent's outcome.
    ///
    /// If the caller stops waiting (the returned future is dropped), the
    /// coordinator treats the operator as disconnected and aborts the
    /// session rather than leaving the agent with an orphaned instruction.
    pub async fn relay(&self, instruction: Instruction) -> Result<Outcome, BridgeError> {
        self.coordinator.relay_to_agent(instruction).await
    }

    /// End the session. Nothing is awaited from the agent.
    pub fn terminate(&self) -> Result<(), BridgeError> {
        self.coordinator.terminate()
    }

    pub fn status(&self) -> SessionSnapshot {
        self.coordinator.snapshot()
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }
}
