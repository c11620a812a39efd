//! Rendezvous core bridging an AI agent session and a local operator process.
//!
//! The agent can only act by repeatedly calling one tool; the operator drives
//! multi-step tasks and delegates single instructions to the agent. The
//! [`SessionCoordinator`] hands exactly one unit of work across at a time in
//! each direction.
//!
//! ```text
//! operator --relay--> OperatorAdapter --> [instruction slot] --> AgentAdapter --> agent
//! operator <--result- OperatorAdapter <-- [result slot]      <-- AgentAdapter <-- agent
//! ```

pub mod agent;
pub mod error;
pub mod mcp;
pub mod operator;
pub mod session;
pub mod slot;
pub mod task;

pub use agent::{AdvanceRequest, AgentAdapter};
pub use error::BridgeError;
pub use operator::OperatorAdapter;
pub use session::{AgentAction, Instruction, Outcome, SessionCoordinator, SessionState, Side};
pub use slot::RendezvousSlot;
