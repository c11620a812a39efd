//! Session coordinator: owns the two rendezvous slots and the lifecycle.
//!
//! The operator relays an [`Instruction`] and blocks until the agent reports
//! an [`Outcome`]; the agent reports the previous outcome and blocks until
//! the next [`AgentAction`]. Exactly one instruction may be outstanding at a
//! time.

mod state;
mod types;

pub use state::{SessionState, SessionStateParseError};
pub use types::{AgentAction, Instruction, Outcome, Side};

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::slot::{CloseReason, RendezvousSlot, SlotError};

impl From<SlotError> for BridgeError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::AlreadyPending => BridgeError::AlreadyPending,
            SlotError::Closed(CloseReason::Terminated) => BridgeError::SessionClosed,
            SlotError::Closed(CloseReason::Disconnected) => BridgeError::PeerDisconnected,
        }
    }
}

/// Point-in-time view of a session, used for status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    /// Completed instruction/outcome pairs.
    pub exchanges: u64,
    pub relay_in_flight: bool,
    pub current_label: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    agent_attached: bool,
    operator_attached: bool,
    /// An operator call is blocked waiting for its outcome.
    relay_in_flight: bool,
    /// Delivered to the agent, outcome not yet reported.
    outstanding: Option<Instruction>,
    terminate_requested: bool,
    exchanges: u64,
    current_label: Option<String>,
}

/// Synchronizes one agent and one operator through two rendezvous slots.
///
/// Safe to share behind an `Arc` between the agent transport and the
/// operator transport.
#[derive(Debug)]
pub struct SessionCoordinator {
    id: Uuid,
    started_at: DateTime<Utc>,
    instructions: RendezvousSlot<AgentAction>,
    results: RendezvousSlot<Outcome>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    pub fn new() -> Self {
        let initial = SessionState::AwaitingAgentConnection;
        let (state_tx, _) = watch::channel(initial);
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            instructions: RendezvousSlot::new(),
            results: RendezvousSlot::new(),
            inner: Mutex::new(Inner {
                state: initial,
                agent_attached: false,
                operator_attached: false,
                relay_in_flight: false,
                outstanding: None,
                terminate_requested: false,
                exchanges: 0,
                current_label: None,
            }),
            state_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Watch lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Resolve once the session reaches `closed` or `aborted`.
    pub async fn wait_for_terminal(&self) -> SessionState {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot fail here.
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.lock();
        SessionSnapshot {
            session_id: self.id,
            state: inner.state,
            started_at: self.started_at,
            exchanges: inner.exchanges,
            relay_in_flight: inner.relay_in_flight,
            current_label: inner.current_label.clone(),
        }
    }

    pub fn is_attached(&self, side: Side) -> bool {
        let inner = self.lock();
        match side {
            Side::Agent => inner.agent_attached,
            Side::Operator => inner.operator_attached,
        }
    }

    /// Record that `side` has connected.
    ///
    /// Attaching is implicit in every operation; transports call this
    /// directly only when a side announces itself without exchanging work.
    pub fn attach(&self, side: Side) -> Result<(), BridgeError> {
        let mut inner = self.lock();
        Self::check_open(&inner)?;
        self.attach_locked(&mut inner, side);
        Ok(())
    }

    /// Operator side: hand `instruction` to the agent and wait for its outcome.
    ///
    /// Fails with [`BridgeError::AlreadyPending`] while a previous relay is
    /// unresolved and with [`BridgeError::SessionClosed`] once termination
    /// has been requested. Dropping the returned future before it resolves
    /// counts as an operator disconnect and aborts the session.
    pub async fn relay_to_agent(&self, instruction: Instruction) -> Result<Outcome, BridgeError> {
        {
            let mut inner = self.lock();
            Self::check_open(&inner)?;
            if inner.terminate_requested {
                return Err(BridgeError::SessionClosed);
            }
            if inner.relay_in_flight {
                tracing::warn!(session_id = %self.id, "rejected relay: previous instruction unresolved");
                return Err(BridgeError::AlreadyPending);
            }
            self.attach_locked(&mut inner, Side::Operator);

            let label = instruction.label.clone();
            self.instructions
                .deposit(AgentAction::Instruction(instruction))?;
            inner.relay_in_flight = true;
            tracing::info!(
                session_id = %self.id,
                label = label.as_deref().unwrap_or("-"),
                "instruction queued for agent"
            );
            inner.current_label = label;
        }

        let mut guard = RelayGuard {
            coordinator: self,
            resolved: false,
        };
        let result = self.results.await_value().await;
        guard.resolved = true;
        drop(guard);

        Ok(result?)
    }

    /// Agent side: report the previous outcome (if any) and wait for the
    /// next action.
    ///
    /// `prior` is `None` on the first call. An outcome reported while no
    /// instruction is outstanding has nobody to go to and is discarded. A
    /// call without an outcome while an instruction is outstanding gets that
    /// instruction again.
    pub async fn next_agent_action(&self, prior: Option<Outcome>) -> Result<AgentAction, BridgeError> {
        {
            let mut inner = self.lock();
            Self::check_open(&inner)?;
            self.attach_locked(&mut inner, Side::Agent);

            match prior {
                Some(outcome) if inner.outstanding.is_some() => {
                    self.results.deposit(outcome)?;
                    inner.outstanding = None;
                    inner.exchanges += 1;
                    tracing::debug!(session_id = %self.id, exchanges = inner.exchanges, "outcome delivered");
                }
                Some(_) => {
                    tracing::debug!(
                        session_id = %self.id,
                        "discarding agent output: no instruction outstanding"
                    );
                }
                None => {
                    if let Some(instruction) = &inner.outstanding {
                        tracing::warn!(
                            session_id = %self.id,
                            "agent advanced without a result; repeating the outstanding instruction"
                        );
                        return Ok(AgentAction::Instruction(instruction.clone()));
                    }
                }
            }
        }

        let action = self.instructions.await_value().await?;

        let mut inner = self.lock();
        match &action {
            AgentAction::Instruction(instruction) => inner.outstanding = Some(instruction.clone()),
            AgentAction::Terminate => {
                self.transition(&mut inner, SessionState::Closed);
                self.instructions.close(CloseReason::Terminated);
                self.results.close(CloseReason::Terminated);
                tracing::info!(session_id = %self.id, "session closed");
            }
        }
        Ok(action)
    }

    /// Operator side: ask the agent to end the session.
    ///
    /// Returns as soon as the signal is queued; nothing is awaited.
    pub fn terminate(&self) -> Result<(), BridgeError> {
        let mut inner = self.lock();
        Self::check_open(&inner)?;
        if inner.terminate_requested {
            return Err(BridgeError::SessionClosed);
        }
        if inner.relay_in_flight {
            return Err(BridgeError::AlreadyPending);
        }
        self.attach_locked(&mut inner, Side::Operator);

        self.instructions.deposit(AgentAction::Terminate)?;
        inner.terminate_requested = true;
        tracing::info!(session_id = %self.id, "termination requested");
        Ok(())
    }

    /// A transport noticed that `side` went away.
    ///
    /// Aborts a live session and releases every blocked party with
    /// [`BridgeError::PeerDisconnected`]. Terminal sessions are unaffected.
    pub fn disconnect(&self, side: Side) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        tracing::warn!(session_id = %self.id, %side, "peer disconnected, aborting session");
        self.transition(&mut inner, SessionState::Aborted);
        self.instructions.close(CloseReason::Disconnected);
        self.results.close(CloseReason::Disconnected);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_open(inner: &Inner) -> Result<(), BridgeError> {
        match inner.state {
            SessionState::Closed => Err(BridgeError::SessionClosed),
            SessionState::Aborted => Err(BridgeError::PeerDisconnected),
            _ => Ok(()),
        }
    }

    fn attach_locked(&self, inner: &mut Inner, side: Side) {
        let already = match side {
            Side::Agent => std::mem::replace(&mut inner.agent_attached, true),
            Side::Operator => std::mem::replace(&mut inner.operator_attached, true),
        };
        if already {
            return;
        }
        tracing::info!(session_id = %self.id, %side, "attached");

        let next = match (inner.state, side) {
            (SessionState::AwaitingAgentConnection, Side::Agent) if inner.operator_attached => {
                SessionState::Ready
            }
            (SessionState::AwaitingAgentConnection, Side::Agent) => {
                SessionState::AwaitingOperatorConnection
            }
            (SessionState::AwaitingOperatorConnection, Side::Operator) => SessionState::Ready,
            _ => return,
        };
        self.transition(inner, next);
    }

    fn transition(&self, inner: &mut Inner, to: SessionState) {
        let from = inner.state;
        if !SessionState::is_valid_transition(from, to) {
            tracing::error!(session_id = %self.id, %from, %to, "ignoring invalid session transition");
            return;
        }
        inner.state = to;
        self.state_tx.send_replace(to);
        tracing::debug!(session_id = %self.id, %from, %to, "session transition");
    }
}

/// Clears the in-flight marker when a relay finishes, and treats an
/// abandoned relay as an operator disconnect.
struct RelayGuard<'a> {
    coordinator: &'a SessionCoordinator,
    resolved: bool,
}

impl Drop for RelayGuard<'_> {
    fn drop(&mut self) {
        {
            let mut inner = self.coordinator.lock();
            inner.relay_in_flight = false;
            inner.current_label = None;
        }
        if !self.resolved {
            self.coordinator.disconnect(Side::Operator);
        }
    }
}
