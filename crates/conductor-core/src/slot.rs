//! Single-item rendezvous slot.
//!
//! One side deposits a value, the other side awaits it. The slot holds at
//! most one value and admits at most one waiter; anything beyond that is a
//! protocol violation reported as [`SlotError::AlreadyPending`].

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;

/// Why a slot was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The session ended normally.
    Terminated,
    /// A transport went away mid-session.
    Disconnected,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => f.write_str("terminated"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Errors from [`RendezvousSlot`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("slot already has a pending value or waiter")]
    AlreadyPending,

    #[error("slot is closed ({0})")]
    Closed(CloseReason),
}

enum SlotState<T> {
    Empty,
    Occupied(T),
    Waiting(oneshot::Sender<Result<T, SlotError>>),
    Closed(CloseReason),
}

/// A one-value hand-off point between exactly two parties.
///
/// `deposit` never blocks. `await_value` returns immediately when a value is
/// already present and otherwise suspends until the next deposit or until
/// the slot is closed.
pub struct RendezvousSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T> Default for RendezvousSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RendezvousSlot<T> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand `value` to the current waiter, or store it for the next one.
    ///
    /// Fails with [`SlotError::AlreadyPending`] if a previous value has not
    /// been picked up yet. The rejected value is dropped; the stored one is
    /// left untouched.
    pub fn deposit(&self, value: T) -> Result<(), SlotError> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, SlotState::Empty) {
            SlotState::Empty => {
                *state = SlotState::Occupied(value);
                Ok(())
            }
            SlotState::Waiting(tx) => {
                *state = hand_over(tx, value);
                Ok(())
            }
            SlotState::Occupied(existing) => {
                *state = SlotState::Occupied(existing);
                Err(SlotError::AlreadyPending)
            }
            SlotState::Closed(reason) => {
                *state = SlotState::Closed(reason);
                Err(SlotError::Closed(reason))
            }
        }
    }

    /// Take the stored value, or wait for the next deposit.
    pub async fn await_value(&self) -> Result<T, SlotError> {
        let rx = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, SlotState::Empty) {
                SlotState::Occupied(value) => return Ok(value),
                SlotState::Closed(reason) => {
                    *state = SlotState::Closed(reason);
                    return Err(SlotError::Closed(reason));
                }
                SlotState::Waiting(existing) if !existing.is_closed() => {
                    *state = SlotState::Waiting(existing);
                    return Err(SlotError::AlreadyPending);
                }
                // Empty, or a stale waiter that gave up.
                SlotState::Empty | SlotState::Waiting(_) => {
                    let (tx, rx) = oneshot::channel();
                    *state = SlotState::Waiting(tx);
                    rx
                }
            }
        };

        let mut wait = PendingWait {
            slot: self,
            rx,
            finished: false,
        };
        let received = (&mut wait.rx).await;
        wait.finished = true;

        match received {
            Ok(result) => result,
            // The sender is only dropped without sending if the slot itself
            // is dropped, which means the session is gone.
            Err(_) => Err(SlotError::Closed(CloseReason::Disconnected)),
        }
    }

    /// Put back a value that reached a waiter who was dropped before
    /// reading it.
    fn restore(&self, value: T) {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, SlotState::Empty) {
            SlotState::Empty => *state = SlotState::Occupied(value),
            SlotState::Waiting(tx) => *state = hand_over(tx, value),
            SlotState::Occupied(later) => {
                tracing::warn!("slot refilled before a cancelled hand-off was restored; keeping the newer value");
                *state = SlotState::Occupied(later);
            }
            SlotState::Closed(reason) => *state = SlotState::Closed(reason),
        }
    }

    /// Close the slot, releasing the current waiter with `reason`.
    ///
    /// Closing is idempotent; the first reason wins.
    pub fn close(&self, reason: CloseReason) {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, SlotState::Closed(reason)) {
            SlotState::Waiting(tx) => {
                let _ = tx.send(Err(SlotError::Closed(reason)));
            }
            SlotState::Closed(first) => *state = SlotState::Closed(first),
            SlotState::Empty | SlotState::Occupied(_) => {}
        }
    }

    /// `true` if a deposited value is waiting to be picked up.
    pub fn is_occupied(&self) -> bool {
        matches!(*self.lock(), SlotState::Occupied(_))
    }

    /// `true` if a live waiter is suspended in [`Self::await_value`].
    pub fn has_waiter(&self) -> bool {
        matches!(&*self.lock(), SlotState::Waiting(tx) if !tx.is_closed())
    }

    /// `true` once [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        matches!(*self.lock(), SlotState::Closed(_))
    }
}

/// Send `value` to a waiter. A waiter whose future was dropped cannot
/// receive, so the value stays in the slot for whoever waits next.
fn hand_over<T>(tx: oneshot::Sender<Result<T, SlotError>>, value: T) -> SlotState<T> {
    match tx.send(Ok(value)) {
        Ok(()) => SlotState::Empty,
        Err(Ok(value)) => SlotState::Occupied(value),
        Err(Err(_)) => SlotState::Empty,
    }
}

/// Receiving end of one `await_value` call.
///
/// Dropping it before the value was read hands the value back to the slot.
struct PendingWait<'a, T> {
    slot: &'a RendezvousSlot<T>,
    rx: oneshot::Receiver<Result<T, SlotError>>,
    finished: bool,
}

impl<T> Drop for PendingWait<'_, T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Closing first makes any later send fail, so after this the value
        // is either in our channel or still with the depositor.
        self.rx.close();
        if let Ok(Ok(value)) = self.rx.try_recv() {
            self.slot.restore(value);
        }
    }
}

impl<T> fmt::Debug for RendezvousSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock() {
            SlotState::Empty => "empty".to_string(),
            SlotState::Occupied(_) => "occupied".to_string(),
            SlotState::Waiting(_) => "waiting".to_string(),
            SlotState::Closed(reason) => format!("closed({reason})"),
        };
        f.debug_struct("RendezvousSlot").field("state", &state).finish()
    }
}
