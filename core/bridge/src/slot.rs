// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::engine::NativeEngine;
use crate::errors::BridgeError;
use crate::response::Value;

pub type CallResult = Result<Value, BridgeError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlotError {
    #[error("delivery slot already completed")]
    AlreadyCompleted,
}

/// Outcome of completing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The result was handed to the waiting caller.
    Delivered,
    /// Nobody is waiting anymore; the completer owns the unpin.
    Abandoned,
}

enum SlotState {
    Waiting(oneshot::Sender<CallResult>),
    Abandoned,
    Completed,
}

/// Single-use rendezvous between a caller and the native completion of its
/// command.
///
/// A slot is completed at most once. The state machine also records whether
/// the caller gave up, which decides who releases the pin.
pub struct DeliverySlot {
    state: Mutex<SlotState>,
    engine: Arc<dyn NativeEngine>,
}

impl DeliverySlot {
    pub fn new(engine: Arc<dyn NativeEngine>) -> (Self, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let slot = DeliverySlot {
            state: Mutex::new(SlotState::Waiting(tx)),
            engine,
        };
        (slot, rx)
    }

    /// Engine that allocated the responses for this slot.
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn complete(&self, result: CallResult) -> Result<Completion, SlotError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Completed) {
            SlotState::Waiting(tx) => match tx.send(result) {
                Ok(()) => Ok(Completion::Delivered),
                // receiver dropped without abandoning
                Err(_) => Ok(Completion::Abandoned),
            },
            SlotState::Abandoned => Ok(Completion::Abandoned),
            SlotState::Completed => Err(SlotError::AlreadyCompleted),
        }
    }

    /// Marks the slot as no longer awaited. Returns false if a result was
    /// already delivered, in which case the caller still owns the unpin.
    pub fn abandon(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            SlotState::Waiting(_) => {
                *state = SlotState::Abandoned;
                true
            }
            SlotState::Abandoned => true,
            SlotState::Completed => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Completed)
    }
}

impl std::fmt::Debug for DeliverySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.lock() {
            SlotState::Waiting(_) => "waiting",
            SlotState::Abandoned => "abandoned",
            SlotState::Completed => "completed",
        };
        f.debug_struct("DeliverySlot").field("state", &state).finish()
    }
}
