//! Engine state with atomic transitions
//!
//! Capture and replay are mutually exclusive. Every change goes through a
//! compare-and-swap from an expected state, so two callers racing to start
//! different sessions cannot both succeed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

/// The three possible states of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum State {
    /// Ready for a capture or replay request
    Idle = 0,
    /// Input hooks registered, actions being appended
    Recording = 1,
    /// A replay worker is dispatching actions
    Replaying = 2,
}

impl Default for State {
    fn default() -> Self {
        Self::Idle
    }
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => State::Recording,
            2 => State::Replaying,
            _ => State::Idle,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Recording => write!(f, "Recording"),
            State::Replaying => write!(f, "Replaying"),
        }
    }
}

/// Shared, atomically updated [`State`]
#[derive(Debug, Clone, Default)]
pub struct StateCell {
    state: Arc<AtomicU8>,
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state
    pub fn get(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to`.
    ///
    /// Fails with the actual current state if it is not `from`.
    pub fn transition(&self, from: State, to: State) -> Result<(), State> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| {
                info!(from = %from, to = %to, "state transition");
            })
            .map_err(State::from_u8)
    }
}
