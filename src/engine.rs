//! Capture/replay engine facade
//!
//! Ties capture and replay to one shared [`StateCell`] so the two never
//! overlap, and fans engine events out to subscribers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::capture::{ActionSequence, EventCapture};
use crate::events::EngineEvent;
use crate::hotkey::{parse_stop_key, Key, DEFAULT_STOP_KEY};
use crate::platform::{Backend, PlatformError};
use crate::replay::{ReplayDispatch, ReplayEngine, ReplayError, ReplayPolicy, TimingPolicy};
use crate::state::{State, StateCell};

/// Capacity of the engine event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors returned when a capture cannot start
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot start capture while {from}")]
    InvalidTransition { from: State },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Tunables for an [`Engine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub timing: TimingPolicy,
    /// Stop key used when a replay request names none
    pub default_stop_key: Key,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timing: TimingPolicy::default(),
            default_stop_key: DEFAULT_STOP_KEY,
        }
    }
}

/// Records input and replays it with its original timing
pub struct Engine {
    state: StateCell,
    capture: EventCapture,
    replay: ReplayEngine,
    default_stop_key: Key,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(backend: Backend, options: EngineOptions) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = StateCell::new();
        let replay = ReplayEngine::new(
            Arc::clone(&backend.source),
            backend.injector,
            options.timing,
            state.clone(),
            event_tx.clone(),
        );

        Self {
            state,
            capture: EventCapture::new(backend.source),
            replay,
            default_stop_key: options.default_stop_key,
            event_tx,
        }
    }

    /// Receive engine events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn timing(&self) -> TimingPolicy {
        self.replay.timing()
    }

    /// Start recording. No-op while already recording.
    pub fn start_capture(&self) -> Result<(), CaptureError> {
        match self.state.transition(State::Idle, State::Recording) {
            Ok(()) => {}
            Err(State::Recording) => return Ok(()),
            Err(from) => return Err(CaptureError::InvalidTransition { from }),
        }

        if let Err(e) = self.capture.start() {
            warn!(?e, "failed to register input hooks");
            let _ = self.state.transition(State::Recording, State::Idle);
            return Err(e.into());
        }

        let _ = self.event_tx.send(EngineEvent::CaptureStarted);
        Ok(())
    }

    /// Stop recording and return the frozen sequence.
    ///
    /// Outside a capture session this returns the last recording unchanged.
    pub fn stop_capture(&self) -> ActionSequence {
        if self.state.get() != State::Recording {
            return self.capture.last();
        }

        let sequence = self.capture.stop();
        if self.state.transition(State::Recording, State::Idle).is_ok() {
            let _ = self.event_tx.send(EngineEvent::CaptureStopped {
                actions: sequence.len(),
                span_ms: sequence.span().as_millis() as u64,
            });
        }
        sequence
    }

    /// The most recent finalized recording
    pub fn last_recording(&self) -> ActionSequence {
        self.capture.last()
    }

    /// Replay `sequence`; `stop_key` is a user hotkey token, `None` for the
    /// configured default.
    pub fn replay(
        &self,
        sequence: &ActionSequence,
        policy: ReplayPolicy,
        stop_key: Option<&str>,
    ) -> Result<ReplayDispatch, ReplayError> {
        let key = stop_key.map_or(self.default_stop_key, parse_stop_key);
        self.replay.replay(sequence, policy, key)
    }

    /// Cancel the active replay. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        self.replay.cancel()
    }

    pub fn is_replaying(&self) -> bool {
        self.replay.is_replaying()
    }

    /// Stop whatever is running
    pub fn shutdown(&self) {
        if self.cancel() {
            info!("cancelled active replay for shutdown");
        }
        if self.state.get() == State::Recording {
            let sequence = self.stop_capture();
            info!(actions = sequence.len(), "stopped capture for shutdown");
        }
    }
}
