//! Engine notifications
//!
//! Broadcast to every subscriber (the IPC server, tests) as capture and
//! replay sessions move through their lifecycle.

use serde::{Deserialize, Serialize};

/// How a replay session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinishStatus {
    Completed,
    Canceled,
    Failed { message: String },
}

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Input hooks registered, recording started
    CaptureStarted,

    /// Recording finished
    CaptureStopped {
        /// Number of recorded actions
        actions: usize,
        /// Time between the first and last recorded action
        span_ms: u64,
    },

    /// Replay session started
    ReplayStarted {
        /// `None` for infinite replay
        iterations: Option<u32>,
        stop_key: String,
    },

    /// One full pass over the sequence finished
    IterationCompleted { iteration: u32 },

    /// The stop hotkey was pressed during replay
    StopKeyPressed,

    /// Replay session reached a terminal state
    ReplayFinished {
        #[serde(flatten)]
        status: FinishStatus,
        completed_iterations: u32,
    },
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::CaptureStarted => write!(f, "CAPTURE_STARTED"),
            EngineEvent::CaptureStopped { actions, span_ms } => {
                write!(f, "CAPTURE_STOPPED ({} actions, {}ms)", actions, span_ms)
            }
            EngineEvent::ReplayStarted { iterations, stop_key } => match iterations {
                Some(n) => write!(f, "REPLAY_STARTED (x{}, stop={})", n, stop_key),
                None => write!(f, "REPLAY_STARTED (infinite, stop={})", stop_key),
            },
            EngineEvent::IterationCompleted { iteration } => {
                write!(f, "ITERATION_COMPLETED ({})", iteration)
            }
            EngineEvent::StopKeyPressed => write!(f, "STOP_KEY_PRESSED"),
            EngineEvent::ReplayFinished {
                status,
                completed_iterations,
            } => match status {
                FinishStatus::Completed => {
                    write!(f, "REPLAY_COMPLETED ({} iterations)", completed_iterations)
                }
                FinishStatus::Canceled => {
                    write!(f, "REPLAY_CANCELED ({} iterations)", completed_iterations)
                }
                FinishStatus::Failed { message } => write!(
                    f,
                    "REPLAY_FAILED ({} iterations): {}",
                    completed_iterations, message
                ),
            },
        }
    }
}
