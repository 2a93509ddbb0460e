//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::EngineEvent;
use crate::state::State;

/// Largest frame accepted from a client
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from a client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Begin recording input
    StartCapture,

    /// Finish recording and keep the result as the last recording
    StopCapture,

    /// Replay the last recording, or cancel the running replay
    Replay {
        /// `None` repeats until cancelled
        #[serde(default)]
        iterations: Option<u32>,
        /// Hotkey token; daemon default when absent
        #[serde(default)]
        stop_key: Option<String>,
    },

    /// Cancel the running replay
    Cancel,

    /// Switch this connection to a stream of engine events
    Subscribe,
}

/// Responses from the daemon to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    CaptureStarted,

    CaptureStopped { actions: usize, duration_ms: u64 },

    ReplayStarted,

    /// A replay request arrived while one was running and cancelled it
    ReplayCancelled,

    /// Result of an explicit cancel; `active` is false when nothing ran
    Cancelled { active: bool },

    /// Subscription confirmed; event frames follow
    Subscribed,

    /// Pushed to subscribed clients
    Event { event: EngineEvent },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current engine state
    pub state: State,

    /// Actions in the last recording
    pub recorded_actions: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: State::default(),
            recorded_actions: 0,
            uptime_secs: 0,
        }
    }
}
