//! replayd: record low-level input and replay it with its original timing
//!
//! - [`capture`] records pointer, button, wheel and key events into an
//!   immutable [`ActionSequence`]
//! - [`replay`] reconstructs real-time delays and injects the sequence a
//!   finite or infinite number of times
//! - [`hotkey`] parses stop-key names and cancels replay on key press
//! - [`platform`] abstracts OS hooks and injection behind
//!   [`EventSource`](platform::EventSource) and [`Injector`](platform::Injector)
//! - [`ipc`] exposes the [`Engine`] over a Unix socket

pub mod capture;
pub mod config;
pub mod engine;
pub mod events;
pub mod hotkey;
pub mod ipc;
pub mod lifecycle;
pub mod platform;
pub mod replay;
pub mod state;

pub use capture::{ActionRecord, ActionSequence};
pub use engine::{CaptureError, Engine, EngineOptions};
pub use events::EngineEvent;
pub use replay::{ReplayDispatch, ReplayError, ReplayOutcome, ReplayPolicy, ReplayReport};
pub use state::State;
