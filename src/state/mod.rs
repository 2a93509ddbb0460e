//! Engine state management
//!
//! Provides an explicit state enumeration with three states:
//! - Idle: no session, ready for capture or replay
//! - Recording: a capture session owns the input hooks
//! - Replaying: a replay worker is injecting input

mod machine;

pub use machine::{State, StateCell};
