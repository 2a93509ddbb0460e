//! Timed replay of recorded sequences
//!
//! The worker reconstructs real-time delays from capture timestamps,
//! dispatches each action in recorded order, and stops on policy exhaustion,
//! cancellation or injection failure.

mod cancel;
mod engine;
mod report;
mod timing;

pub use cancel::CancelToken;
pub use engine::{ReplayDispatch, ReplayEngine, ReplayError, ReplayHandle};
pub use report::{ReplayOutcome, ReplayPolicy, ReplayReport};
pub use timing::{wait_for, DriftPolicy, LagStats, TimingPolicy, DEFAULT_JITTER_TOLERANCE};
