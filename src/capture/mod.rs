//! Input capture
//!
//! `EventCapture` owns the Idle -> Recording -> Idle lifecycle and turns raw
//! callbacks into an [`ActionSequence`] frozen at stop.

mod recorder;
mod sequence;

pub use recorder::EventCapture;
pub use sequence::{ActionRecord, ActionSequence, SequenceError};
