//! Stop hotkey handling
//!
//! Resolves user hotkey tokens to canonical keys and listens for the stop
//! key while a replay is running.

mod keys;
mod listener;

pub use keys::{parse_stop_key, Key, DEFAULT_STOP_KEY};
pub use listener::StopKeyListener;
