//! Replay timing reconstruction
//!
//! Scheduling is cooperative: the worker sleeps until each action's target
//! offset from its iteration anchor, and dispatches immediately when it is
//! already late. Time is never compressed to catch up, so lateness within an
//! iteration accumulates. Sleeps have millisecond resolution and no
//! real-time guarantee; lateness beyond `jitter_tolerance` is counted and
//! logged, never corrected.

use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default bound on tolerated scheduler jitter
pub const DEFAULT_JITTER_TOLERANCE: Duration = Duration::from_millis(15);

/// What happens to accumulated lateness at an iteration boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Each iteration is anchored at the moment it starts
    #[default]
    ResetEachIteration,
    /// Iteration `k` is anchored at `session_start + k * span`, so lateness
    /// carries into the next iteration
    CarryForward,
}

impl DriftPolicy {
    /// Anchor instant for iteration number `completed` (zero-based)
    pub fn anchor(&self, session_start: Instant, span: Duration, completed: u32) -> Instant {
        match self {
            DriftPolicy::ResetEachIteration => Instant::now(),
            DriftPolicy::CarryForward => session_start + span * completed,
        }
    }
}

impl FromStr for DriftPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" | "reset_each_iteration" => Ok(DriftPolicy::ResetEachIteration),
            "carry" | "carry_forward" => Ok(DriftPolicy::CarryForward),
            other => Err(format!("unknown drift policy '{other}' (expected reset or carry)")),
        }
    }
}

/// Timing parameters of a replay engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    pub jitter_tolerance: Duration,
    pub drift: DriftPolicy,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            jitter_tolerance: DEFAULT_JITTER_TOLERANCE,
            drift: DriftPolicy::default(),
        }
    }
}

/// How long to sleep before an action due at `target` when `actual` has
/// already elapsed. `None` means dispatch now.
pub fn wait_for(target: Duration, actual: Duration) -> Option<Duration> {
    target.checked_sub(actual).filter(|wait| !wait.is_zero())
}

/// Lateness observed across a replay session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LagStats {
    /// Dispatches later than the jitter tolerance
    pub late_actions: u64,
    /// Largest lateness seen at any dispatch
    pub max_lag: Duration,
}

impl LagStats {
    /// Record the lateness of one dispatch; returns whether it exceeded `tolerance`
    pub fn record(&mut self, lag: Duration, tolerance: Duration) -> bool {
        self.max_lag = self.max_lag.max(lag);
        if lag > tolerance {
            self.late_actions += 1;
            true
        } else {
            false
        }
    }
}
