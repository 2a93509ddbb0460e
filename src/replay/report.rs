//! Repetition policy and session outcome

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::FinishStatus;
use crate::platform::InjectionError;

use super::engine::ReplayError;

/// How many times a sequence is replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    Finite(u32),
    Infinite,
}

impl ReplayPolicy {
    /// `None` means infinite
    pub fn from_iterations(iterations: Option<u32>) -> Self {
        match iterations {
            Some(n) => ReplayPolicy::Finite(n),
            None => ReplayPolicy::Infinite,
        }
    }

    pub fn iterations(&self) -> Option<u32> {
        match self {
            ReplayPolicy::Finite(n) => Some(*n),
            ReplayPolicy::Infinite => None,
        }
    }

    pub fn is_exhausted(&self, completed: u32) -> bool {
        match self {
            ReplayPolicy::Finite(n) => completed >= *n,
            ReplayPolicy::Infinite => false,
        }
    }
}

/// Terminal state of a replay session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Every requested iteration finished
    Completed,
    /// Stop key or explicit cancel; already-issued input is not undone
    Canceled,
    /// The injector refused a command; the current iteration was abandoned
    Failed(InjectionError),
}

impl From<&ReplayOutcome> for FinishStatus {
    fn from(outcome: &ReplayOutcome) -> Self {
        match outcome {
            ReplayOutcome::Completed => FinishStatus::Completed,
            ReplayOutcome::Canceled => FinishStatus::Canceled,
            ReplayOutcome::Failed(e) => FinishStatus::Failed {
                message: e.to_string(),
            },
        }
    }
}

/// Final report of a replay session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub policy: ReplayPolicy,
    pub outcome: ReplayOutcome,
    /// Iterations that ran to the end without cancellation or failure
    pub completed_iterations: u32,
    /// Dispatches later than the jitter tolerance
    pub late_actions: u64,
    pub max_lag: Duration,
}

impl ReplayReport {
    /// Surface an injection failure as an error; completion and
    /// cancellation both pass through.
    pub fn into_result(self) -> Result<ReplayReport, ReplayError> {
        match self.outcome {
            ReplayOutcome::Failed(e) => Err(ReplayError::InjectionFailure(e)),
            _ => Ok(self),
        }
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.completed_iterations;
        match &self.outcome {
            ReplayOutcome::Completed => match self.policy {
                ReplayPolicy::Finite(total) => write!(f, "completed {n} of {total}"),
                ReplayPolicy::Infinite => write!(f, "completed {n}"),
            },
            ReplayOutcome::Canceled => write!(f, "canceled after {n} complete iterations"),
            ReplayOutcome::Failed(e) => write!(f, "failed after {n} complete iterations: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: ReplayOutcome, completed: u32) -> ReplayReport {
        ReplayReport {
            policy: ReplayPolicy::Finite(3),
            outcome,
            completed_iterations: completed,
            late_actions: 0,
            max_lag: Duration::ZERO,
        }
    }

    #[test]
    fn test_policy_exhaustion() {
        assert!(ReplayPolicy::Finite(0).is_exhausted(0));
        assert!(!ReplayPolicy::Finite(2).is_exhausted(1));
        assert!(ReplayPolicy::Finite(2).is_exhausted(2));
        assert!(!ReplayPolicy::Infinite.is_exhausted(u32::MAX));
    }

    #[test]
    fn test_policy_from_iterations() {
        assert_eq!(ReplayPolicy::from_iterations(Some(4)), ReplayPolicy::Finite(4));
        assert_eq!(ReplayPolicy::from_iterations(None), ReplayPolicy::Infinite);
        assert_eq!(ReplayPolicy::Infinite.iterations(), None);
    }

    #[test]
    fn test_report_display() {
        assert_eq!(report(ReplayOutcome::Completed, 3).to_string(), "completed 3 of 3");
        assert_eq!(
            report(ReplayOutcome::Canceled, 1).to_string(),
            "canceled after 1 complete iterations"
        );
        let failed = ReplayOutcome::Failed(InjectionError::new("key_down", "denied"));
        assert_eq!(
            report(failed, 0).to_string(),
            "failed after 0 complete iterations: key_down failed: denied"
        );
    }

    #[test]
    fn test_into_result() {
        assert!(report(ReplayOutcome::Canceled, 1).into_result().is_ok());
        let failed = report(
            ReplayOutcome::Failed(InjectionError::new("key_up", "denied")),
            2,
        );
        assert!(matches!(
            failed.into_result(),
            Err(ReplayError::InjectionFailure(e)) if e.command == "key_up"
        ));
    }

    #[test]
    fn test_finish_status_from_outcome() {
        assert_eq!(FinishStatus::from(&ReplayOutcome::Canceled), FinishStatus::Canceled);
        let status = FinishStatus::from(&ReplayOutcome::Failed(InjectionError::new(
            "move_to", "denied",
        )));
        assert_eq!(
            status,
            FinishStatus::Failed {
                message: "move_to failed: denied".to_string()
            }
        );
    }
}
