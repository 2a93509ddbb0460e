//! Replay engine and worker
//!
//! Each replay runs on its own worker thread so timed waits never block the
//! caller or the stop-key listener. The engine holds at most one active
//! session; asking for another while one runs cancels the running one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::capture::ActionSequence;
use crate::events::{EngineEvent, FinishStatus};
use crate::hotkey::{Key, StopKeyListener};
use crate::platform::{Command, EventSource, InjectionError, Injector};
use crate::state::{State, StateCell};

use super::cancel::CancelToken;
use super::report::{ReplayOutcome, ReplayPolicy, ReplayReport};
use super::timing::{wait_for, LagStats, TimingPolicy};

/// Errors returned when a replay cannot run
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("no actions recorded to replay")]
    NoActionsRecorded,

    #[error("cannot replay while {from}")]
    InvalidTransition { from: State },

    #[error(transparent)]
    InjectionFailure(#[from] InjectionError),

    #[error("failed to spawn replay worker: {0}")]
    WorkerSpawn(String),

    #[error("replay worker panicked")]
    WorkerPanicked,
}

/// Result of a replay request
#[derive(Debug)]
#[must_use]
pub enum ReplayDispatch {
    /// A new session is running
    Started(ReplayHandle),
    /// A session was already running; it has been asked to stop instead
    CancelledActive,
}

/// Handle to a running replay session
///
/// Dropping the handle detaches the worker; the session still releases its
/// stop-key listener and returns the engine to `Idle` when it ends.
#[derive(Debug)]
pub struct ReplayHandle {
    id: u64,
    token: CancelToken,
    worker: JoinHandle<ReplayReport>,
}

impl ReplayHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cancellation. Returns `true` if this call cancelled the session.
    pub fn cancel(&self) -> bool {
        self.token.cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the session to reach a terminal state
    pub fn join(self) -> Result<ReplayReport, ReplayError> {
        self.worker.join().map_err(|_| ReplayError::WorkerPanicked)
    }
}

struct ActiveSession {
    id: u64,
    token: CancelToken,
}

type ActiveSlot = Arc<Mutex<Option<ActiveSession>>>;

fn lock(slot: &ActiveSlot) -> MutexGuard<'_, Option<ActiveSession>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the engine to `Idle` when the worker exits, however it exits
struct SessionGuard {
    id: u64,
    active: ActiveSlot,
    state: StateCell,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|s| s.id == self.id) {
            *active = None;
        }
        let _ = self.state.transition(State::Replaying, State::Idle);
    }
}

/// Drives replay sessions against an injector
pub struct ReplayEngine {
    source: Arc<dyn EventSource>,
    injector: Arc<dyn Injector>,
    timing: TimingPolicy,
    state: StateCell,
    event_tx: broadcast::Sender<EngineEvent>,
    active: ActiveSlot,
    next_id: AtomicU64,
}

impl ReplayEngine {
    pub fn new(
        source: Arc<dyn EventSource>,
        injector: Arc<dyn Injector>,
        timing: TimingPolicy,
        state: StateCell,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            source,
            injector,
            timing,
            state,
            event_tx,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn timing(&self) -> TimingPolicy {
        self.timing
    }

    /// Replay `sequence` under `policy`, cancellable with `stop_key`.
    ///
    /// Nothing is mutated and nothing is subscribed when the request is
    /// rejected.
    pub fn replay(
        &self,
        sequence: &ActionSequence,
        policy: ReplayPolicy,
        stop_key: Key,
    ) -> Result<ReplayDispatch, ReplayError> {
        let (session, guard, token) = {
            let mut active = lock(&self.active);
            if let Some(running) = active.as_ref() {
                info!(session = running.id, "replay requested while active, cancelling");
                running.token.cancel();
                return Ok(ReplayDispatch::CancelledActive);
            }

            if sequence.is_empty() {
                warn!("no actions recorded to replay");
                return Err(ReplayError::NoActionsRecorded);
            }

            self.state
                .transition(State::Idle, State::Replaying)
                .map_err(|from| ReplayError::InvalidTransition { from })?;

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let token = CancelToken::new();
            let listener = match StopKeyListener::arm(
                self.source.as_ref(),
                stop_key,
                token.clone(),
                self.event_tx.clone(),
            ) {
                Ok(listener) => Some(listener),
                Err(e) => {
                    warn!(?e, "stop key unavailable, replay can only be cancelled explicitly");
                    None
                }
            };

            *active = Some(ActiveSession {
                id,
                token: token.clone(),
            });

            let session = ReplaySession {
                id,
                sequence: sequence.clone(),
                policy,
                token: token.clone(),
                timing: self.timing,
                injector: Arc::clone(&self.injector),
                event_tx: self.event_tx.clone(),
                listener,
            };
            let guard = SessionGuard {
                id,
                active: Arc::clone(&self.active),
                state: self.state.clone(),
            };
            (session, guard, token)
        };

        let id = session.id;
        info!(
            session = id,
            actions = sequence.len(),
            iterations = ?policy.iterations(),
            %stop_key,
            "replay started"
        );
        let _ = self.event_tx.send(EngineEvent::ReplayStarted {
            iterations: policy.iterations(),
            stop_key: stop_key.to_string(),
        });

        let event_tx = self.event_tx.clone();
        let worker = thread::Builder::new()
            .name(format!("replay-{id}"))
            .spawn(move || {
                let report = session.run();
                // Back to Idle before anyone hears the session is over.
                drop(guard);
                info!(session = id, %report, "replay finished");
                let _ = event_tx.send(EngineEvent::ReplayFinished {
                    status: FinishStatus::from(&report.outcome),
                    completed_iterations: report.completed_iterations,
                });
                report
            })
            .map_err(|e| {
                error!(?e, "failed to spawn replay worker");
                ReplayError::WorkerSpawn(e.to_string())
            })?;

        Ok(ReplayDispatch::Started(ReplayHandle { id, token, worker }))
    }

    /// Cancel the active session, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(running) => {
                running.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_replaying(&self) -> bool {
        self.state.get() == State::Replaying
    }
}

enum Pass {
    Finished,
    Cancelled,
}

/// State owned by one replay worker for the lifetime of one session
struct ReplaySession {
    id: u64,
    sequence: ActionSequence,
    policy: ReplayPolicy,
    token: CancelToken,
    timing: TimingPolicy,
    injector: Arc<dyn Injector>,
    event_tx: broadcast::Sender<EngineEvent>,
    listener: Option<StopKeyListener>,
}

impl ReplaySession {
    fn run(mut self) -> ReplayReport {
        let span = self.sequence.span();
        let session_start = Instant::now();
        let mut stats = LagStats::default();
        let mut completed = 0u32;

        let outcome = loop {
            if self.policy.is_exhausted(completed) {
                break ReplayOutcome::Completed;
            }
            if self.token.is_cancelled() {
                break ReplayOutcome::Canceled;
            }

            let anchor = self.timing.drift.anchor(session_start, span, completed);
            match self.play_iteration(anchor, &mut stats) {
                Ok(Pass::Finished) => {
                    completed += 1;
                    info!(session = self.id, iteration = completed, "iteration completed");
                    let _ = self
                        .event_tx
                        .send(EngineEvent::IterationCompleted { iteration: completed });
                }
                Ok(Pass::Cancelled) => break ReplayOutcome::Canceled,
                Err(e) => {
                    error!(session = self.id, %e, "injection failed, aborting replay");
                    break ReplayOutcome::Failed(e);
                }
            }
        };

        if let Some(listener) = self.listener.take() {
            listener.disarm();
        }

        ReplayReport {
            policy: self.policy,
            outcome,
            completed_iterations: completed,
            late_actions: stats.late_actions,
            max_lag: stats.max_lag,
        }
    }

    /// One pass over the sequence, in recorded order
    fn play_iteration(&self, anchor: Instant, stats: &mut LagStats) -> Result<Pass, InjectionError> {
        let origin = self.sequence.first().map_or(0, |a| a.timestamp);
        let late_before = stats.late_actions;

        for action in &self.sequence {
            let target = Duration::from_millis(action.timestamp - origin);
            if let Some(wait) = wait_for(target, Instant::now().saturating_duration_since(anchor)) {
                if self.token.sleep(wait) {
                    return Ok(Pass::Cancelled);
                }
            }
            if self.token.is_cancelled() {
                return Ok(Pass::Cancelled);
            }

            let lag = Instant::now()
                .saturating_duration_since(anchor)
                .saturating_sub(target);
            if stats.record(lag, self.timing.jitter_tolerance) {
                debug!(lag_ms = lag.as_millis() as u64, "dispatch behind schedule");
            }

            let command = Command::from(&action.event);
            trace!(?command, target_ms = target.as_millis() as u64, "dispatch");
            self.injector.execute(&command)?;
        }

        let late = stats.late_actions - late_before;
        if late > 0 {
            warn!(
                session = self.id,
                late_actions = late,
                max_lag_ms = stats.max_lag.as_millis() as u64,
                "iteration fell behind schedule"
            );
        }
        Ok(Pass::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ActionRecord;
    use crate::platform::loopback::{LoopbackInjector, LoopbackSource};
    use crate::platform::InputEvent;

    struct Fixture {
        engine: ReplayEngine,
        source: Arc<LoopbackSource>,
        injector: Arc<LoopbackInjector>,
        state: StateCell,
        events: broadcast::Receiver<EngineEvent>,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(LoopbackSource::new());
        let injector = Arc::new(LoopbackInjector::new());
        let state = StateCell::new();
        let (tx, events) = broadcast::channel(64);
        let engine = ReplayEngine::new(
            source.clone(),
            injector.clone(),
            TimingPolicy::default(),
            state.clone(),
            tx,
        );
        Fixture {
            engine,
            source,
            injector,
            state,
            events,
        }
    }

    fn keys(timestamps: &[u64]) -> ActionSequence {
        let actions = timestamps
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                let key = Key::NAMED[i % 26];
                let event = if i % 2 == 0 {
                    InputEvent::KeyDown { key }
                } else {
                    InputEvent::KeyUp { key }
                };
                ActionRecord::new(t, event)
            })
            .collect();
        ActionSequence::new(actions).unwrap()
    }

    fn start(f: &Fixture, sequence: &ActionSequence, policy: ReplayPolicy) -> ReplayHandle {
        match f.engine.replay(sequence, policy, Key::Escape).unwrap() {
            ReplayDispatch::Started(handle) => handle,
            ReplayDispatch::CancelledActive => panic!("expected a new session"),
        }
    }

    #[test]
    fn test_empty_sequence_is_rejected() {
        let f = fixture();
        let result = f
            .engine
            .replay(&ActionSequence::default(), ReplayPolicy::Finite(1), Key::Escape);

        assert!(matches!(result, Err(ReplayError::NoActionsRecorded)));
        assert_eq!(f.injector.issued(), 0);
        assert_eq!(f.source.subscriber_count(), 0);
        assert_eq!(f.state.get(), State::Idle);
    }

    #[test]
    fn test_single_pass_preserves_order() {
        let f = fixture();
        let sequence = keys(&[0, 5, 10, 15]);
        let report = start(&f, &sequence, ReplayPolicy::Finite(1)).join().unwrap();

        assert_eq!(report.outcome, ReplayOutcome::Completed);
        assert_eq!(report.completed_iterations, 1);
        let issued: Vec<Command> = f.injector.commands().iter().map(|c| c.command).collect();
        let expected: Vec<Command> = sequence.iter().map(|a| Command::from(&a.event)).collect();
        assert_eq!(issued, expected);
    }

    #[test]
    fn test_finite_policy_runs_k_times() {
        let f = fixture();
        let sequence = keys(&[0, 2, 4]);
        let report = start(&f, &sequence, ReplayPolicy::Finite(4)).join().unwrap();

        assert_eq!(report.completed_iterations, 4);
        assert_eq!(report.to_string(), "completed 4 of 4");
        assert_eq!(f.injector.commands().len(), 12);
        assert_eq!(f.state.get(), State::Idle);
        assert_eq!(f.source.subscriber_count(), 0);
    }

    #[test]
    fn test_zero_iterations_issue_nothing() {
        let f = fixture();
        let report = start(&f, &keys(&[0, 1]), ReplayPolicy::Finite(0))
            .join()
            .unwrap();

        assert_eq!(report.outcome, ReplayOutcome::Completed);
        assert_eq!(report.completed_iterations, 0);
        assert_eq!(f.injector.issued(), 0);
    }

    #[test]
    fn test_stop_key_cancels_mid_iteration() {
        let f = fixture();
        let sequence = keys(&[0, 10, 2_000, 2_010]);
        let handle = start(&f, &sequence, ReplayPolicy::Finite(3));

        thread::sleep(Duration::from_millis(150));
        f.source.emit(InputEvent::KeyDown { key: Key::Escape });
        let cancelled_at = Instant::now();
        let report = handle.join().unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_millis(500));
        assert_eq!(report.outcome, ReplayOutcome::Canceled);
        assert_eq!(report.completed_iterations, 0);
        assert_eq!(f.injector.commands().len(), 2);
        assert_eq!(f.state.get(), State::Idle);
        assert_eq!(f.source.subscriber_count(), 0);
    }

    #[test]
    fn test_cancel_counts_only_full_iterations() {
        let f = fixture();
        let sequence = keys(&[0, 40]);
        let handle = start(&f, &sequence, ReplayPolicy::Infinite);

        // Two full passes take ~80ms; cancel partway through the third.
        thread::sleep(Duration::from_millis(100));
        assert!(handle.cancel());
        let report = handle.join().unwrap();

        assert_eq!(report.outcome, ReplayOutcome::Canceled);
        assert!(report.completed_iterations >= 1);
        let issued = f.injector.commands().len() as u32;
        assert!(issued >= report.completed_iterations * 2);
        assert!(issued <= report.completed_iterations * 2 + 2);
    }

    #[test]
    fn test_second_request_cancels_active() {
        let f = fixture();
        let sequence = keys(&[0, 5_000]);
        let handle = start(&f, &sequence, ReplayPolicy::Finite(1));
        thread::sleep(Duration::from_millis(50));

        let second = f
            .engine
            .replay(&sequence, ReplayPolicy::Finite(1), Key::Escape)
            .unwrap();
        assert!(matches!(second, ReplayDispatch::CancelledActive));

        let report = handle.join().unwrap();
        assert_eq!(report.outcome, ReplayOutcome::Canceled);
        assert_eq!(f.injector.commands().len(), 1);
        assert!(!f.engine.is_replaying());
    }

    #[test]
    fn test_injection_failure_aborts_and_returns_to_idle() {
        let f = fixture();
        f.injector.fail_at(4);
        let sequence = keys(&[0, 1, 2]);
        let report = start(&f, &sequence, ReplayPolicy::Finite(3)).join().unwrap();

        match &report.outcome {
            ReplayOutcome::Failed(e) => assert_eq!(e.command, "key_up"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(report.completed_iterations, 1);
        assert_eq!(f.injector.commands().len(), 4);
        assert_eq!(f.state.get(), State::Idle);
        assert_eq!(f.source.subscriber_count(), 0);
        // The sequence itself is untouched.
        assert_eq!(sequence.len(), 3);
    }

    #[test]
    fn test_replay_rejected_while_recording() {
        let f = fixture();
        f.state.transition(State::Idle, State::Recording).unwrap();

        let result = f
            .engine
            .replay(&keys(&[0]), ReplayPolicy::Finite(1), Key::Escape);
        assert!(matches!(
            result,
            Err(ReplayError::InvalidTransition {
                from: State::Recording
            })
        ));
        assert_eq!(f.source.subscriber_count(), 0);
    }

    #[test]
    fn test_events_report_iterations_and_outcome() {
        let mut f = fixture();
        start(&f, &keys(&[0, 1]), ReplayPolicy::Finite(2))
            .join()
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = f.events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                EngineEvent::ReplayStarted {
                    iterations: Some(2),
                    stop_key: "Escape".to_string(),
                },
                EngineEvent::IterationCompleted { iteration: 1 },
                EngineEvent::IterationCompleted { iteration: 2 },
                EngineEvent::ReplayFinished {
                    status: FinishStatus::Completed,
                    completed_iterations: 2,
                },
            ]
        );
    }

    #[test]
    fn test_cancel_without_session() {
        let f = fixture();
        assert!(!f.engine.cancel());
    }
}
