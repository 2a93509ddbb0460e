//! In-process backend
//!
//! `LoopbackSource` delivers whatever is passed to [`LoopbackSource::emit`]
//! and `LoopbackInjector` logs commands instead of posting them. The daemon
//! uses this pair for dry runs; tests use it to drive and observe the engine.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use tracing::debug;

use super::{
    Button, Command, EventHandler, EventSource, InjectionError, Injector, InputEvent, InputKind,
    PlatformError, Subscription, WheelAxis, WheelUnit,
};
use crate::hotkey::Key;

struct Subscriber {
    id: u64,
    kinds: Vec<InputKind>,
    handler: EventHandler,
}

/// Event source fed by the caller
///
/// Handlers must not release a subscription of the source that is calling
/// them: release waits for in-flight deliveries to finish.
#[derive(Default)]
pub struct LoopbackSource {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    /// Held shared for the whole of each `emit`, exclusively by release
    delivery: Arc<RwLock<()>>,
    next_id: AtomicU64,
}

impl LoopbackSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` synchronously to every subscriber interested in its kind
    pub fn emit(&self, event: InputEvent) {
        let kind = event.kind();
        let _delivering = self.delivery.read().unwrap_or_else(PoisonError::into_inner);
        // Handlers run outside the list lock so subscribing stays possible.
        let handlers: Vec<EventHandler> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.kinds.contains(&kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            handler(&event);
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl EventSource for LoopbackSource {
    fn subscribe(
        &self,
        kinds: &[InputKind],
        handler: EventHandler,
    ) -> Result<Subscription, PlatformError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                kinds: kinds.to_vec(),
                handler,
            });
        debug!(id, ?kinds, "loopback subscription added");

        let subscribers = Arc::clone(&self.subscribers);
        let delivery = Arc::clone(&self.delivery);
        Ok(Subscription::new(move || {
            subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|s| s.id != id);
            // Wait out emits that picked the handler up before removal
            drop(delivery.write().unwrap_or_else(PoisonError::into_inner));
            debug!(id, "loopback subscription released");
        }))
    }
}

/// A command as observed by [`LoopbackInjector`]
#[derive(Debug, Clone, Copy)]
pub struct InjectedCommand {
    pub at: Instant,
    pub command: Command,
}

/// Injector that records commands instead of synthesizing input
pub struct LoopbackInjector {
    log: Option<Mutex<Vec<InjectedCommand>>>,
    issued: AtomicUsize,
    /// Zero-based index of the command that should fail, or `usize::MAX`
    fail_at: AtomicUsize,
}

impl Default for LoopbackInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackInjector {
    pub fn new() -> Self {
        Self {
            log: Some(Mutex::new(Vec::new())),
            issued: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(usize::MAX),
        }
    }

    /// Count commands without keeping them (long-running dry runs)
    pub fn discarding() -> Self {
        Self {
            log: None,
            ..Self::new()
        }
    }

    /// Make the command with zero-based index `index` fail
    pub fn fail_at(&self, index: usize) {
        self.fail_at.store(index, Ordering::SeqCst);
    }

    /// Total commands accepted or rejected so far
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Snapshot of successfully executed commands
    pub fn commands(&self) -> Vec<InjectedCommand> {
        match &self.log {
            Some(log) => log.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            None => Vec::new(),
        }
    }

    fn record(&self, command: Command) -> Result<(), InjectionError> {
        let index = self.issued.fetch_add(1, Ordering::SeqCst);
        if index == self.fail_at.load(Ordering::SeqCst) {
            return Err(InjectionError::new(command.name(), "injection refused"));
        }

        debug!(?command, "loopback injection");
        if let Some(log) = &self.log {
            log.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(InjectedCommand {
                    at: Instant::now(),
                    command,
                });
        }
        Ok(())
    }
}

impl Injector for LoopbackInjector {
    fn move_to(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        self.record(Command::MoveTo { x, y })
    }

    fn button_down(&self, button: Button) -> Result<(), InjectionError> {
        self.record(Command::ButtonDown(button))
    }

    fn button_up(&self, button: Button) -> Result<(), InjectionError> {
        self.record(Command::ButtonUp(button))
    }

    fn wheel_scroll(
        &self,
        delta: i32,
        axis: WheelAxis,
        unit: WheelUnit,
    ) -> Result<(), InjectionError> {
        self.record(Command::WheelScroll { delta, axis, unit })
    }

    fn key_down(&self, key: Key) -> Result<(), InjectionError> {
        self.record(Command::KeyDown(key))
    }

    fn key_up(&self, key: Key) -> Result<(), InjectionError> {
        self.record(Command::KeyUp(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_respects_kind_filter() {
        let source = LoopbackSource::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = source
            .subscribe(
                &[InputKind::KeyDown],
                Arc::new(move |event: &InputEvent| sink.lock().unwrap().push(*event)),
            )
            .unwrap();

        source.emit(InputEvent::PointerMove { x: 1, y: 1 });
        source.emit(InputEvent::KeyDown { key: Key::KeyA });
        source.emit(InputEvent::KeyUp { key: Key::KeyA });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![InputEvent::KeyDown { key: Key::KeyA }]
        );
    }

    #[test]
    fn test_release_stops_delivery() {
        let source = LoopbackSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let subscription = source
            .subscribe(
                &InputKind::ALL,
                Arc::new(move |_: &InputEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(source.subscriber_count(), 1);

        source.emit(InputEvent::PointerMove { x: 0, y: 0 });
        subscription.release();
        source.emit(InputEvent::PointerMove { x: 0, y: 0 });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn test_release_waits_for_inflight_delivery() {
        use std::sync::atomic::AtomicBool;
        use std::thread;
        use std::time::Duration;

        let source = Arc::new(LoopbackSource::new());
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        let subscription = source
            .subscribe(
                &[InputKind::KeyDown],
                Arc::new(move |_: &InputEvent| {
                    s.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    f.store(true, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let emitter = Arc::clone(&source);
        let delivering = thread::spawn(move || emitter.emit(InputEvent::KeyDown { key: Key::KeyA }));
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }

        subscription.release();
        assert!(finished.load(Ordering::SeqCst));
        delivering.join().unwrap();
    }

    #[test]
    fn test_injector_records_in_order() {
        let injector = LoopbackInjector::new();
        injector.key_down(Key::KeyA).unwrap();
        injector.move_to(5, 6).unwrap();

        let commands: Vec<Command> = injector.commands().iter().map(|c| c.command).collect();
        assert_eq!(
            commands,
            vec![Command::KeyDown(Key::KeyA), Command::MoveTo { x: 5, y: 6 }]
        );
    }

    #[test]
    fn test_injector_fail_at() {
        let injector = LoopbackInjector::new();
        injector.fail_at(1);

        assert!(injector.key_down(Key::KeyA).is_ok());
        let err = injector.key_up(Key::KeyA).unwrap_err();
        assert_eq!(err.command, "key_up");
        assert!(injector.key_down(Key::KeyB).is_ok());
        assert_eq!(injector.commands().len(), 2);
        assert_eq!(injector.issued(), 3);
    }

    #[test]
    fn test_discarding_injector_only_counts() {
        let injector = LoopbackInjector::discarding();
        injector.move_to(1, 1).unwrap();
        assert!(injector.commands().is_empty());
        assert_eq!(injector.issued(), 1);
    }
}
