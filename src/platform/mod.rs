//! Platform boundary: raw input delivery and synthetic input injection
//!
//! The engine never talks to the operating system directly. Input arrives
//! through an [`EventSource`] subscription and leaves through an
//! [`Injector`]. A subscription is a scoped capability: dropping it (or
//! calling [`Subscription::release`]) is the only way to stop delivery, and
//! release returns only once no further callbacks can run.

pub mod loopback;
#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(not(target_os = "macos"))]
pub mod unsupported;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hotkey::Key;

/// Pointer button identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    Left,
    Right,
    Middle,
    /// Any additional button, by platform button number
    Other(u8),
}

/// Scroll axis for wheel events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelAxis {
    Vertical,
    Horizontal,
}

/// Unit a scroll delta is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelUnit {
    Line,
    Pixel,
}

/// The six kinds of input the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    PointerMove,
    ButtonDown,
    ButtonUp,
    WheelScroll,
    KeyDown,
    KeyUp,
}

impl InputKind {
    /// Every kind, in declaration order
    pub const ALL: [InputKind; 6] = [
        InputKind::PointerMove,
        InputKind::ButtonDown,
        InputKind::ButtonUp,
        InputKind::WheelScroll,
        InputKind::KeyDown,
        InputKind::KeyUp,
    ];
}

/// One raw input event as delivered by an [`EventSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    PointerMove { x: i32, y: i32 },
    ButtonDown { button: Button, x: i32, y: i32 },
    ButtonUp { button: Button, x: i32, y: i32 },
    WheelScroll { delta: i32, axis: WheelAxis, x: i32, y: i32 },
    KeyDown { key: Key },
    KeyUp { key: Key },
}

impl InputEvent {
    pub fn kind(&self) -> InputKind {
        match self {
            InputEvent::PointerMove { .. } => InputKind::PointerMove,
            InputEvent::ButtonDown { .. } => InputKind::ButtonDown,
            InputEvent::ButtonUp { .. } => InputKind::ButtonUp,
            InputEvent::WheelScroll { .. } => InputKind::WheelScroll,
            InputEvent::KeyDown { .. } => InputKind::KeyDown,
            InputEvent::KeyUp { .. } => InputKind::KeyUp,
        }
    }
}

/// Callback invoked on the source's delivery thread for every matching event
pub type EventHandler = Arc<dyn Fn(&InputEvent) + Send + Sync>;

/// A source of raw, system-wide input events
pub trait EventSource: Send + Sync {
    /// Start delivering events of the given kinds to `handler`.
    ///
    /// Delivery continues until the returned [`Subscription`] is released.
    fn subscribe(
        &self,
        kinds: &[InputKind],
        handler: EventHandler,
    ) -> Result<Subscription, PlatformError>;
}

/// Scoped registration with an [`EventSource`]
///
/// Releasing is idempotent and happens at the latest on drop, so every
/// exit path of the owner gives the registration back.
#[must_use = "dropping a subscription immediately stops delivery"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Stop delivery now
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// A single synthetic input command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    MoveTo { x: i32, y: i32 },
    ButtonDown(Button),
    ButtonUp(Button),
    WheelScroll { delta: i32, axis: WheelAxis, unit: WheelUnit },
    KeyDown(Key),
    KeyUp(Key),
}

impl Command {
    /// Short name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::MoveTo { .. } => "move_to",
            Command::ButtonDown(_) => "button_down",
            Command::ButtonUp(_) => "button_up",
            Command::WheelScroll { .. } => "wheel_scroll",
            Command::KeyDown(_) => "key_down",
            Command::KeyUp(_) => "key_up",
        }
    }
}

/// Replaying an event issues the command that reproduces it. Recorded
/// wheel deltas are line-based notches.
impl From<&InputEvent> for Command {
    fn from(event: &InputEvent) -> Self {
        match *event {
            InputEvent::PointerMove { x, y } => Command::MoveTo { x, y },
            InputEvent::ButtonDown { button, .. } => Command::ButtonDown(button),
            InputEvent::ButtonUp { button, .. } => Command::ButtonUp(button),
            InputEvent::WheelScroll { delta, axis, .. } => Command::WheelScroll {
                delta,
                axis,
                unit: WheelUnit::Line,
            },
            InputEvent::KeyDown { key } => Command::KeyDown(key),
            InputEvent::KeyUp { key } => Command::KeyUp(key),
        }
    }
}

/// Synchronous input synthesis
///
/// Each call returns once the command has been handed to the system.
pub trait Injector: Send + Sync {
    fn move_to(&self, x: i32, y: i32) -> Result<(), InjectionError>;
    fn button_down(&self, button: Button) -> Result<(), InjectionError>;
    fn button_up(&self, button: Button) -> Result<(), InjectionError>;
    fn wheel_scroll(&self, delta: i32, axis: WheelAxis, unit: WheelUnit)
        -> Result<(), InjectionError>;
    fn key_down(&self, key: Key) -> Result<(), InjectionError>;
    fn key_up(&self, key: Key) -> Result<(), InjectionError>;

    /// Issue one [`Command`]
    fn execute(&self, command: &Command) -> Result<(), InjectionError> {
        match *command {
            Command::MoveTo { x, y } => self.move_to(x, y),
            Command::ButtonDown(button) => self.button_down(button),
            Command::ButtonUp(button) => self.button_up(button),
            Command::WheelScroll { delta, axis, unit } => self.wheel_scroll(delta, axis, unit),
            Command::KeyDown(key) => self.key_down(key),
            Command::KeyUp(key) => self.key_up(key),
        }
    }
}

/// Errors raised while registering with the OS input hooks
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("input monitoring permission denied - check Accessibility permissions")]
    PermissionDenied,

    #[error("global input hooks are not supported on this platform")]
    Unsupported,

    #[error("failed to create event tap")]
    TapCreation,

    #[error("failed to spawn hook thread: {0}")]
    ThreadSpawn(String),
}

/// The injection primitive could not execute a command
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{command} failed: {message}")]
pub struct InjectionError {
    pub command: &'static str,
    pub message: String,
}

impl InjectionError {
    pub fn new(command: &'static str, message: impl Into<String>) -> Self {
        Self {
            command,
            message: message.into(),
        }
    }
}

/// The pair of OS collaborators an engine runs against
#[derive(Clone)]
pub struct Backend {
    pub source: Arc<dyn EventSource>,
    pub injector: Arc<dyn Injector>,
}

impl Backend {
    /// The real OS hooks for the current target
    #[cfg(target_os = "macos")]
    pub fn native() -> Self {
        Self {
            source: Arc::new(macos::QuartzEventSource::new()),
            injector: Arc::new(macos::QuartzInjector::new()),
        }
    }

    /// The real OS hooks for the current target
    #[cfg(not(target_os = "macos"))]
    pub fn native() -> Self {
        Self {
            source: Arc::new(unsupported::UnsupportedSource),
            injector: Arc::new(unsupported::UnsupportedInjector),
        }
    }

    /// In-process backend: nothing reaches the OS
    pub fn loopback() -> (Self, Arc<loopback::LoopbackSource>, Arc<loopback::LoopbackInjector>) {
        Self::loopback_with(loopback::LoopbackInjector::new())
    }

    /// Loopback backend for the daemon's dry runs. Commands are counted,
    /// never kept, so an infinite replay runs in constant memory.
    pub fn dry_run() -> Self {
        Self::loopback_with(loopback::LoopbackInjector::discarding()).0
    }

    /// Loopback source paired with a caller-built injector
    pub fn loopback_with(
        injector: loopback::LoopbackInjector,
    ) -> (Self, Arc<loopback::LoopbackSource>, Arc<loopback::LoopbackInjector>) {
        let source = Arc::new(loopback::LoopbackSource::new());
        let injector = Arc::new(injector);
        let backend = Self {
            source: source.clone(),
            injector: injector.clone(),
        };
        (backend, source, injector)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_command_from_event() {
        let event = InputEvent::WheelScroll {
            delta: -3,
            axis: WheelAxis::Vertical,
            x: 10,
            y: 20,
        };
        assert_eq!(
            Command::from(&event),
            Command::WheelScroll {
                delta: -3,
                axis: WheelAxis::Vertical,
                unit: WheelUnit::Line,
            }
        );

        let event = InputEvent::ButtonDown {
            button: Button::Right,
            x: 1,
            y: 2,
        };
        assert_eq!(Command::from(&event), Command::ButtonDown(Button::Right));
        assert_eq!(Command::from(&event).name(), "button_down");
    }

    #[test]
    fn test_subscription_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_releases_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        {
            let _subscription = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(
            InputEvent::KeyUp { key: Key::Escape }.kind(),
            InputKind::KeyUp
        );
        assert_eq!(InputKind::ALL.len(), 6);
    }
}
