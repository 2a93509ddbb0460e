//! Quartz backend: CGEventTap for capture, posted CGEvents for replay
//!
//! Every subscription runs its own listen-only event tap on a dedicated
//! thread with its own CFRunLoop. The loop wakes every 100ms to check its
//! running flag, so releasing a subscription joins the thread within one
//! poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, CGKeyCode, CGMouseButton, EventField,
    ScrollEventUnit,
};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use core_graphics::geometry::CGPoint;
use tracing::{debug, error, info, warn};

use super::{
    Button, EventHandler, EventSource, InjectionError, Injector, InputEvent, InputKind,
    PlatformError, Subscription, WheelAxis, WheelUnit,
};
use crate::hotkey::Key;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// macOS virtual key codes (Carbon `kVK_*`)
const KEYCODES: &[(u16, Key)] = &[
    (0x00, Key::KeyA),
    (0x01, Key::KeyS),
    (0x02, Key::KeyD),
    (0x03, Key::KeyF),
    (0x04, Key::KeyH),
    (0x05, Key::KeyG),
    (0x06, Key::KeyZ),
    (0x07, Key::KeyX),
    (0x08, Key::KeyC),
    (0x09, Key::KeyV),
    (0x0B, Key::KeyB),
    (0x0C, Key::KeyQ),
    (0x0D, Key::KeyW),
    (0x0E, Key::KeyE),
    (0x0F, Key::KeyR),
    (0x10, Key::KeyY),
    (0x11, Key::KeyT),
    (0x12, Key::Digit1),
    (0x13, Key::Digit2),
    (0x14, Key::Digit3),
    (0x15, Key::Digit4),
    (0x16, Key::Digit6),
    (0x17, Key::Digit5),
    (0x18, Key::Equal),
    (0x19, Key::Digit9),
    (0x1A, Key::Digit7),
    (0x1B, Key::Minus),
    (0x1C, Key::Digit8),
    (0x1D, Key::Digit0),
    (0x1E, Key::BracketRight),
    (0x1F, Key::KeyO),
    (0x20, Key::KeyU),
    (0x21, Key::BracketLeft),
    (0x22, Key::KeyI),
    (0x23, Key::KeyP),
    (0x24, Key::Enter),
    (0x25, Key::KeyL),
    (0x26, Key::KeyJ),
    (0x27, Key::Quote),
    (0x28, Key::KeyK),
    (0x29, Key::Semicolon),
    (0x2A, Key::Backslash),
    (0x2B, Key::Comma),
    (0x2C, Key::Slash),
    (0x2D, Key::KeyN),
    (0x2E, Key::KeyM),
    (0x2F, Key::Period),
    (0x30, Key::Tab),
    (0x31, Key::Space),
    (0x32, Key::Backquote),
    (0x33, Key::Backspace),
    (0x35, Key::Escape),
    (0x36, Key::MetaRight),
    (0x37, Key::MetaLeft),
    (0x38, Key::ShiftLeft),
    (0x39, Key::CapsLock),
    (0x3A, Key::AltLeft),
    (0x3B, Key::ControlLeft),
    (0x3C, Key::ShiftRight),
    (0x3D, Key::AltRight),
    (0x3E, Key::ControlRight),
    (0x60, Key::F5),
    (0x61, Key::F6),
    (0x62, Key::F7),
    (0x63, Key::F3),
    (0x64, Key::F8),
    (0x65, Key::F9),
    (0x67, Key::F11),
    (0x6D, Key::F10),
    (0x6F, Key::F12),
    (0x73, Key::Home),
    (0x74, Key::PageUp),
    (0x75, Key::Delete),
    (0x76, Key::F4),
    (0x77, Key::End),
    (0x78, Key::F2),
    (0x79, Key::PageDown),
    (0x7A, Key::F1),
    (0x7B, Key::ArrowLeft),
    (0x7C, Key::ArrowRight),
    (0x7D, Key::ArrowDown),
    (0x7E, Key::ArrowUp),
];

fn key_from_code(code: u16) -> Key {
    KEYCODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, key)| *key)
        .unwrap_or(Key::Unknown(u32::from(code)))
}

fn code_from_key(key: Key) -> Option<CGKeyCode> {
    match key {
        Key::Unknown(code) => CGKeyCode::try_from(code).ok(),
        key => KEYCODES.iter().find(|(_, k)| *k == key).map(|(c, _)| *c),
    }
}

/// Modifier flag that reports whether a modifier key is down
fn modifier_flag(key: Key) -> Option<CGEventFlags> {
    match key {
        Key::ShiftLeft | Key::ShiftRight => Some(CGEventFlags::CGEventFlagShift),
        Key::ControlLeft | Key::ControlRight => Some(CGEventFlags::CGEventFlagControl),
        Key::AltLeft | Key::AltRight => Some(CGEventFlags::CGEventFlagAlternate),
        Key::MetaLeft | Key::MetaRight => Some(CGEventFlags::CGEventFlagCommand),
        Key::CapsLock => Some(CGEventFlags::CGEventFlagAlphaShift),
        _ => None,
    }
}

fn tap_event_types(kinds: &[InputKind]) -> Vec<CGEventType> {
    let mut types = Vec::new();
    for kind in kinds {
        match kind {
            InputKind::PointerMove => types.extend([
                CGEventType::MouseMoved,
                CGEventType::LeftMouseDragged,
                CGEventType::RightMouseDragged,
                CGEventType::OtherMouseDragged,
            ]),
            InputKind::ButtonDown => types.extend([
                CGEventType::LeftMouseDown,
                CGEventType::RightMouseDown,
                CGEventType::OtherMouseDown,
            ]),
            InputKind::ButtonUp => types.extend([
                CGEventType::LeftMouseUp,
                CGEventType::RightMouseUp,
                CGEventType::OtherMouseUp,
            ]),
            InputKind::WheelScroll => types.push(CGEventType::ScrollWheel),
            // Modifier keys only ever arrive as FlagsChanged.
            InputKind::KeyDown => types.extend([CGEventType::KeyDown, CGEventType::FlagsChanged]),
            InputKind::KeyUp => types.extend([CGEventType::KeyUp, CGEventType::FlagsChanged]),
        }
    }
    types
}

fn other_button(event: &CGEvent) -> Button {
    match event.get_integer_value_field(EventField::MOUSE_EVENT_BUTTON_NUMBER) {
        2 => Button::Middle,
        n => Button::Other(u8::try_from(n).unwrap_or(u8::MAX)),
    }
}

fn event_key(event: &CGEvent) -> Key {
    let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
    key_from_code(u16::try_from(code).unwrap_or(u16::MAX))
}

/// Translate a tapped CGEvent into an [`InputEvent`]
fn decode(event_type: CGEventType, event: &CGEvent) -> Option<InputEvent> {
    let location = event.location();
    let (x, y) = (location.x.round() as i32, location.y.round() as i32);

    match event_type {
        CGEventType::MouseMoved
        | CGEventType::LeftMouseDragged
        | CGEventType::RightMouseDragged
        | CGEventType::OtherMouseDragged => Some(InputEvent::PointerMove { x, y }),
        CGEventType::LeftMouseDown => Some(InputEvent::ButtonDown {
            button: Button::Left,
            x,
            y,
        }),
        CGEventType::RightMouseDown => Some(InputEvent::ButtonDown {
            button: Button::Right,
            x,
            y,
        }),
        CGEventType::OtherMouseDown => Some(InputEvent::ButtonDown {
            button: other_button(event),
            x,
            y,
        }),
        CGEventType::LeftMouseUp => Some(InputEvent::ButtonUp {
            button: Button::Left,
            x,
            y,
        }),
        CGEventType::RightMouseUp => Some(InputEvent::ButtonUp {
            button: Button::Right,
            x,
            y,
        }),
        CGEventType::OtherMouseUp => Some(InputEvent::ButtonUp {
            button: other_button(event),
            x,
            y,
        }),
        CGEventType::ScrollWheel => {
            let vertical =
                event.get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS_1);
            let horizontal =
                event.get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS_2);
            let (delta, axis) = if vertical != 0 || horizontal == 0 {
                (vertical, WheelAxis::Vertical)
            } else {
                (horizontal, WheelAxis::Horizontal)
            };
            Some(InputEvent::WheelScroll {
                delta: delta as i32,
                axis,
                x,
                y,
            })
        }
        CGEventType::KeyDown => Some(InputEvent::KeyDown {
            key: event_key(event),
        }),
        CGEventType::KeyUp => Some(InputEvent::KeyUp {
            key: event_key(event),
        }),
        CGEventType::FlagsChanged => {
            let key = event_key(event);
            let flag = modifier_flag(key)?;
            if event.get_flags().contains(flag) {
                Some(InputEvent::KeyDown { key })
            } else {
                Some(InputEvent::KeyUp { key })
            }
        }
        CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
            warn!("event tap disabled by the system, events may be missed");
            None
        }
        _ => None,
    }
}

/// System-wide input delivered through CGEventTap
#[derive(Debug, Default)]
pub struct QuartzEventSource;

impl QuartzEventSource {
    pub fn new() -> Self {
        Self
    }
}

impl EventSource for QuartzEventSource {
    fn subscribe(
        &self,
        kinds: &[InputKind],
        handler: EventHandler,
    ) -> Result<Subscription, PlatformError> {
        let kinds = kinds.to_vec();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("event-tap".to_string())
            .spawn(move || {
                debug!("event tap thread started");
                run_tap(kinds, handler, thread_running, ready_tx);
                debug!("event tap thread stopped");
            })
            .map_err(|e| PlatformError::ThreadSpawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(PlatformError::TapCreation);
            }
        }

        Ok(Subscription::new(move || {
            running.store(false, Ordering::SeqCst);
            if worker.join().is_err() {
                error!("event tap thread panicked");
            }
        }))
    }
}

/// Run a CFRunLoop with the event tap until `running` is cleared
fn run_tap(
    kinds: Vec<InputKind>,
    handler: EventHandler,
    running: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), PlatformError>>,
) {
    let event_types = tap_event_types(&kinds);

    // Runs on this thread only; must stay fast and non-blocking.
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        if let Some(input) = decode(event_type, event) {
            if kinds.contains(&input.kind()) {
                handler(&input);
            }
        }
        Some(event.clone())
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        event_types,
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!("failed to create event tap - is Accessibility permission granted?");
            let _ = ready.send(Err(PlatformError::PermissionDenied));
            return;
        }
    };

    let run_loop_source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            let _ = ready.send(Err(PlatformError::TapCreation));
            return;
        }
    };
    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }
    tap.enable();

    info!("event tap created and enabled");
    let _ = ready.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, POLL_INTERVAL, true);
        }
    }

    unsafe {
        run_loop.remove_source(&run_loop_source, kCFRunLoopCommonModes);
    }
}

/// Posts synthetic events at the HID level
#[derive(Debug, Default)]
pub struct QuartzInjector {
    /// Button currently held by replay, so moves become drags
    held: Mutex<Option<Button>>,
}

impl QuartzInjector {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> Option<Button> {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_held(&self, button: Option<Button>) {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = button;
    }

    fn post_mouse(
        &self,
        command: &'static str,
        event_type: CGEventType,
        point: CGPoint,
        button: Button,
    ) -> Result<(), InjectionError> {
        let cg_button = match button {
            Button::Left => CGMouseButton::Left,
            Button::Right => CGMouseButton::Right,
            Button::Middle | Button::Other(_) => CGMouseButton::Center,
        };
        let event = CGEvent::new_mouse_event(event_source(command)?, event_type, point, cg_button)
            .map_err(|()| InjectionError::new(command, "failed to create mouse event"))?;
        if let Button::Other(number) = button {
            event.set_integer_value_field(EventField::MOUSE_EVENT_BUTTON_NUMBER, i64::from(number));
        }
        event.post(CGEventTapLocation::HID);
        Ok(())
    }
}

fn event_source(command: &'static str) -> Result<CGEventSource, InjectionError> {
    CGEventSource::new(CGEventSourceStateID::HIDSystemState)
        .map_err(|()| InjectionError::new(command, "failed to create event source"))
}

fn cursor_location(command: &'static str) -> Result<CGPoint, InjectionError> {
    CGEvent::new(event_source(command)?)
        .map(|event| event.location())
        .map_err(|()| InjectionError::new(command, "failed to read cursor location"))
}

impl Injector for QuartzInjector {
    fn move_to(&self, x: i32, y: i32) -> Result<(), InjectionError> {
        let point = CGPoint::new(f64::from(x), f64::from(y));
        match self.held() {
            None => self.post_mouse("move_to", CGEventType::MouseMoved, point, Button::Left),
            Some(Button::Left) => {
                self.post_mouse("move_to", CGEventType::LeftMouseDragged, point, Button::Left)
            }
            Some(Button::Right) => {
                self.post_mouse("move_to", CGEventType::RightMouseDragged, point, Button::Right)
            }
            Some(button) => {
                self.post_mouse("move_to", CGEventType::OtherMouseDragged, point, button)
            }
        }
    }

    fn button_down(&self, button: Button) -> Result<(), InjectionError> {
        let point = cursor_location("button_down")?;
        let event_type = match button {
            Button::Left => CGEventType::LeftMouseDown,
            Button::Right => CGEventType::RightMouseDown,
            Button::Middle | Button::Other(_) => CGEventType::OtherMouseDown,
        };
        self.post_mouse("button_down", event_type, point, button)?;
        self.set_held(Some(button));
        Ok(())
    }

    fn button_up(&self, button: Button) -> Result<(), InjectionError> {
        let point = cursor_location("button_up")?;
        let event_type = match button {
            Button::Left => CGEventType::LeftMouseUp,
            Button::Right => CGEventType::RightMouseUp,
            Button::Middle | Button::Other(_) => CGEventType::OtherMouseUp,
        };
        self.set_held(None);
        self.post_mouse("button_up", event_type, point, button)
    }

    fn wheel_scroll(
        &self,
        delta: i32,
        axis: WheelAxis,
        unit: WheelUnit,
    ) -> Result<(), InjectionError> {
        let units = match unit {
            WheelUnit::Line => ScrollEventUnit::LINE,
            WheelUnit::Pixel => ScrollEventUnit::PIXEL,
        };
        let (count, vertical, horizontal) = match axis {
            WheelAxis::Vertical => (1, delta, 0),
            WheelAxis::Horizontal => (2, 0, delta),
        };
        let event = CGEvent::new_scroll_event(
            event_source("wheel_scroll")?,
            units,
            count,
            vertical,
            horizontal,
            0,
        )
        .map_err(|()| InjectionError::new("wheel_scroll", "failed to create scroll event"))?;
        event.post(CGEventTapLocation::HID);
        Ok(())
    }

    fn key_down(&self, key: Key) -> Result<(), InjectionError> {
        post_key("key_down", key, true)
    }

    fn key_up(&self, key: Key) -> Result<(), InjectionError> {
        post_key("key_up", key, false)
    }
}

fn post_key(command: &'static str, key: Key, down: bool) -> Result<(), InjectionError> {
    let code = code_from_key(key)
        .ok_or_else(|| InjectionError::new(command, format!("no virtual key code for {key}")))?;
    let event = CGEvent::new_keyboard_event(event_source(command)?, code, down)
        .map_err(|()| InjectionError::new(command, "failed to create keyboard event"))?;
    event.post(CGEventTapLocation::HID);
    Ok(())
}
