//! Fallback for targets without a native backend

use super::{
    Button, EventHandler, EventSource, InjectionError, Injector, InputKind, PlatformError,
    Subscription, WheelAxis, WheelUnit,
};
use crate::hotkey::Key;

const UNSUPPORTED: &str = "input injection is not supported on this platform";

/// Event source that refuses every subscription
pub struct UnsupportedSource;

impl EventSource for UnsupportedSource {
    fn subscribe(
        &self,
        _kinds: &[InputKind],
        _handler: EventHandler,
    ) -> Result<Subscription, PlatformError> {
        Err(PlatformError::Unsupported)
    }
}

/// Injector that fails every command
pub struct UnsupportedInjector;

impl Injector for UnsupportedInjector {
    fn move_to(&self, _x: i32, _y: i32) -> Result<(), InjectionError> {
        Err(InjectionError::new("move_to", UNSUPPORTED))
    }

    fn button_down(&self, _button: Button) -> Result<(), InjectionError> {
        Err(InjectionError::new("button_down", UNSUPPORTED))
    }

    fn button_up(&self, _button: Button) -> Result<(), InjectionError> {
        Err(InjectionError::new("button_up", UNSUPPORTED))
    }

    fn wheel_scroll(
        &self,
        _delta: i32,
        _axis: WheelAxis,
        _unit: WheelUnit,
    ) -> Result<(), InjectionError> {
        Err(InjectionError::new("wheel_scroll", UNSUPPORTED))
    }

    fn key_down(&self, _key: Key) -> Result<(), InjectionError> {
        Err(InjectionError::new("key_down", UNSUPPORTED))
    }

    fn key_up(&self, _key: Key) -> Result<(), InjectionError> {
        Err(InjectionError::new("key_up", UNSUPPORTED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_subscribe_is_refused() {
        let handler = Arc::new(|_: &crate::platform::InputEvent| {});
        let result = UnsupportedSource.subscribe(&InputKind::ALL, handler);
        assert!(matches!(result, Err(PlatformError::Unsupported)));
    }

    #[test]
    fn test_injection_fails() {
        let err = UnsupportedInjector.key_down(Key::KeyP).unwrap_err();
        assert_eq!(err.command, "key_down");
    }
}
