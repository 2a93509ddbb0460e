//! Canonical key identifiers and stop-key parsing
//!
//! Keys are named after the physical key they sit on (`KeyA`, `Digit1`,
//! `Escape`, `ControlLeft`), independent of keyboard layout. Codes a backend
//! cannot name are carried through as `Key::Unknown` so they still replay.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

macro_rules! keys {
    ($($variant:ident),* $(,)?) => {
        /// A physical key
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Key {
            $($variant,)*
            /// Platform key code with no canonical name
            Unknown(u32),
        }

        impl Key {
            /// Every named key
            pub const NAMED: &'static [Key] = &[$(Key::$variant),*];

            /// Canonical name, `None` for `Unknown`
            pub fn name(&self) -> Option<&'static str> {
                match self {
                    $(Key::$variant => Some(stringify!($variant)),)*
                    Key::Unknown(_) => None,
                }
            }
        }
    };
}

keys! {
    KeyA, KeyB, KeyC, KeyD, KeyE, KeyF, KeyG, KeyH, KeyI, KeyJ, KeyK, KeyL, KeyM,
    KeyN, KeyO, KeyP, KeyQ, KeyR, KeyS, KeyT, KeyU, KeyV, KeyW, KeyX, KeyY, KeyZ,
    Digit0, Digit1, Digit2, Digit3, Digit4, Digit5, Digit6, Digit7, Digit8, Digit9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    Escape, Enter, Tab, Space, Backspace, Delete, CapsLock,
    ControlLeft, ControlRight, AltLeft, AltRight, ShiftLeft, ShiftRight, MetaLeft, MetaRight,
    ArrowUp, ArrowDown, ArrowLeft, ArrowRight, Home, End, PageUp, PageDown,
    Minus, Equal, BracketLeft, BracketRight, Backslash, Semicolon, Quote, Comma, Period,
    Slash, Backquote,
}

impl Key {
    /// Exact, case-insensitive lookup by canonical name
    pub fn from_name(name: &str) -> Option<Key> {
        Key::NAMED
            .iter()
            .copied()
            .find(|key| key.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Unknown(code) => write!(f, "Unknown({code:#x})"),
            key => f.write_str(key.name().unwrap_or("Unknown")),
        }
    }
}

/// Key used when a stop-key token cannot be resolved
pub const DEFAULT_STOP_KEY: Key = Key::KeyP;

/// Prefixes that turn a single character into a canonical name
const KEY_PREFIXES: [&str; 2] = ["Key", "Digit"];

/// Common names for keys whose canonical name differs
const ALIASES: &[(&str, Key)] = &[
    ("esc", Key::Escape),
    ("return", Key::Enter),
    ("ctrl", Key::ControlLeft),
    ("control", Key::ControlLeft),
    ("alt", Key::AltLeft),
    ("option", Key::AltLeft),
    ("shift", Key::ShiftLeft),
    ("cmd", Key::MetaLeft),
    ("command", Key::MetaLeft),
];

/// Resolve a user-supplied hotkey token.
///
/// Tries, in order: the canonical name, the canonical name with a
/// single-character prefix (`p` -> `KeyP`, `1` -> `Digit1`), the alias
/// table, and finally [`DEFAULT_STOP_KEY`]. Never fails: a replay must
/// always have a stop key.
pub fn parse_stop_key(token: &str) -> Key {
    let token = token.trim();
    if token.is_empty() {
        return DEFAULT_STOP_KEY;
    }

    if let Some(key) = Key::from_name(token) {
        return key;
    }

    for prefix in KEY_PREFIXES {
        if let Some(key) = Key::from_name(&format!("{prefix}{token}")) {
            return key;
        }
    }

    if let Some((_, key)) = ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(token))
    {
        return *key;
    }

    debug!(token, default = %DEFAULT_STOP_KEY, "unrecognized stop key, using default");
    DEFAULT_STOP_KEY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_name() {
        assert_eq!(parse_stop_key("Escape"), Key::Escape);
        assert_eq!(parse_stop_key("f5"), Key::F5);
        assert_eq!(parse_stop_key("controlleft"), Key::ControlLeft);
    }

    #[test]
    fn test_esc_alias() {
        assert_eq!(parse_stop_key("Esc"), Key::Escape);
        assert_eq!(parse_stop_key("ESC"), Key::Escape);
    }

    #[test]
    fn test_named_aliases() {
        assert_eq!(parse_stop_key("Enter"), Key::Enter);
        assert_eq!(parse_stop_key("return"), Key::Enter);
        assert_eq!(parse_stop_key("Ctrl"), Key::ControlLeft);
        assert_eq!(parse_stop_key("Alt"), Key::AltLeft);
        assert_eq!(parse_stop_key("Shift"), Key::ShiftLeft);
    }

    #[test]
    fn test_single_letter_bare_or_prefixed() {
        assert_eq!(parse_stop_key("q"), Key::KeyQ);
        assert_eq!(parse_stop_key("Q"), Key::KeyQ);
        assert_eq!(parse_stop_key("KeyQ"), Key::KeyQ);
        assert_eq!(parse_stop_key("7"), Key::Digit7);
        assert_eq!(parse_stop_key("Digit7"), Key::Digit7);
    }

    #[test]
    fn test_unrecognized_falls_back_to_default() {
        assert_eq!(parse_stop_key("definitely-not-a-key"), DEFAULT_STOP_KEY);
        assert_eq!(parse_stop_key(""), DEFAULT_STOP_KEY);
        assert_eq!(parse_stop_key("   "), DEFAULT_STOP_KEY);
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        assert_eq!(parse_stop_key("  esc "), Key::Escape);
    }

    #[test]
    fn test_display() {
        assert_eq!(Key::KeyP.to_string(), "KeyP");
        assert_eq!(Key::Unknown(0x5f).to_string(), "Unknown(0x5f)");
    }
}
