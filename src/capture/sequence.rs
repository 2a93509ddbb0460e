//! Recorded actions and finalized sequences

use std::sync::Arc;
use std::time::Duration;

use crate::hotkey::Key;
use crate::platform::{Button, InputEvent, InputKind};

/// One captured input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRecord {
    /// Milliseconds since the start of the capture session
    pub timestamp: u64,
    pub event: InputEvent,
}

impl ActionRecord {
    pub fn new(timestamp: u64, event: InputEvent) -> Self {
        Self { timestamp, event }
    }

    pub fn kind(&self) -> InputKind {
        self.event.kind()
    }

    /// Pointer coordinates, for pointer-related kinds
    pub fn position(&self) -> Option<(i32, i32)> {
        match self.event {
            InputEvent::PointerMove { x, y }
            | InputEvent::ButtonDown { x, y, .. }
            | InputEvent::ButtonUp { x, y, .. }
            | InputEvent::WheelScroll { x, y, .. } => Some((x, y)),
            InputEvent::KeyDown { .. } | InputEvent::KeyUp { .. } => None,
        }
    }

    pub fn button(&self) -> Option<Button> {
        match self.event {
            InputEvent::ButtonDown { button, .. } | InputEvent::ButtonUp { button, .. } => {
                Some(button)
            }
            _ => None,
        }
    }

    pub fn wheel_delta(&self) -> Option<i32> {
        match self.event {
            InputEvent::WheelScroll { delta, .. } => Some(delta),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<Key> {
        match self.event {
            InputEvent::KeyDown { key } | InputEvent::KeyUp { key } => Some(key),
            _ => None,
        }
    }
}

/// A hand-built sequence broke timestamp ordering
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("action {index} is timestamped before the action preceding it")]
    OutOfOrder { index: usize },
}

/// Ordered, immutable collection of recorded actions
///
/// Timestamps never decrease in index order. Clones share the same
/// storage, so handing a sequence to a replay session never copies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSequence {
    actions: Arc<[ActionRecord]>,
}

impl Default for ActionSequence {
    fn default() -> Self {
        Self {
            actions: Arc::from(Vec::new()),
        }
    }
}

impl ActionSequence {
    /// Build a sequence, checking that timestamps never decrease
    pub fn new(actions: Vec<ActionRecord>) -> Result<Self, SequenceError> {
        if let Some(index) = actions
            .windows(2)
            .position(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(SequenceError::OutOfOrder { index: index + 1 });
        }
        Ok(Self {
            actions: Arc::from(actions),
        })
    }

    /// Wrap a capture buffer; appends happen in clock order
    pub(crate) fn from_capture(actions: Vec<ActionRecord>) -> Self {
        debug_assert!(actions.windows(2).all(|p| p[0].timestamp <= p[1].timestamp));
        Self {
            actions: Arc::from(actions),
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ActionRecord> {
        self.actions.iter()
    }

    pub fn first(&self) -> Option<&ActionRecord> {
        self.actions.first()
    }

    /// Time from the first to the last action
    pub fn span(&self) -> Duration {
        match (self.actions.first(), self.actions.last()) {
            (Some(first), Some(last)) => Duration::from_millis(last.timestamp - first.timestamp),
            _ => Duration::ZERO,
        }
    }

    /// Whether two handles share the same storage
    pub fn ptr_eq(&self, other: &ActionSequence) -> bool {
        Arc::ptr_eq(&self.actions, &other.actions)
    }
}

impl<'a> IntoIterator for &'a ActionSequence {
    type Item = &'a ActionRecord;
    type IntoIter = std::slice::Iter<'a, ActionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(timestamp: u64) -> ActionRecord {
        ActionRecord::new(timestamp, InputEvent::KeyDown { key: Key::KeyA })
    }

    #[test]
    fn test_new_accepts_equal_timestamps() {
        let sequence = ActionSequence::new(vec![key(5), key(5), key(9)]).unwrap();
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.span(), Duration::from_millis(4));
    }

    #[test]
    fn test_new_rejects_decreasing_timestamps() {
        let err = ActionSequence::new(vec![key(5), key(10), key(7)]).unwrap_err();
        assert_eq!(err, SequenceError::OutOfOrder { index: 2 });
    }

    #[test]
    fn test_empty_sequence() {
        let sequence = ActionSequence::default();
        assert!(sequence.is_empty());
        assert_eq!(sequence.span(), Duration::ZERO);
        assert!(sequence.first().is_none());
    }

    #[test]
    fn test_clones_share_storage() {
        let sequence = ActionSequence::new(vec![key(1)]).unwrap();
        let clone = sequence.clone();
        assert!(sequence.ptr_eq(&clone));
    }

    #[test]
    fn test_record_accessors() {
        let click = ActionRecord::new(
            3,
            InputEvent::ButtonDown {
                button: Button::Left,
                x: 10,
                y: 20,
            },
        );
        assert_eq!(click.kind(), InputKind::ButtonDown);
        assert_eq!(click.position(), Some((10, 20)));
        assert_eq!(click.button(), Some(Button::Left));
        assert_eq!(click.key(), None);
        assert_eq!(click.wheel_delta(), None);

        let press = key(4);
        assert_eq!(press.position(), None);
        assert_eq!(press.key(), Some(Key::KeyA));
    }
}
