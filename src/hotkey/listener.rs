//! Stop hotkey listener for an active replay
//!
//! Armed for the lifetime of one replay session: it watches the raw
//! key-press stream and cancels the session's token on the first press of
//! the resolved key. Dropping the listener releases its subscription, so
//! the owning session gives it back on every exit path.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::EngineEvent;
use crate::platform::{EventHandler, EventSource, InputEvent, InputKind, PlatformError, Subscription};
use crate::replay::CancelToken;

use super::keys::Key;

/// Watches for the stop key while a replay runs
#[derive(Debug)]
pub struct StopKeyListener {
    key: Key,
    subscription: Option<Subscription>,
}

impl StopKeyListener {
    /// Subscribe to key presses and cancel `token` when `key` goes down
    pub fn arm(
        source: &dyn EventSource,
        key: Key,
        token: CancelToken,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Result<Self, PlatformError> {
        let handler: EventHandler = Arc::new(move |event: &InputEvent| {
            let InputEvent::KeyDown { key: pressed } = event else {
                return;
            };
            // Only the press that flips the token reports; repeats are ignored.
            if *pressed == key && token.cancel() {
                info!(%key, "stop key pressed, cancelling replay");
                let _ = event_tx.send(EngineEvent::StopKeyPressed);
            }
        });

        let subscription = source.subscribe(&[InputKind::KeyDown], handler)?;
        debug!(%key, "stop key listener armed");

        Ok(Self {
            key,
            subscription: Some(subscription),
        })
    }

    /// Release the subscription now rather than on drop
    pub fn disarm(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
            debug!(key = %self.key, "stop key listener disarmed");
        }
    }
}

impl Drop for StopKeyListener {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::loopback::LoopbackSource;

    fn arm(source: &LoopbackSource, key: Key) -> (StopKeyListener, CancelToken, broadcast::Receiver<EngineEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let token = CancelToken::new();
        let listener = StopKeyListener::arm(source, key, token.clone(), tx).unwrap();
        (listener, token, rx)
    }

    #[test]
    fn test_matching_press_cancels() {
        let source = LoopbackSource::new();
        let (_listener, token, mut rx) = arm(&source, Key::Escape);

        source.emit(InputEvent::KeyDown { key: Key::Escape });

        assert!(token.is_cancelled());
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::StopKeyPressed);
    }

    #[test]
    fn test_other_keys_are_ignored() {
        let source = LoopbackSource::new();
        let (_listener, token, _rx) = arm(&source, Key::KeyP);

        source.emit(InputEvent::KeyDown { key: Key::KeyO });
        source.emit(InputEvent::KeyUp { key: Key::KeyP });

        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_repeated_presses_report_once() {
        let source = LoopbackSource::new();
        let (_listener, token, mut rx) = arm(&source, Key::KeyP);

        source.emit(InputEvent::KeyDown { key: Key::KeyP });
        source.emit(InputEvent::KeyDown { key: Key::KeyP });

        assert!(token.is_cancelled());
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::StopKeyPressed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disarm_releases_subscription() {
        let source = LoopbackSource::new();
        let (listener, token, _rx) = arm(&source, Key::KeyP);
        assert_eq!(source.subscriber_count(), 1);

        listener.disarm();
        assert_eq!(source.subscriber_count(), 0);

        source.emit(InputEvent::KeyDown { key: Key::KeyP });
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_drop_releases_subscription() {
        let source = LoopbackSource::new();
        {
            let _armed = arm(&source, Key::KeyP);
            assert_eq!(source.subscriber_count(), 1);
        }
        assert_eq!(source.subscriber_count(), 0);
    }
}
