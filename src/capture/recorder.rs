//! Event capture session
//!
//! Subscribes to all six input kinds and appends each delivered event with
//! its offset from the session clock. Nothing is coalesced or throttled:
//! pointer motion alone can produce hundreds of actions per second, so a
//! recording grows linearly with raw event volume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::platform::{EventSource, InputEvent, InputKind, PlatformError, Subscription};

use super::sequence::{ActionRecord, ActionSequence};

/// Buffer and clock appended to from the source's delivery thread
struct Buffer {
    started: Instant,
    actions: Vec<ActionRecord>,
}

struct Shared {
    /// Single source of truth for whether callbacks may append
    recording: AtomicBool,
    buffer: Mutex<Buffer>,
}

impl Shared {
    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, event: &InputEvent) {
        let mut buffer = self.buffer();
        // Checked under the buffer lock so no append can follow the snapshot.
        if !self.recording.load(Ordering::SeqCst) {
            return;
        }
        let timestamp = buffer.started.elapsed().as_millis() as u64;
        trace!(timestamp, ?event, "captured");
        buffer.actions.push(ActionRecord::new(timestamp, *event));
    }
}

/// Records raw input into an [`ActionSequence`]
pub struct EventCapture {
    source: Arc<dyn EventSource>,
    shared: Arc<Shared>,
    subscription: Mutex<Option<Subscription>>,
    last: Mutex<ActionSequence>,
}

impl EventCapture {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            shared: Arc::new(Shared {
                recording: AtomicBool::new(false),
                buffer: Mutex::new(Buffer {
                    started: Instant::now(),
                    actions: Vec::new(),
                }),
            }),
            subscription: Mutex::new(None),
            last: Mutex::new(ActionSequence::default()),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::SeqCst)
    }

    /// Begin a capture session. No-op if one is already running.
    pub fn start(&self) -> Result<(), PlatformError> {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_recording() {
            debug!("capture already running");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handler = Arc::new(move |event: &InputEvent| shared.append(event));
        let registration = self.source.subscribe(&InputKind::ALL, handler)?;

        // Reset and open the gate only after the hooks are live.
        {
            let mut buffer = self.shared.buffer();
            buffer.actions.clear();
            buffer.started = Instant::now();
            self.shared.recording.store(true, Ordering::SeqCst);
        }
        *subscription = Some(registration);

        info!("capture started");
        Ok(())
    }

    /// End the capture session and return its snapshot.
    ///
    /// When no session is running this returns the previous snapshot
    /// unchanged.
    pub fn stop(&self) -> ActionSequence {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let was_recording = {
            let _buffer = self.shared.buffer();
            self.shared.recording.swap(false, Ordering::SeqCst)
        };
        if !was_recording {
            debug!("capture not running, returning last snapshot");
            return self.last();
        }

        if let Some(registration) = subscription.take() {
            registration.release();
        }

        let (snapshot, elapsed) = {
            let mut buffer = self.shared.buffer();
            let actions = std::mem::take(&mut buffer.actions);
            (ActionSequence::from_capture(actions), buffer.started.elapsed())
        };

        info!(
            actions = snapshot.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "capture stopped"
        );
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        snapshot
    }

    /// The most recent finalized snapshot
    pub fn last(&self) -> ActionSequence {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for EventCapture {
    fn drop(&mut self) {
        if self.is_recording() {
            self.stop();
        }
    }
}
