//! Background key listener producing event marks.
//!
//! The listener runs on its own thread and talks to the session loop only
//! through an append-only channel of [`EventMark`]s.

use crate::collector::types::{EventMark, KeyEdge, KeyEvent, KeyId};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the listener thread re-checks its stop flag while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Hold state of the designated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Idle,
    Held,
}

/// Turns raw key edges into marks.
///
/// Only a `Down` edge of the designated key while `Idle` produces a mark;
/// auto-repeat downs while `Held` are ignored until the matching `Up`.
#[derive(Debug, Clone)]
pub struct KeyLatch {
    key: KeyId,
    state: LatchState,
    last_mark: DateTime<Utc>,
}

impl KeyLatch {
    /// `origin` is the reference time for the first mark's gap.
    pub fn new(key: KeyId, origin: DateTime<Utc>) -> Self {
        Self {
            key,
            state: LatchState::Idle,
            last_mark: origin,
        }
    }

    pub fn state(&self) -> LatchState {
        self.state
    }

    pub fn on_event(&mut self, event: &KeyEvent) -> Option<EventMark> {
        if event.key != self.key {
            return None;
        }

        match (event.edge, self.state) {
            (KeyEdge::Down, LatchState::Idle) => {
                let since_previous = (event.timestamp - self.last_mark)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                self.last_mark = event.timestamp;
                self.state = LatchState::Held;
                Some(EventMark {
                    timestamp: event.timestamp,
                    since_previous,
                })
            }
            (KeyEdge::Down, LatchState::Held) => None,
            (KeyEdge::Up, _) => {
                self.state = LatchState::Idle;
                None
            }
        }
    }
}

/// Handle to the running listener thread.
pub struct EventListener {
    running: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
    marks: Receiver<EventMark>,
    thread_handle: Option<JoinHandle<()>>,
}

impl EventListener {
    /// Spawn the listener over a stream of key events.
    pub fn start(events: Receiver<KeyEvent>, latch: KeyLatch) -> Self {
        let (sender, marks) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let disconnected = Arc::new(AtomicBool::new(false));

        let handle = {
            let running = running.clone();
            let disconnected = disconnected.clone();
            thread::spawn(move || run_listener(events, latch, sender, running, disconnected))
        };

        Self {
            running,
            disconnected,
            marks,
            thread_handle: Some(handle),
        }
    }

    /// Whether the key event source went away while the listener was running.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Take every mark produced so far without blocking.
    pub fn drain(&self) -> Vec<EventMark> {
        self.marks.try_iter().collect()
    }

    /// Stop the thread and wait for it to exit. Marks already produced stay
    /// available through [`EventListener::drain`].
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_listener(
    events: Receiver<KeyEvent>,
    mut latch: KeyLatch,
    sender: Sender<EventMark>,
    running: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                if let Some(mark) = latch.on_event(&event) {
                    tracing::debug!(
                        gap_secs = mark.since_previous_secs(),
                        "designated key pressed"
                    );
                    if sender.send(mark).is_err() {
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("key event source disconnected");
                disconnected.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    // Events queued before the stop request still count.
    for event in events.try_iter() {
        if let Some(mark) = latch.on_event(&event) {
            let _ = sender.send(mark);
        }
    }
    running.store(false, Ordering::SeqCst);
}
