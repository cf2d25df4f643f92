use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;

use super::PresenceState;

/// Session-driven pause signal.
///
/// Set on session lock and cleared on unlock by the session listener; the
/// watch loop only reads it. Every clear bumps an unlock epoch so a loop that
/// locked the workstation itself can tell when an unlock happened.
#[derive(Debug, Default)]
pub struct PauseFlag {
    paused: AtomicBool,
    unlocks: AtomicU64,
}

impl PauseFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.unlocks.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Number of unlocks seen so far
    #[must_use]
    pub fn unlock_epoch(&self) -> u64 {
        self.unlocks.load(Ordering::SeqCst)
    }
}

/// Manual control over the watch loop, shared with IPC
#[derive(Debug)]
pub struct WatchControl {
    manual_pause: AtomicBool,
    shutdown: AtomicBool,
    state: watch::Sender<PresenceState>,
}

impl Default for WatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchControl {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(PresenceState::WaitingForCamera);
        Self {
            manual_pause: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            state,
        }
    }

    /// Suspend monitoring. Returns `false` if it was already paused.
    pub fn pause(&self) -> bool {
        !self.manual_pause.swap(true, Ordering::SeqCst)
    }

    /// Resume monitoring. Returns `false` if it was not paused.
    pub fn resume(&self) -> bool {
        self.manual_pause.swap(false, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.manual_pause.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Last state published by the loop
    #[must_use]
    pub fn state(&self) -> PresenceState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PresenceState> {
        self.state.subscribe()
    }

    pub(crate) fn publish(&self, state: PresenceState) {
        self.state.send_replace(state);
    }
}
