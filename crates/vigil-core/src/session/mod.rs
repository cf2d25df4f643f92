//! Session lock/unlock notifications.
//!
//! Notification sources block, so they are pumped on a dedicated thread. The
//! rest of the agent only ever sees the resulting [`PauseFlag`] and the
//! `System locked` / `System unlocked` lines in the event log.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use vigil_analytics::EventKind;

use crate::event_log::record_event;
use crate::watch::PauseFlag;

#[cfg(target_os = "linux")]
pub mod linux;

pub type SessionCallback = Box<dyn Fn() + Send + 'static>;

/// Source of session lock/unlock notifications
pub trait SessionSignal: Send {
    fn on_lock(&mut self, callback: SessionCallback);

    fn on_unlock(&mut self, callback: SessionCallback);

    /// Deliver notifications to the registered callbacks until `stop` is set.
    /// Blocks the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification source fails permanently
    fn pump(&mut self, stop: &AtomicBool) -> Result<()>;
}

/// Create the platform session signal
///
/// # Errors
///
/// Returns an error if the current platform is not supported
pub fn create_session_signal(poll_interval: Duration) -> Result<Box<dyn SessionSignal>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LoginctlSessionSignal::new(poll_interval)))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = poll_interval;
        anyhow::bail!("Session lock detection is not supported on this platform")
    }
}

/// Runs a [`SessionSignal`] on its own thread, mirroring it into a [`PauseFlag`]
pub struct SessionListener {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SessionListener {
    /// Register the lock/unlock callbacks and start pumping
    ///
    /// # Errors
    ///
    /// Returns an error if the listener thread cannot be spawned
    pub fn spawn(mut signal: Box<dyn SessionSignal>, flag: Arc<PauseFlag>) -> Result<Self> {
        let lock_flag = flag.clone();
        signal.on_lock(Box::new(move || {
            record_event(EventKind::Lock);
            lock_flag.set();
        }));
        signal.on_unlock(Box::new(move || {
            record_event(EventKind::Unlock);
            flag.clear();
        }));

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("vigil-session".to_string())
            .spawn(move || {
                if let Err(e) = signal.pump(&thread_stop) {
                    log::error!("Session listener stopped: {e:#}");
                }
            })
            .context("Failed to spawn session listener thread")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop pumping and wait for the thread to exit
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Session listener thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Replays a fixed sequence of notifications, then idles until stopped
    struct ScriptedSignal {
        script: Vec<bool>,
        on_lock: Vec<SessionCallback>,
        on_unlock: Vec<SessionCallback>,
        done: mpsc::Sender<()>,
    }

    impl SessionSignal for ScriptedSignal {
        fn on_lock(&mut self, callback: SessionCallback) {
            self.on_lock.push(callback);
        }

        fn on_unlock(&mut self, callback: SessionCallback) {
            self.on_unlock.push(callback);
        }

        fn pump(&mut self, stop: &AtomicBool) -> Result<()> {
            for &locked in &self.script {
                let callbacks = if locked { &self.on_lock } else { &self.on_unlock };
                for callback in callbacks {
                    callback();
                }
            }
            let _ = self.done.send(());
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }
    }

    fn run_script(script: Vec<bool>) -> Arc<PauseFlag> {
        let flag = Arc::new(PauseFlag::new());
        let (done, finished) = mpsc::channel();
        let signal = ScriptedSignal {
            script,
            on_lock: Vec::new(),
            on_unlock: Vec::new(),
            done,
        };

        let listener = SessionListener::spawn(Box::new(signal), flag.clone()).unwrap();
        finished.recv_timeout(Duration::from_secs(5)).unwrap();
        listener.stop();
        flag
    }

    #[test]
    fn test_lock_sets_flag() {
        let flag = run_script(vec![true]);
        assert!(flag.is_set());
        assert_eq!(flag.unlock_epoch(), 0);
    }

    #[test]
    fn test_unlock_clears_flag() {
        let flag = run_script(vec![true, false]);
        assert!(!flag.is_set());
        assert_eq!(flag.unlock_epoch(), 1);
    }
}
