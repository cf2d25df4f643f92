use anyhow::{bail, Context, Result};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{SessionCallback, SessionSignal};

/// Watches the logind `LockedHint` of the current session.
///
/// logind has no blocking CLI for lock notifications, so the hint is polled.
pub struct LoginctlSessionSignal {
    session_id: String,
    poll_interval: Duration,
    on_lock: Vec<SessionCallback>,
    on_unlock: Vec<SessionCallback>,
}

impl LoginctlSessionSignal {
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        let session_id = std::env::var("XDG_SESSION_ID").unwrap_or_else(|_| "auto".to_string());
        Self {
            session_id,
            poll_interval: poll_interval.max(Duration::from_millis(100)),
            on_lock: Vec::new(),
            on_unlock: Vec::new(),
        }
    }

    fn locked_hint(&self) -> Result<bool> {
        let output = Command::new("loginctl")
            .args([
                "show-session",
                &self.session_id,
                "--property=LockedHint",
                "--value",
            ])
            .output()
            .context("Failed to run loginctl")?;

        if !output.status.success() {
            bail!(
                "loginctl exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_locked_hint(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Last lock state seen; the first reading is always announced so a lock
/// left open by a previous run gets closed
#[derive(Default)]
struct LockTracker(Option<bool>);

impl LockTracker {
    /// The new state if it differs from the last one seen
    fn observe(&mut self, locked: bool) -> Option<bool> {
        if self.0 == Some(locked) {
            return None;
        }
        self.0 = Some(locked);
        Some(locked)
    }
}

fn parse_locked_hint(value: &str) -> Result<bool> {
    match value.trim() {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => bail!("Unexpected LockedHint value {other:?}"),
    }
}

impl SessionSignal for LoginctlSessionSignal {
    fn on_lock(&mut self, callback: SessionCallback) {
        self.on_lock.push(callback);
    }

    fn on_unlock(&mut self, callback: SessionCallback) {
        self.on_unlock.push(callback);
    }

    fn pump(&mut self, stop: &AtomicBool) -> Result<()> {
        log::info!("Watching lock state of session {}", self.session_id);
        let mut tracker = LockTracker::default();
        let mut reported_failure = false;

        while !stop.load(Ordering::SeqCst) {
            match self.locked_hint() {
                Ok(now) => {
                    reported_failure = false;
                    if let Some(locked) = tracker.observe(now) {
                        let callbacks = if locked { &self.on_lock } else { &self.on_unlock };
                        for callback in callbacks {
                            callback();
                        }
                    }
                }
                Err(e) if !reported_failure => {
                    log::warn!("Cannot read session lock state: {e:#}");
                    reported_failure = true;
                }
                Err(e) => log::debug!("Cannot read session lock state: {e:#}"),
            }
            std::thread::sleep(self.poll_interval);
        }
        Ok(())
    }
}
