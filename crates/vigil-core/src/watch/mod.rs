//! Presence watch loop: camera acquisition, face verification, escalation to
//! lockout, and cooperative pausing on session lock.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod pause;
mod presence;
mod supervisor;

pub use pause::{PauseFlag, WatchControl};
pub use presence::{Collaborators, PresenceWatchLoop};
pub use supervisor::supervise;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceState {
    WaitingForCamera,
    Verifying,
    /// Consecutive failed matches so far
    Alerting(u32),
    LockedOut,
    Paused,
}

impl PresenceState {
    #[must_use]
    pub const fn retry_count(self) -> u32 {
        match self {
            Self::Alerting(n) => n,
            _ => 0,
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForCamera => write!(f, "waiting for camera"),
            Self::Verifying => write!(f, "verifying"),
            Self::Alerting(n) => write!(f, "alerting ({n} failed)"),
            Self::LockedOut => write!(f, "locked out"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Face matcher failed: {0:#}")]
    Matcher(#[source] anyhow::Error),

    #[error("Face matcher gave no answer within {0:?}")]
    MatcherTimeout(std::time::Duration),
}

#[cfg(test)]
mod tests;
