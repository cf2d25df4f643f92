pub mod collab;
pub mod config;
pub mod daemon;
pub mod event_log;
pub mod ipc;
pub mod session;
pub mod watch;

pub use config::Config;
pub use daemon::Daemon;
pub use watch::{PauseFlag, PresenceState, PresenceWatchLoop, WatchControl};
