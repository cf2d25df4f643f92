//! Event-log grammar shared by the writer (daemon) and the reader (analyzer).
//!
//! Lines look like `YYYY-MM-DD HH:MM:SS - <LEVEL> - <message>`. Only the
//! messages below carry meaning for usage analytics; everything else is
//! informational.

use chrono::NaiveDateTime;
use regex::Regex;

pub const MONITOR_STARTED: &str = "Monitoring started by user";
pub const MONITOR_STOPPED: &str = "Monitoring stopped by user";
pub const SYSTEM_LOCKED: &str = "System locked";
pub const SYSTEM_UNLOCKED: &str = "System unlocked";
pub const CAMERA_INACCESSIBLE: &str = "Camera inaccessible";
pub const CAMERA_ACCESSIBLE: &str = "Camera accessible again";

/// Timestamp layout at the start of every log line (local time)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MonitorStart,
    MonitorStop,
    Lock,
    Unlock,
    CameraInaccessible,
    CameraAccessible,
}

impl EventKind {
    /// Canonical message the writer emits for this event
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::MonitorStart => MONITOR_STARTED,
            Self::MonitorStop => MONITOR_STOPPED,
            Self::Lock => SYSTEM_LOCKED,
            Self::Unlock => SYSTEM_UNLOCKED,
            Self::CameraInaccessible => CAMERA_INACCESSIBLE,
            Self::CameraAccessible => CAMERA_ACCESSIBLE,
        }
    }
}

/// A recognized log event. Immutable once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: NaiveDateTime,
}

/// Classifies raw log lines into [`Event`]s
pub struct EventParser {
    timestamp: Regex,
    patterns: Vec<(EventKind, Regex)>,
}

impl EventParser {
    /// Create a parser for the fixed set of recognized messages
    ///
    /// # Panics
    ///
    /// May panic if the built-in patterns are invalid (should never happen with hardcoded patterns)
    #[must_use]
    pub fn new() -> Self {
        // Order matters: the first matching pattern classifies the line
        let kinds = [
            EventKind::MonitorStart,
            EventKind::MonitorStop,
            EventKind::Lock,
            EventKind::Unlock,
            EventKind::CameraInaccessible,
            EventKind::CameraAccessible,
        ];

        let patterns = kinds
            .into_iter()
            .map(|kind| {
                let escaped = regex::escape(kind.message());
                // Only camera messages must end on a word boundary
                let pattern = match kind {
                    EventKind::CameraInaccessible | EventKind::CameraAccessible => {
                        format!(r"(?i){escaped}\b")
                    }
                    _ => format!("(?i){escaped}"),
                };
                (kind, Regex::new(&pattern).unwrap())
            })
            .collect();

        Self {
            timestamp: Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})").unwrap(),
            patterns,
        }
    }

    /// Parse a single log line
    ///
    /// Returns `None` for lines without a valid leading timestamp and for
    /// lines whose message is not one of the recognized events.
    #[must_use]
    pub fn parse_line(&self, line: &str) -> Option<Event> {
        let raw_ts = self.timestamp.captures(line)?.get(1)?.as_str();
        let timestamp = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT).ok()?;

        let message = &line[raw_ts.len()..];
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(kind, _)| Event {
                kind: *kind,
                timestamp,
            })
    }

    /// Parse every line of a log, keeping append order
    #[must_use]
    pub fn parse_all(&self, content: &str) -> Vec<Event> {
        content.lines().filter_map(|line| self.parse_line(line)).collect()
    }
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}
