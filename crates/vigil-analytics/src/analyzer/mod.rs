//! Daily usage aggregation over the append-only event log.
//!
//! The log is the source of truth: every aggregate can be re-derived from the
//! file at any time. Results are memoized by file modification time, which
//! only saves work and never changes the value returned.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use thiserror::Error;
use vigil_storage::{DailyUsage, Database};

use crate::event::{Event, EventKind, EventParser};
use crate::interval::{build_intervals, overlap_duration, total_duration};

/// Destination for computed aggregates (upsert keyed by date)
pub trait UsageSink: Send + Sync {
    /// Insert or replace the row for `usage.date`
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be persisted
    fn upsert_usage(&self, usage: &DailyUsage) -> anyhow::Result<()>;
}

impl UsageSink for Database {
    fn upsert_usage(&self, usage: &DailyUsage) -> anyhow::Result<()> {
        self.upsert_daily_usage(usage)
    }
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("Failed to read event log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sink(#[from] anyhow::Error),
}

/// Usage totals in whole seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub total_monitored: u32,
    pub locked_time: u32,
    pub camera_down_time: u32,
    pub screen_time: u32,
    pub active_time: u32,
}

/// Compute the usage totals for one log's events.
///
/// Intervals left open at the end of the log are closed at `open_end`. Lock
/// and camera time only count where they overlap a monitor interval.
#[must_use]
pub fn compute_usage(events: &[Event], open_end: NaiveDateTime) -> UsageTotals {
    let monitor = build_intervals(
        events,
        EventKind::MonitorStart,
        EventKind::MonitorStop,
        open_end,
    );
    if monitor.is_empty() {
        return UsageTotals::default();
    }

    let locks = build_intervals(events, EventKind::Lock, EventKind::Unlock, open_end);
    let camera = build_intervals(
        events,
        EventKind::CameraInaccessible,
        EventKind::CameraAccessible,
        open_end,
    );

    let total = total_duration(&monitor);
    let locked = overlap_duration(&monitor, &locks);
    let camera_down = overlap_duration(&monitor, &camera);

    let screen = (total - locked).max(Duration::zero());
    let active = (screen - camera_down).max(Duration::zero());

    UsageTotals {
        total_monitored: whole_seconds(total),
        locked_time: whole_seconds(locked),
        camera_down_time: whole_seconds(camera_down),
        screen_time: whole_seconds(screen),
        active_time: whole_seconds(active),
    }
}

fn whole_seconds(d: Duration) -> u32 {
    u32::try_from(d.num_seconds().max(0)).unwrap_or(u32::MAX)
}

/// Event log file for a given day: `<dir>/log_YYYY-MM-DD.log`
#[must_use]
pub fn log_file_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("log_{}.log", date.format("%Y-%m-%d")))
}

struct CachedUsage {
    modified: SystemTime,
    usage: DailyUsage,
}

/// Turns a day's event log into a persisted [`DailyUsage`] row
pub struct UsageAnalyzer {
    log_dir: PathBuf,
    sink: Arc<dyn UsageSink>,
    parser: EventParser,
    cache: Mutex<HashMap<PathBuf, CachedUsage>>,
}

impl UsageAnalyzer {
    #[must_use]
    pub fn new(log_dir: PathBuf, sink: Arc<dyn UsageSink>) -> Self {
        Self {
            log_dir,
            sink,
            parser: EventParser::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Analyze today's log and upsert the result
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or the sink fails
    pub fn process_today(&self) -> Result<DailyUsage, AnalyzerError> {
        self.process_day(Local::now().date_naive())
    }

    /// Analyze the log of `date` and upsert the result.
    ///
    /// A missing log yields a zero-valued row. Intervals still open are closed
    /// at the current time, capped at the end of `date`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or the sink fails
    pub fn process_day(&self, date: NaiveDate) -> Result<DailyUsage, AnalyzerError> {
        let path = log_file_path(&self.log_dir, date);

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No event log for {date} at {}", path.display());
                let usage = DailyUsage::zero(date);
                self.sink.upsert_usage(&usage)?;
                return Ok(usage);
            }
            Err(source) => return Err(AnalyzerError::Io { path, source }),
        };
        let modified = metadata
            .modified()
            .map_err(|source| AnalyzerError::Io {
                path: path.clone(),
                source,
            })?;

        if let Some(cached) = self.cached(&path, modified) {
            log::debug!("Event log for {date} unchanged, reusing cached usage");
            return Ok(cached);
        }

        let bytes = std::fs::read(&path).map_err(|source| AnalyzerError::Io {
            path: path.clone(),
            source,
        })?;
        let content = String::from_utf8_lossy(&bytes);
        let events = self.parser.parse_all(&content);

        let totals = compute_usage(&events, Self::open_interval_end(date));
        let usage = DailyUsage {
            total_monitored: totals.total_monitored,
            screen_time: totals.screen_time,
            active_time: totals.active_time,
            locked_time: totals.locked_time,
            camera_down_time: totals.camera_down_time,
            ..DailyUsage::zero(date)
        };

        self.sink.upsert_usage(&usage)?;
        log::debug!(
            "Usage for {date}: monitored {}s, screen {}s, active {}s ({} events)",
            usage.total_monitored,
            usage.screen_time,
            usage.active_time,
            events.len()
        );

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                path,
                CachedUsage {
                    modified,
                    usage: usage.clone(),
                },
            );
        }

        Ok(usage)
    }

    fn cached(&self, path: &Path, modified: SystemTime) -> Option<DailyUsage> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(path)
            .filter(|entry| entry.modified == modified)
            .map(|entry| entry.usage.clone())
    }

    fn open_interval_end(date: NaiveDate) -> NaiveDateTime {
        let now = Local::now().naive_local();
        date.succ_opt()
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .map_or(now, |end_of_day| now.min(end_of_day))
    }
}
