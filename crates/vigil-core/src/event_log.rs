//! Writer side of the append-only event log.
//!
//! The daemon's `log` output is the event log: one line per record in the
//! form `YYYY-MM-DD HH:MM:SS - LEVEL - message`, appended to
//! `log_YYYY-MM-DD.log` for the local date of the write.

use chrono::{Local, NaiveDate};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use vigil_analytics::event::TIMESTAMP_FORMAT;
use vigil_analytics::{log_file_path, EventKind};

/// Log target of analytics events; the daemon logger must always let it through at `info`
pub const EVENT_TARGET: &str = "vigil::events";

/// Append-only writer that switches files when the local date changes
pub struct DailyLogWriter {
    dir: PathBuf,
    current: Option<(NaiveDate, File)>,
}

impl DailyLogWriter {
    /// Create a writer for `dir`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, current: None })
    }

    fn file_for(&mut self, date: NaiveDate) -> io::Result<&mut File> {
        let stale = self.current.as_ref().map_or(true, |(d, _)| *d != date);
        if stale {
            if let Some((_, mut previous)) = self.current.take() {
                previous.flush()?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file_path(&self.dir, date))?;
            self.current = Some((date, file));
        }
        match self.current.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(io::Error::new(io::ErrorKind::Other, "event log file unavailable")),
        }
    }
}

impl Write for DailyLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_for(Local::now().date_naive())?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some((_, file)) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Format one record as an event-log line
///
/// # Errors
///
/// Returns an error if the underlying writer fails
pub fn format_record<W: Write + ?Sized>(buf: &mut W, record: &log::Record) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARNING",
        log::Level::Info => "INFO",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    writeln!(
        buf,
        "{} - {level} - {}",
        Local::now().format(TIMESTAMP_FORMAT),
        record.args()
    )
}

/// Append an analytics event to the log
pub fn record_event(kind: EventKind) {
    match kind {
        EventKind::CameraInaccessible => log::warn!(target: EVENT_TARGET, "{}", kind.message()),
        _ => log::info!(target: EVENT_TARGET, "{}", kind.message()),
    }
}

/// Append an analytics event followed by free-form detail
pub fn record_event_with(kind: EventKind, detail: &str) {
    match kind {
        EventKind::CameraInaccessible => {
            log::warn!(target: EVENT_TARGET, "{} {detail}", kind.message());
        }
        _ => log::info!(target: EVENT_TARGET, "{} {detail}", kind.message()),
    }
}
