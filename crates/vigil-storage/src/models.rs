use anyhow::Result;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-day usage aggregate derived from the event log.
///
/// All durations are whole seconds. Invariant:
/// `active_time <= screen_time <= total_monitored`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    /// Time presence monitoring was enabled
    pub total_monitored: u32,
    /// Monitored time minus time the session was locked
    pub screen_time: u32,
    /// Screen time minus time the camera could not provide a feed
    pub active_time: u32,
    /// Monitored time during which the session was locked
    pub locked_time: u32,
    /// Monitored time during which the camera was down, locked or not
    pub camera_down_time: u32,
    pub updated_at: NaiveDateTime,
}

impl DailyUsage {
    /// A zero-valued row for `date`, stamped with the current local time
    #[must_use]
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            total_monitored: 0,
            screen_time: 0,
            active_time: 0,
            locked_time: 0,
            camera_down_time: 0,
            updated_at: Local::now().naive_local(),
        }
    }
}

/// Reporting window for stored aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsPeriod {
    Today,
    /// The last 7 days, today included
    Week,
    /// The last 30 days, today included
    Month,
    All,
}

impl StatsPeriod {
    /// First date covered by this period, or `None` for no lower bound
    #[must_use]
    pub fn start_date(self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Today => Some(today),
            Self::Week => Some(today - Duration::days(6)),
            Self::Month => Some(today - Duration::days(29)),
            Self::All => None,
        }
    }
}

impl FromStr for StatsPeriod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "all" => Ok(Self::All),
            other => anyhow::bail!("Unknown period: {other}. Use 'today', 'week', 'month' or 'all'"),
        }
    }
}

impl fmt::Display for StatsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::All => "all",
        };
        f.write_str(name)
    }
}
