/// Daily usage report
use anyhow::Result;
use chrono::{Local, NaiveDate};
use tabled::{Table, Tabled};
use vigil_storage::{DailyUsage, Database, StatsPeriod};

use super::helpers::{format_duration, percentage};

#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Monitored")]
    monitored: String,
    #[tabled(rename = "Screen")]
    screen: String,
    #[tabled(rename = "Active")]
    active: String,
    #[tabled(rename = "Locked")]
    locked: String,
    #[tabled(rename = "Camera down")]
    camera_down: String,
    #[tabled(rename = "Active %")]
    active_share: String,
}

impl UsageRow {
    fn new(label: String, usage: &DailyUsage) -> Self {
        Self {
            date: label,
            monitored: format_duration(usage.total_monitored),
            screen: format_duration(usage.screen_time),
            active: format_duration(usage.active_time),
            locked: format_duration(usage.locked_time),
            camera_down: format_duration(usage.camera_down_time),
            active_share: percentage(usage.active_time, usage.total_monitored),
        }
    }
}

impl From<&DailyUsage> for UsageRow {
    fn from(usage: &DailyUsage) -> Self {
        Self::new(usage.date.to_string(), usage)
    }
}

/// Field-wise sum of several days
fn sum_usage(days: &[DailyUsage], date: NaiveDate) -> DailyUsage {
    days.iter().fold(DailyUsage::zero(date), |mut acc, day| {
        acc.total_monitored = acc.total_monitored.saturating_add(day.total_monitored);
        acc.screen_time = acc.screen_time.saturating_add(day.screen_time);
        acc.active_time = acc.active_time.saturating_add(day.active_time);
        acc.locked_time = acc.locked_time.saturating_add(day.locked_time);
        acc.camera_down_time = acc.camera_down_time.saturating_add(day.camera_down_time);
        acc
    })
}

pub fn handle_report_command(period: &str) -> Result<()> {
    let period: StatsPeriod = period.parse()?;
    let db = Database::new(None)?;
    let today = Local::now().date_naive();
    let usage = db.list_daily_usage(period, today)?;

    if usage.is_empty() {
        println!("No usage recorded for period: {period}");
        return Ok(());
    }

    println!("\nUsage Report: {period}");

    let mut rows: Vec<UsageRow> = usage.iter().map(UsageRow::from).collect();
    if usage.len() > 1 {
        rows.push(UsageRow::new(
            String::from("Total"),
            &sum_usage(&usage, today),
        ));
    }

    let table = Table::new(rows).to_string();
    println!("\n{table}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(d: u32, total: u32, screen: u32, active: u32, locked: u32, camera_down: u32) -> DailyUsage {
        DailyUsage {
            total_monitored: total,
            screen_time: screen,
            active_time: active,
            locked_time: locked,
            camera_down_time: camera_down,
            ..DailyUsage::zero(NaiveDate::from_ymd_opt(2024, 3, d).unwrap())
        }
    }

    #[test]
    fn test_row_shows_stored_breakdown() {
        // Camera down the whole time: active is clamped but the downtime is not
        let row = UsageRow::from(&usage(1, 600, 300, 0, 300, 600));
        assert_eq!(row.date, "2024-03-01");
        assert_eq!(row.locked, "00:05:00");
        assert_eq!(row.camera_down, "00:10:00");
        assert_eq!(row.active_share, "0.0%");
    }

    #[test]
    fn test_total_row_sums_every_column() {
        let days = vec![usage(2, 600, 480, 360, 120, 120), usage(1, 300, 300, 0, 0, 400)];
        let total = sum_usage(&days, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(total.total_monitored, 900);
        assert_eq!(total.screen_time, 780);
        assert_eq!(total.active_time, 360);
        assert_eq!(total.locked_time, 120);
        assert_eq!(total.camera_down_time, 520);
    }
}
