use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::helpers::{parse_date, parse_datetime, DATETIME_FORMAT, DATE_FORMAT};
use super::Database;
use crate::models::{DailyUsage, StatsPeriod};

impl Database {
    /// Insert or replace the aggregate for `usage.date`
    ///
    /// The date column is the primary key, so repeated calls for the same day
    /// overwrite the previous values instead of adding rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub fn upsert_daily_usage(&self, usage: &DailyUsage) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO usage_stats (date, total_monitored, screen_time, active_time,
                                      locked_time, camera_down_time, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(date) DO UPDATE SET
                total_monitored = excluded.total_monitored,
                screen_time = excluded.screen_time,
                active_time = excluded.active_time,
                locked_time = excluded.locked_time,
                camera_down_time = excluded.camera_down_time,
                updated_at = excluded.updated_at",
            params![
                usage.date.format(DATE_FORMAT).to_string(),
                usage.total_monitored,
                usage.screen_time,
                usage.active_time,
                usage.locked_time,
                usage.camera_down_time,
                usage.updated_at.format(DATETIME_FORMAT).to_string(),
            ],
        )?;
        Ok(())
    }

    /// Get the aggregate stored for a single day
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored row is corrupted
    pub fn get_daily_usage(&self, date: NaiveDate) -> Result<Option<DailyUsage>> {
        let usage = self
            .conn()?
            .query_row(
                "SELECT date, total_monitored, screen_time, active_time,
                        locked_time, camera_down_time, updated_at
                 FROM usage_stats
                 WHERE date = ?1",
                params![date.format(DATE_FORMAT).to_string()],
                Self::row_to_daily_usage,
            )
            .optional()?;
        Ok(usage)
    }

    /// List stored aggregates for a reporting period, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is corrupted
    pub fn list_daily_usage(&self, period: StatsPeriod, today: NaiveDate) -> Result<Vec<DailyUsage>> {
        // ISO dates sort lexicographically, so a string bound is enough
        let lower_bound = period
            .start_date(today)
            .map_or_else(String::new, |d| d.format(DATE_FORMAT).to_string());

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, total_monitored, screen_time, active_time,
                        locked_time, camera_down_time, updated_at
             FROM usage_stats
             WHERE date >= ?1
             ORDER BY date DESC",
        )?;

        let rows = stmt
            .query_map(params![lower_bound], Self::row_to_daily_usage)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn row_to_daily_usage(row: &rusqlite::Row) -> rusqlite::Result<DailyUsage> {
        Ok(DailyUsage {
            date: parse_date(&row.get::<_, String>(0)?)?,
            total_monitored: row.get(1)?,
            screen_time: row.get(2)?,
            active_time: row.get(3)?,
            locked_time: row.get(4)?,
            camera_down_time: row.get(5)?,
            updated_at: parse_datetime(&row.get::<_, String>(6)?)?,
        })
    }
}
