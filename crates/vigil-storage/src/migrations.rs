use anyhow::Result;
use rusqlite::Connection;

/// Initialize database schema
///
/// # Errors
///
/// Returns an error if table creation fails
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Usage stats - one row per calendar day, upserted by the log analyzer
    conn.execute(
        "CREATE TABLE IF NOT EXISTS usage_stats (
            date TEXT PRIMARY KEY,
            total_monitored INTEGER NOT NULL DEFAULT 0,
            screen_time INTEGER NOT NULL DEFAULT 0,
            active_time INTEGER NOT NULL DEFAULT 0,
            locked_time INTEGER NOT NULL DEFAULT 0,
            camera_down_time INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}
