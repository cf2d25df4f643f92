//! Helper utility functions for CLI commands

/// Render whole seconds as `HH:MM:SS`
pub fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// `part` as a percentage of `whole`, one decimal
pub fn percentage(part: u32, whole: u32) -> String {
    if whole == 0 {
        return String::from("-");
    }
    format!("{:.1}%", f64::from(part) / f64::from(whole) * 100.0)
}
