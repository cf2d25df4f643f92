pub mod analyzer;
pub mod event;
pub mod interval;

pub use analyzer::{compute_usage, log_file_path, AnalyzerError, UsageAnalyzer, UsageSink, UsageTotals};
pub use event::{Event, EventKind, EventParser};
pub use interval::{build_intervals, overlap_duration, total_duration, Interval};
