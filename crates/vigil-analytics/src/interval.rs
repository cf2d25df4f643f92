use chrono::{Duration, NaiveDateTime};

use crate::event::{Event, EventKind};

/// A closed time range with `end >= start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    /// Returns `None` when `end` precedes `start`
    #[must_use]
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (end >= start).then_some(Self { start, end })
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Length of the intersection with `other`, zero when disjoint
    #[must_use]
    pub fn overlap(&self, other: &Self) -> Duration {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            end - start
        } else {
            Duration::zero()
        }
    }
}

/// Pair `start_kind`/`stop_kind` events into intervals.
///
/// A start opens an interval only if none is open; a stop closes the open
/// interval and is ignored otherwise. An interval still open at the end of the
/// log is closed at `open_end`. Events are consumed in append order.
#[must_use]
pub fn build_intervals(
    events: &[Event],
    start_kind: EventKind,
    stop_kind: EventKind,
    open_end: NaiveDateTime,
) -> Vec<Interval> {
    let mut intervals = Vec::new();
    let mut open: Option<NaiveDateTime> = None;

    for event in events {
        if event.kind == start_kind {
            if open.is_none() {
                open = Some(event.timestamp);
            }
        } else if event.kind == stop_kind {
            if let Some(start) = open.take() {
                // A stop stamped before its start (clock moved back) is dropped
                if let Some(interval) = Interval::new(start, event.timestamp) {
                    intervals.push(interval);
                }
            }
        }
    }

    if let Some(start) = open {
        intervals.push(Interval {
            start,
            end: open_end.max(start),
        });
    }

    intervals
}

#[must_use]
pub fn total_duration(intervals: &[Interval]) -> Duration {
    intervals
        .iter()
        .fold(Duration::zero(), |acc, i| acc + i.duration())
}

/// Sum of pairwise intersections between every `main` and every `sub` interval
#[must_use]
pub fn overlap_duration(main: &[Interval], sub: &[Interval]) -> Duration {
    main.iter()
        .flat_map(|m| sub.iter().map(move |s| m.overlap(s)))
        .fold(Duration::zero(), |acc, d| acc + d)
}
