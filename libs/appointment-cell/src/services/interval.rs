//! Half-open time intervals and the slot walker shared by the single-day and
//! range generators.

use chrono::{DateTime, Duration, Timelike, Utc};

/// `[start, end)` over UTC instants. Construction enforces `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection with `window`, or `None` when they do not overlap.
    pub fn clip(&self, window: &Interval) -> Option<Interval> {
        Interval::new(self.start.max(window.start), self.end.min(window.end))
    }
}

/// Drop seconds and finer; slot arithmetic works on whole minutes.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Walk candidate starts of `step` length across `[window_start, window_end)`,
/// skipping past blocking intervals.
///
/// `busy` must be sorted by start. On a hit the cursor jumps to the blocker's
/// end (minute-truncated); a jump that is not strictly forward falls back to a
/// plain step so the walk always terminates.
pub fn walk_slots(
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    step: Duration,
    busy: &[Interval],
) -> Vec<DateTime<Utc>> {
    let mut slots = Vec::new();
    let mut cursor = truncate_to_minute(window_start);

    while cursor + step <= window_end {
        let candidate = Interval {
            start: cursor,
            end: cursor + step,
        };
        match busy.iter().find(|blocker| blocker.overlaps(&candidate)) {
            None => {
                slots.push(cursor);
                cursor += step;
            }
            Some(hit) => {
                let jump = truncate_to_minute(hit.end);
                cursor = if jump > cursor { jump } else { cursor + step };
            }
        }
    }

    slots
}
