//! Half-open time intervals and the set operations availability is built from.
//!
//! Every function takes interval lists in any order and returns a merged list:
//! sorted by start, non-overlapping, with no empty members.

use chrono::{DateTime, Duration, Utc};
use meetsync_common::models::{EventBusyDate, TimeSlotSource};
use serde::{Deserialize, Serialize};

/// `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Zero-length and inverted intervals cover nothing.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration(&self) -> Duration {
        if self.is_empty() {
            Duration::zero()
        } else {
            self.end - self.start
        }
    }

    /// True when the intervals share a non-empty span. Touching intervals do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Overlap of the two intervals, `None` when they do not overlap.
    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let overlap = Interval::new(self.start.max(other.start), self.end.min(other.end));
        (!overlap.is_empty()).then_some(overlap)
    }
}

impl From<&EventBusyDate> for Interval {
    fn from(busy: &EventBusyDate) -> Self {
        Interval::new(busy.start, busy.end)
    }
}

/// An interval tagged with where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: TimeSlotSource,
}

impl TimeSlot {
    pub fn new(interval: Interval, source: TimeSlotSource) -> Self {
        Self {
            start: interval.start,
            end: interval.end,
            source,
        }
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.start, self.end)
    }
}

impl From<&EventBusyDate> for TimeSlot {
    fn from(busy: &EventBusyDate) -> Self {
        TimeSlot::new(busy.into(), busy.source)
    }
}

/// Sorts and coalesces overlapping intervals. Touching intervals
/// (`end == next.start`) are merged too; empty intervals are dropped.
pub fn merge(intervals: &[Interval]) -> Vec<Interval> {
    let mut sorted: Vec<Interval> = intervals.iter().filter(|i| !i.is_empty()).copied().collect();
    sorted.sort_by_key(|i| i.start);

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Removes every `removals` span from `base`. Each overlapped base interval is
/// split into at most a piece before and a piece after the removed span.
pub fn subtract(base: &[Interval], removals: &[Interval]) -> Vec<Interval> {
    let removals = merge(removals);
    let mut remaining = merge(base);

    for removal in &removals {
        let mut next = Vec::with_capacity(remaining.len() + 1);
        for interval in remaining {
            if !interval.overlaps(removal) {
                next.push(interval);
                continue;
            }
            let before = Interval::new(interval.start, removal.start);
            let after = Interval::new(removal.end, interval.end);
            if !before.is_empty() {
                next.push(before);
            }
            if !after.is_empty() {
                next.push(after);
            }
        }
        remaining = next;
    }
    remaining
}

/// Keeps the parts of `intervals` that fall inside `bounds`. Without bounds
/// the intervals are returned merged and unchanged.
pub fn clip(intervals: &[Interval], bounds: &[Interval]) -> Vec<Interval> {
    if bounds.is_empty() {
        return merge(intervals);
    }
    intersect(intervals, bounds)
}

/// Points covered by both sets.
pub fn intersect(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let a = merge(a);
    let b = merge(b);

    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if let Some(overlap) = a[i].intersection(&b[j]) {
            result.push(overlap);
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    merge(&result)
}

/// Covered time, counting overlapping spans once.
pub fn total_duration(intervals: &[Interval]) -> Duration {
    merge(intervals)
        .iter()
        .fold(Duration::zero(), |total, i| total + i.duration())
}
