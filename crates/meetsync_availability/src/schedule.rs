//! Standing weekly availability in a participant's local time.

use std::collections::BTreeMap;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use chrono_tz::Tz;
use meetsync_common::{validation_error, MeetsyncResult};
use meetsync_config::WeeklyRangeConfig;
use serde::{Deserialize, Serialize};

use crate::interval::{merge, Interval};

/// Wall-clock range within a day. An `end` at or before `start` runs into the
/// next day, so `00:00-00:00` is the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DayRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// The range on `date`, converted from `tz` to UTC.
    pub fn on(&self, date: NaiveDate, tz: Tz) -> Interval {
        let end_date = if self.end <= self.start {
            date.succ_opt().unwrap_or(date)
        } else {
            date
        };
        Interval::new(
            local_to_utc(tz, date.and_time(self.start)),
            local_to_utc(tz, end_date.and_time(self.end)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRange {
    pub weekday: Weekday,
    #[serde(flatten)]
    pub range: DayRange,
}

/// Ranges per weekday plus per-date replacements. A date override with no
/// ranges marks the day as unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(default)]
    pub ranges: Vec<WeeklyRange>,
    #[serde(default)]
    pub overrides: BTreeMap<NaiveDate, Vec<DayRange>>,
}

impl WeeklySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, weekday: Weekday, start: NaiveTime, end: NaiveTime) -> Self {
        self.ranges.push(WeeklyRange {
            weekday,
            range: DayRange::new(start, end),
        });
        self
    }

    pub fn with_override(mut self, date: NaiveDate, ranges: Vec<DayRange>) -> Self {
        self.overrides.insert(date, ranges);
        self
    }

    /// Builds a schedule from configured `Mon`..`Sun` / `HH:MM` entries.
    pub fn from_config(entries: &[WeeklyRangeConfig]) -> MeetsyncResult<Self> {
        let mut schedule = Self::new();
        for entry in entries {
            let weekday = entry
                .weekday
                .parse::<Weekday>()
                .map_err(|_| validation_error(format!("invalid weekday '{}'", entry.weekday)))?;
            schedule = schedule.with_range(
                weekday,
                parse_wall_clock(&entry.start)?,
                parse_wall_clock(&entry.end)?,
            );
        }
        Ok(schedule)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.overrides.values().all(Vec::is_empty)
    }

    /// Ranges that apply on `date`; a date override replaces the weekday ranges.
    pub fn ranges_on(&self, date: NaiveDate) -> Vec<DayRange> {
        if let Some(ranges) = self.overrides.get(&date) {
            return ranges.clone();
        }
        self.ranges
            .iter()
            .filter(|r| r.weekday == date.weekday())
            .map(|r| r.range)
            .collect()
    }

    /// Concrete UTC intervals inside `window`, with each local day resolved in
    /// `tz` so DST transitions shift the UTC result.
    pub fn expand(&self, window: Interval, tz: Tz) -> Vec<Interval> {
        if window.is_empty() {
            return Vec::new();
        }
        // Start a day early: an overnight range from the previous day can reach into the window
        let first = window.start.with_timezone(&tz).date_naive() - Duration::days(1);
        let last = window.end.with_timezone(&tz).date_naive();

        let mut intervals = Vec::new();
        for date in first.iter_days().take_while(|d| *d <= last) {
            for range in self.ranges_on(date) {
                if let Some(clipped) = range.on(date, tz).intersection(&window) {
                    intervals.push(clipped);
                }
            }
        }
        merge(&intervals)
    }
}

fn parse_wall_clock(value: &str) -> MeetsyncResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .map_err(|_| validation_error(format!("invalid wall clock time '{}'", value)))
}

/// Resolves a wall-clock time in `tz`. An ambiguous time takes its earlier
/// instant; a time inside a DST gap moves forward by an hour.
pub fn local_to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&local)),
    }
}
