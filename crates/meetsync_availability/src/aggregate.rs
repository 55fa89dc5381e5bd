//! Free time of one participant over a window.

use chrono::{Datelike, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use meetsync_common::{validation_error, MeetsyncResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::interval::{clip, intersect, merge, subtract, Interval};
use crate::schedule::{local_to_utc, WeeklySchedule};

/// Explicit per-slot corrections a participant made to computed availability.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailabilityOverrides {
    #[serde(default)]
    pub additions: Vec<Interval>,
    #[serde(default)]
    pub removals: Vec<Interval>,
}

impl AvailabilityOverrides {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Unions the additions into `free` and subtracts the removals, returning
    /// the new free map and the busy set with the additions retracted.
    pub fn apply(&self, free: &[Interval], busy: &[Interval]) -> (Vec<Interval>, Vec<Interval>) {
        let busy = subtract(busy, &self.additions);

        let mut combined = free.to_vec();
        combined.extend_from_slice(&self.additions);
        let free = subtract(&merge(&combined), &self.removals);

        (free, busy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantAvailabilityInput {
    /// Intervals the participant submitted explicitly, e.g. a poll response.
    #[serde(default)]
    pub manual: Vec<Interval>,
    #[serde(default)]
    pub default_schedule: Option<WeeklySchedule>,
    /// Busy intervals reported by connected calendars.
    #[serde(default)]
    pub busy: Vec<Interval>,
    #[serde(default)]
    pub overrides: AvailabilityOverrides,
    #[serde(default)]
    pub has_connected_account: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantAvailability {
    pub free: Vec<Interval>,
    /// Busy intervals inside the window after additions were retracted.
    pub busy: Vec<Interval>,
}

/// Computes free time inside `window`, expanding the default schedule in `tz`.
///
/// The base is chosen as follows:
/// * a connected account with a default schedule uses the manual intervals
///   clipped to the schedule, or the schedule itself when nothing manual exists
/// * otherwise manual intervals, else the default schedule
/// * otherwise the whole window when busy data exists, else nothing
///
/// Busy time is subtracted from the base, then the overrides are applied:
/// additions survive any busy overlap and removals win over free time.
pub fn compute_free_time(
    input: &ParticipantAvailabilityInput,
    window: Interval,
    tz: Tz,
) -> ParticipantAvailability {
    let bounds = [window];
    let manual = intersect(&input.manual, &bounds);
    let busy = intersect(&input.busy, &bounds);
    let default = input
        .default_schedule
        .as_ref()
        .map(|schedule| schedule.expand(window, tz))
        .unwrap_or_default();

    let base = if input.has_connected_account && !default.is_empty() {
        if manual.is_empty() {
            default
        } else {
            clip(&manual, &default)
        }
    } else if !manual.is_empty() {
        manual
    } else if !default.is_empty() {
        default
    } else if !busy.is_empty() {
        vec![window]
    } else {
        Vec::new()
    };

    let free = merge(&subtract(&base, &busy));
    let overrides = AvailabilityOverrides {
        additions: intersect(&input.overrides.additions, &bounds),
        removals: input.overrides.removals.clone(),
    };
    let (free, busy) = overrides.apply(&free, &busy);

    debug!(
        "free time in {} - {}: {} intervals, {} busy",
        window.start,
        window.end,
        free.len(),
        busy.len()
    );
    ParticipantAvailability { free, busy }
}

/// The calendar month `year`-`month` as local midnights in `tz`.
pub fn month_window(year: i32, month: u32, tz: Tz) -> MeetsyncResult<Interval> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| validation_error(format!("invalid month {}-{}", year, month)))?;
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| validation_error(format!("month {}-{} has no successor", year, month)))?;

    Ok(Interval::new(
        local_to_utc(tz, first.and_time(NaiveTime::MIN)),
        local_to_utc(tz, next.and_time(NaiveTime::MIN)),
    ))
}
