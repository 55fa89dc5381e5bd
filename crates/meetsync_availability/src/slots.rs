//! Meeting slot search over free maps.
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use meetsync_availability::{find_available_slots, Interval};
//!
//! let nine = Utc.with_ymd_and_hms(2030, 5, 15, 9, 0, 0).unwrap();
//! let free = [Interval::new(nine, nine + Duration::hours(2))];
//! let slots =
//!     find_available_slots(&free, Duration::hours(1), Duration::minutes(30), Duration::zero())
//!         .unwrap();
//! assert_eq!(slots.len(), 2);
//! assert_eq!(slots[1].start, nine + Duration::hours(1));
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use meetsync_common::{validation_error, MeetsyncResult};
use tracing::debug;

use crate::interval::{intersect, merge, Interval};

/// Candidate meeting slots of `duration` inside the free intervals.
///
/// Candidates start on `step` boundaries (counted from the Unix epoch, so a
/// 15 minute step yields quarter hours). After a slot the search resumes once
/// `buffer` has passed, so consecutive slots never sit closer than `buffer`.
pub fn find_available_slots(
    free: &[Interval],
    duration: Duration,
    step: Duration,
    buffer: Duration,
) -> MeetsyncResult<Vec<Interval>> {
    if duration <= Duration::zero() {
        return Err(validation_error("slot duration must be positive"));
    }
    if step <= Duration::zero() {
        return Err(validation_error("slot step must be positive"));
    }
    let buffer = buffer.max(Duration::zero());

    let mut slots = Vec::new();
    for interval in merge(free) {
        let mut current = align_up(interval.start, step);
        loop {
            let Some(end) = current.checked_add_signed(duration) else {
                break;
            };
            if end > interval.end {
                break;
            }
            slots.push(Interval::new(current, end));
            let Some(resume) = end.checked_add_signed(buffer) else {
                break;
            };
            current = align_up(resume, step);
        }
    }

    debug!(
        "found {} slots of {} minutes in {} free intervals",
        slots.len(),
        duration.num_minutes(),
        free.len()
    );
    Ok(slots)
}

/// Time free for every participant. No participants means no common time.
pub fn common_free_time(free_maps: &[Vec<Interval>]) -> Vec<Interval> {
    let Some((first, rest)) = free_maps.split_first() else {
        return Vec::new();
    };
    rest.iter()
        .fold(merge(first), |common, free| intersect(&common, free))
}

/// Slots every participant can attend.
pub fn find_common_slots(
    free_maps: &[Vec<Interval>],
    duration: Duration,
    step: Duration,
    buffer: Duration,
) -> MeetsyncResult<Vec<Interval>> {
    find_available_slots(&common_free_time(free_maps), duration, step, buffer)
}

fn align_up(instant: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let step_secs = step.num_seconds().max(1);
    let secs = instant.timestamp();
    let aligned = if instant.timestamp_subsec_nanos() == 0 && secs.rem_euclid(step_secs) == 0 {
        secs
    } else {
        secs - secs.rem_euclid(step_secs) + step_secs
    };
    Utc.timestamp_opt(aligned, 0).single().unwrap_or(instant)
}
