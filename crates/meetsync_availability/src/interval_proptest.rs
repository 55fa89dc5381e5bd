#[cfg(test)]
mod tests {
    use crate::interval::{intersect, merge, subtract, Interval};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    // Intervals on a minute grid within two days, zero-length ones included
    fn interval_strategy() -> impl Strategy<Value = Interval> {
        (0i64..2880, 0i64..240).prop_map(|(offset, length)| {
            let start = base() + Duration::minutes(offset);
            Interval::new(start, start + Duration::minutes(length))
        })
    }

    fn intervals_strategy() -> impl Strategy<Value = Vec<Interval>> {
        prop::collection::vec(interval_strategy(), 0..12)
    }

    fn covers(intervals: &[Interval], minute: i64) -> bool {
        let instant = base() + Duration::minutes(minute) + Duration::seconds(30);
        intervals.iter().any(|i| i.contains(instant))
    }

    proptest! {
        #[test]
        fn test_merge_is_idempotent(a in intervals_strategy()) {
            let once = merge(&a);
            prop_assert_eq!(merge(&once), once);
        }

        #[test]
        fn test_merge_result_is_sorted_and_disjoint(a in intervals_strategy()) {
            let merged = merge(&a);
            for pair in merged.windows(2) {
                // touching intervals would have been merged
                prop_assert!(pair[0].end < pair[1].start);
            }
            prop_assert!(merged.iter().all(|i| !i.is_empty()));
        }

        #[test]
        fn test_merge_of_union_covers_exactly_both(a in intervals_strategy(), b in intervals_strategy()) {
            let mut union = a.clone();
            union.extend_from_slice(&b);
            let merged = merge(&union);
            for minute in 0..(2880 + 240) {
                prop_assert_eq!(
                    covers(&merged, minute),
                    covers(&a, minute) || covers(&b, minute),
                    "minute {}", minute
                );
            }
        }

        #[test]
        fn test_subtract_never_overlaps_removals(a in intervals_strategy(), r in intervals_strategy()) {
            let remaining = subtract(&merge(&a), &r);
            for kept in &remaining {
                prop_assert!(!kept.is_empty());
                for removed in &r {
                    prop_assert!(!kept.overlaps(removed), "{:?} overlaps {:?}", kept, removed);
                }
            }
        }

        #[test]
        fn test_subtract_keeps_everything_not_removed(a in intervals_strategy(), r in intervals_strategy()) {
            let remaining = subtract(&a, &r);
            for minute in 0..(2880 + 240) {
                prop_assert_eq!(
                    covers(&remaining, minute),
                    covers(&a, minute) && !covers(&r, minute)
                );
            }
        }

        #[test]
        fn test_intersect_is_commutative(a in intervals_strategy(), b in intervals_strategy()) {
            prop_assert_eq!(intersect(&a, &b), intersect(&b, &a));
        }
    }
}
