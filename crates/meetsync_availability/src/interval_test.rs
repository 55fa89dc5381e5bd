#[cfg(test)]
mod tests {
    use crate::interval::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 13, hour, minute, 0).unwrap()
    }

    fn iv(from: (u32, u32), to: (u32, u32)) -> Interval {
        Interval::new(at(from.0, from.1), at(to.0, to.1))
    }

    #[test]
    fn test_merge_sorts_and_coalesces() {
        let merged = merge(&[
            iv((13, 0), (14, 0)),
            iv((9, 0), (10, 0)),
            iv((9, 30), (11, 0)),
            iv((11, 0), (12, 0)), // touching
            iv((15, 0), (15, 0)), // empty
            iv((17, 0), (16, 0)), // inverted
        ]);
        assert_eq!(merged, vec![iv((9, 0), (12, 0)), iv((13, 0), (14, 0))]);
        assert!(merge(&[]).is_empty());
    }

    #[test]
    fn test_subtract_splits_into_two_pieces() {
        let remaining = subtract(&[iv((9, 0), (17, 0))], &[iv((12, 0), (13, 0))]);
        assert_eq!(remaining, vec![iv((9, 0), (12, 0)), iv((13, 0), (17, 0))]);
    }

    #[test]
    fn test_subtract_edges_and_full_cover() {
        let base = [iv((9, 0), (10, 0)), iv((11, 0), (12, 0))];
        // removal aligned with the start leaves no zero-length piece
        assert_eq!(
            subtract(&base, &[iv((9, 0), (9, 30))]),
            vec![iv((9, 30), (10, 0)), iv((11, 0), (12, 0))]
        );
        assert_eq!(subtract(&base, &[iv((8, 0), (13, 0))]), vec![]);
        // touching removals do not cut anything
        assert_eq!(subtract(&base, &[iv((10, 0), (11, 0))]), base.to_vec());
    }

    #[test]
    fn test_clip_discards_manual_outside_bounds() {
        let manual = [iv((8, 0), (10, 0)), iv((18, 0), (19, 0))];
        let bounds = [iv((9, 0), (17, 0))];
        assert_eq!(clip(&manual, &bounds), vec![iv((9, 0), (10, 0))]);
        assert_eq!(clip(&manual, &[]), manual.to_vec());
    }

    #[test]
    fn test_intersect_of_two_sets() {
        let a = [iv((9, 0), (12, 0)), iv((14, 0), (18, 0))];
        let b = [iv((11, 0), (15, 0)), iv((17, 0), (20, 0))];
        assert_eq!(
            intersect(&a, &b),
            vec![iv((11, 0), (12, 0)), iv((14, 0), (15, 0)), iv((17, 0), (18, 0))]
        );
        assert!(intersect(&a, &[]).is_empty());
    }

    #[test]
    fn test_total_duration_counts_overlap_once() {
        let total = total_duration(&[iv((9, 0), (10, 0)), iv((9, 30), (10, 30)), iv((12, 0), (12, 15))]);
        assert_eq!(total, Duration::minutes(105));
    }

    #[test]
    fn test_interval_predicates() {
        let morning = iv((9, 0), (12, 0));
        assert!(morning.overlaps(&iv((11, 0), (13, 0))));
        assert!(!morning.overlaps(&iv((12, 0), (13, 0))));
        assert!(morning.contains(at(9, 0)));
        assert!(!morning.contains(at(12, 0)));
        assert_eq!(iv((10, 0), (9, 0)).duration(), Duration::zero());
        assert_eq!(morning.intersection(&iv((12, 0), (13, 0))), None);
    }
}
