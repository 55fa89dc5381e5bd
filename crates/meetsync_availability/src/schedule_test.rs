#[cfg(test)]
mod tests {
    use crate::interval::Interval;
    use crate::schedule::*;
    use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
    use chrono_tz::Tz;
    use meetsync_config::WeeklyRangeConfig;

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn working_week() -> WeeklySchedule {
        [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
            .into_iter()
            .fold(WeeklySchedule::new(), |schedule, day| {
                schedule.with_range(day, time(9, 0), time(17, 0))
            })
    }

    #[test]
    fn test_expand_working_week_in_local_time() {
        let berlin: Tz = "Europe/Berlin".parse().unwrap();
        // Monday 2030-05-13, CEST
        let start = Utc.with_ymd_and_hms(2030, 5, 13, 0, 0, 0).unwrap();
        let window = Interval::new(start, start + Duration::days(7));

        let intervals = working_week().expand(window, berlin);
        assert_eq!(intervals.len(), 5);
        assert_eq!(intervals[0].start, Utc.with_ymd_and_hms(2030, 5, 13, 7, 0, 0).unwrap());
        assert_eq!(intervals[0].end, Utc.with_ymd_and_hms(2030, 5, 13, 15, 0, 0).unwrap());
        assert_eq!(intervals[4].start, Utc.with_ymd_and_hms(2030, 5, 17, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_expand_follows_dst_change() {
        let berlin: Tz = "Europe/Berlin".parse().unwrap();
        let daily = [Weekday::Sat, Weekday::Sun]
            .into_iter()
            .fold(WeeklySchedule::new(), |s, day| s.with_range(day, time(9, 0), time(10, 0)));
        // Clocks go forward on Sunday 2030-03-31
        let window = Interval::new(
            Utc.with_ymd_and_hms(2030, 3, 30, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 4, 1, 0, 0, 0).unwrap(),
        );

        let intervals = daily.expand(window, berlin);
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].start, Utc.with_ymd_and_hms(2030, 3, 30, 8, 0, 0).unwrap());
        assert_eq!(intervals[1].start, Utc.with_ymd_and_hms(2030, 3, 31, 7, 0, 0).unwrap());
    }

    #[test]
    fn test_overnight_range_reaches_into_window() {
        let schedule = WeeklySchedule::new().with_range(Weekday::Sun, time(22, 0), time(2, 0));
        // Monday 2030-05-13, the window starts after the range began
        let window = Interval::new(
            Utc.with_ymd_and_hms(2030, 5, 13, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 5, 14, 0, 0, 0).unwrap(),
        );

        let intervals = schedule.expand(window, Tz::UTC);
        assert_eq!(
            intervals,
            vec![Interval::new(
                window.start,
                Utc.with_ymd_and_hms(2030, 5, 13, 2, 0, 0).unwrap()
            )]
        );
    }

    #[test]
    fn test_date_overrides_replace_weekday_ranges() {
        let monday = NaiveDate::from_ymd_opt(2030, 5, 13).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2030, 5, 14).unwrap();
        let schedule = working_week()
            .with_override(monday, vec![])
            .with_override(tuesday, vec![DayRange::new(time(13, 0), time(14, 0))]);

        assert!(schedule.ranges_on(monday).is_empty());
        let start = Utc.with_ymd_and_hms(2030, 5, 13, 0, 0, 0).unwrap();
        let intervals = schedule.expand(Interval::new(start, start + Duration::days(2)), Tz::UTC);
        assert_eq!(
            intervals,
            vec![Interval::new(
                Utc.with_ymd_and_hms(2030, 5, 14, 13, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2030, 5, 14, 14, 0, 0).unwrap()
            )]
        );
    }

    #[test]
    fn test_from_config() {
        let entries = vec![
            WeeklyRangeConfig {
                weekday: "Mon".to_string(),
                start: "08:30".to_string(),
                end: "12:00".to_string(),
            },
            WeeklyRangeConfig {
                weekday: "friday".to_string(),
                start: "13:00:00".to_string(),
                end: "16:00".to_string(),
            },
        ];
        let schedule = WeeklySchedule::from_config(&entries).unwrap();
        assert_eq!(schedule.ranges.len(), 2);
        assert_eq!(schedule.ranges[0].weekday, Weekday::Mon);
        assert_eq!(schedule.ranges[0].range.start, time(8, 30));
        assert_eq!(schedule.ranges[1].weekday, Weekday::Fri);

        let bad_day = vec![WeeklyRangeConfig {
            weekday: "Someday".to_string(),
            start: "08:00".to_string(),
            end: "09:00".to_string(),
        }];
        assert!(WeeklySchedule::from_config(&bad_day).is_err());

        let bad_time = vec![WeeklyRangeConfig {
            weekday: "Mon".to_string(),
            start: "8am".to_string(),
            end: "09:00".to_string(),
        }];
        assert!(WeeklySchedule::from_config(&bad_time).is_err());
    }

    #[test]
    fn test_local_time_in_dst_gap_moves_forward() {
        let berlin: Tz = "Europe/Berlin".parse().unwrap();
        let gap = NaiveDate::from_ymd_opt(2030, 3, 31).unwrap().and_time(time(2, 30));
        assert_eq!(
            local_to_utc(berlin, gap),
            Utc.with_ymd_and_hms(2030, 3, 31, 1, 30, 0).unwrap()
        );
    }
}
