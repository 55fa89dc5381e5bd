// --- File: crates/meetsync_office365/src/recurrence.rs ---
//! RRULE strings to Graph `patternedRecurrence` and back.
//!
//! Rules are parsed with the `rrule` crate; the subset Graph can express is
//! then mapped: `FREQ` from daily to yearly, `INTERVAL`, `COUNT`, `UNTIL`,
//! `BYDAY` (with ordinals for the relative monthly/yearly patterns), a single
//! `BYMONTHDAY` and a single `BYMONTH`. Anything else is a validation error.

use chrono::{Datelike, NaiveDate, Weekday};
use meetsync_common::{validation_error, MeetsyncResult};
use rrule::{Frequency, NWeekday, RRule, Unvalidated};

use crate::models::{PatternedRecurrence, RecurrencePattern, RecurrenceRange};

const WEEKDAYS: [(&str, &str); 7] = [
    ("MO", "monday"),
    ("TU", "tuesday"),
    ("WE", "wednesday"),
    ("TH", "thursday"),
    ("FR", "friday"),
    ("SA", "saturday"),
    ("SU", "sunday"),
];

const INDEXES: [(i16, &str); 5] = [
    (1, "first"),
    (2, "second"),
    (3, "third"),
    (4, "fourth"),
    (-1, "last"),
];

fn rrule_day(day: &str) -> Option<&'static str> {
    WEEKDAYS
        .iter()
        .find(|(_, d)| d.eq_ignore_ascii_case(day))
        .map(|(c, _)| *c)
}

fn weekday_name(day: Weekday) -> &'static str {
    WEEKDAYS[day.num_days_from_monday() as usize].1
}

/// Parses the value of an `RRULE:` line.
pub fn parse_rule(rule: &str) -> MeetsyncResult<RRule<Unvalidated>> {
    let body = rule.trim();
    let body = body
        .get(..6)
        .filter(|prefix| prefix.eq_ignore_ascii_case("RRULE:"))
        .map_or(body, |_| &body[6..]);
    body.parse::<RRule<Unvalidated>>()
        .map_err(|e| validation_error(format!("invalid RRULE {}: {}", rule, e)))
}

fn single<T: Copy + std::fmt::Display>(key: &str, values: &[T]) -> MeetsyncResult<Option<T>> {
    match values {
        [] => Ok(None),
        [value] => Ok(Some(*value)),
        _ => Err(validation_error(format!(
            "{} with several values cannot be expressed in Graph",
            key
        ))),
    }
}

fn unsupported_part(key: &str) -> meetsync_common::MeetsyncError {
    validation_error(format!("RRULE part {} cannot be expressed in Graph", key))
}

/// Translates one `RRULE:` line. `start` is the local start date of the
/// first occurrence and `time_zone` the meeting's IANA zone.
pub fn to_patterned_recurrence(
    rule: &str,
    start: NaiveDate,
    time_zone: &str,
) -> MeetsyncResult<PatternedRecurrence> {
    let parsed = parse_rule(rule)?;

    if !parsed.get_by_set_pos().is_empty() {
        return Err(unsupported_part("BYSETPOS"));
    }
    if !parsed.get_by_year_day().is_empty() {
        return Err(unsupported_part("BYYEARDAY"));
    }
    if !parsed.get_by_week_no().is_empty() {
        return Err(unsupported_part("BYWEEKNO"));
    }
    if !parsed.get_by_hour().is_empty()
        || !parsed.get_by_minute().is_empty()
        || !parsed.get_by_second().is_empty()
    {
        return Err(unsupported_part("BYHOUR/BYMINUTE/BYSECOND"));
    }

    let interval = u32::from(parsed.get_interval().max(1));
    let by_month_day = single("BYMONTHDAY", parsed.get_by_month_day())?
        .map(|day| {
            u32::try_from(day)
                .map_err(|_| validation_error(format!("BYMONTHDAY {} unsupported", day)))
        })
        .transpose()?;
    let by_month = single("BYMONTH", parsed.get_by_month())?.map(u32::from);

    let mut days = Vec::new();
    let mut ordinal = None;
    for by_day in parsed.get_by_weekday() {
        match by_day {
            NWeekday::Every(day) => days.push(weekday_name(*day).to_string()),
            NWeekday::Nth(n, day) => {
                ordinal.get_or_insert(*n);
                days.push(weekday_name(*day).to_string());
            }
        }
    }
    let index = match ordinal {
        Some(o) => Some(
            INDEXES
                .iter()
                .find(|(i, _)| *i == o)
                .map(|(_, name)| name.to_string())
                .ok_or_else(|| validation_error(format!("BYDAY ordinal {} unsupported", o)))?,
        ),
        None => None,
    };

    let pattern = match parsed.get_freq() {
        Frequency::Daily => RecurrencePattern {
            pattern_type: "daily".to_string(),
            interval,
            ..Default::default()
        },
        Frequency::Weekly => RecurrencePattern {
            pattern_type: "weekly".to_string(),
            interval,
            days_of_week: if days.is_empty() {
                vec![weekday_name(start.weekday()).to_string()]
            } else {
                days
            },
            ..Default::default()
        },
        Frequency::Monthly if !days.is_empty() => RecurrencePattern {
            pattern_type: "relativeMonthly".to_string(),
            interval,
            days_of_week: days,
            index: Some(index.unwrap_or_else(|| "first".to_string())),
            ..Default::default()
        },
        Frequency::Monthly => RecurrencePattern {
            pattern_type: "absoluteMonthly".to_string(),
            interval,
            day_of_month: Some(by_month_day.unwrap_or_else(|| start.day())),
            ..Default::default()
        },
        Frequency::Yearly if !days.is_empty() => RecurrencePattern {
            pattern_type: "relativeYearly".to_string(),
            interval,
            days_of_week: days,
            month: Some(by_month.unwrap_or_else(|| start.month())),
            index: Some(index.unwrap_or_else(|| "first".to_string())),
            ..Default::default()
        },
        Frequency::Yearly => RecurrencePattern {
            pattern_type: "absoluteYearly".to_string(),
            interval,
            day_of_month: Some(by_month_day.unwrap_or_else(|| start.day())),
            month: Some(by_month.unwrap_or_else(|| start.month())),
            ..Default::default()
        },
        other => {
            return Err(validation_error(format!(
                "FREQ={:?} cannot be expressed in Graph",
                other
            )))
        }
    };

    let start_date = start.format("%Y-%m-%d").to_string();
    let until = parsed.get_until().map(|at| at.date_naive());
    let range = match (parsed.get_count(), until) {
        (Some(n), _) => RecurrenceRange {
            range_type: "numbered".to_string(),
            start_date,
            number_of_occurrences: Some(n),
            recurrence_time_zone: Some(time_zone.to_string()),
            ..Default::default()
        },
        (None, Some(date)) => RecurrenceRange {
            range_type: "endDate".to_string(),
            start_date,
            end_date: Some(date.format("%Y-%m-%d").to_string()),
            recurrence_time_zone: Some(time_zone.to_string()),
            ..Default::default()
        },
        (None, None) => RecurrenceRange {
            range_type: "noEnd".to_string(),
            start_date,
            recurrence_time_zone: Some(time_zone.to_string()),
            ..Default::default()
        },
    };

    Ok(PatternedRecurrence { pattern, range })
}

/// Reverse mapping used when surfacing Graph series as unified events.
/// Patterns this module cannot produce yield `None`.
pub fn to_rrule(recurrence: &PatternedRecurrence) -> Option<String> {
    let pattern = &recurrence.pattern;
    let ordinal = pattern
        .index
        .as_deref()
        .and_then(|name| INDEXES.iter().find(|(_, n)| *n == name))
        .map(|(i, _)| i.to_string())
        .unwrap_or_default();
    let days = |prefix: &str| -> Option<String> {
        let codes: Option<Vec<String>> = pattern
            .days_of_week
            .iter()
            .map(|d| rrule_day(d).map(|code| format!("{}{}", prefix, code)))
            .collect();
        codes.map(|c| c.join(","))
    };

    let mut parts = match pattern.pattern_type.as_str() {
        "daily" => vec!["FREQ=DAILY".to_string()],
        "weekly" => vec!["FREQ=WEEKLY".to_string(), format!("BYDAY={}", days("")?)],
        "absoluteMonthly" => vec![
            "FREQ=MONTHLY".to_string(),
            format!("BYMONTHDAY={}", pattern.day_of_month?),
        ],
        "relativeMonthly" => vec![
            "FREQ=MONTHLY".to_string(),
            format!("BYDAY={}", days(&ordinal)?),
        ],
        "absoluteYearly" => vec![
            "FREQ=YEARLY".to_string(),
            format!("BYMONTH={}", pattern.month?),
            format!("BYMONTHDAY={}", pattern.day_of_month?),
        ],
        "relativeYearly" => vec![
            "FREQ=YEARLY".to_string(),
            format!("BYMONTH={}", pattern.month?),
            format!("BYDAY={}", days(&ordinal)?),
        ],
        _ => return None,
    };
    if pattern.interval > 1 {
        parts.push(format!("INTERVAL={}", pattern.interval));
    }

    let range = &recurrence.range;
    match range.range_type.as_str() {
        "numbered" => parts.push(format!("COUNT={}", range.number_of_occurrences?)),
        "endDate" => {
            let end = NaiveDate::parse_from_str(range.end_date.as_deref()?, "%Y-%m-%d").ok()?;
            parts.push(format!("UNTIL={}T235959Z", end.format("%Y%m%d")));
        }
        _ => {}
    }

    Some(format!("RRULE:{}", parts.join(";")))
}
