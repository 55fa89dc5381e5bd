//! iCalendar reading and in-place rewriting.
//!
//! Everything goes through the `icalendar` parser. Writes that must leave the
//! rest of a stored resource untouched (RSVP, private properties, recurrence
//! overrides) edit the parsed component tree and print it again, so
//! properties this crate does not model survive the round trip.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::parser::{read_calendar, unfold, Calendar, Component, Parameter, Property};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use meetsync_common::{parse_error, validation_error, MeetsyncResult};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum IcsTime {
    Date(NaiveDate),
    Utc(DateTime<Utc>),
    Floating(NaiveDateTime),
    Zoned { date_time: NaiveDateTime, tzid: String },
}

impl IcsTime {
    /// Instant of this time. Floating and all-day values, and zones that do
    /// not resolve, are read in `zone`.
    pub fn resolve(&self, zone: Tz) -> DateTime<Utc> {
        match self {
            IcsTime::Utc(at) => *at,
            IcsTime::Date(day) => local_instant(day.and_time(NaiveTime::MIN), zone),
            IcsTime::Floating(local) => local_instant(*local, zone),
            IcsTime::Zoned { date_time, tzid } => {
                local_instant(*date_time, parse_tzid(tzid).unwrap_or(zone))
            }
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, IcsTime::Date(_))
    }
}

impl From<DatePerhapsTime> for IcsTime {
    fn from(value: DatePerhapsTime) -> Self {
        match value {
            DatePerhapsTime::Date(day) => IcsTime::Date(day),
            DatePerhapsTime::DateTime(CalendarDateTime::Utc(at)) => IcsTime::Utc(at),
            DatePerhapsTime::DateTime(CalendarDateTime::Floating(local)) => IcsTime::Floating(local),
            DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
                IcsTime::Zoned { date_time, tzid }
            }
        }
    }
}

/// Local wall time to an instant. Times skipped by a DST jump move forward by
/// the size of the gap.
fn local_instant(local: NaiveDateTime, zone: Tz) -> DateTime<Utc> {
    zone.from_local_datetime(&local)
        .earliest()
        .or_else(|| zone.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| local.and_utc())
}

/// IANA zone of a `TZID`, also accepting vendor prefixes such as
/// `/citadel.org/20190101_1/Europe/Berlin`.
pub fn parse_tzid(tzid: &str) -> Option<Tz> {
    let tzid = tzid.trim_matches('"');
    if let Ok(zone) = tzid.parse::<Tz>() {
        return Some(zone);
    }
    let mut parts = tzid.rsplit('/');
    let city = parts.next()?;
    let region = parts.next()?;
    format!("{}/{}", region, city).parse().ok()
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IcsAttendee {
    pub email: String,
    pub name: Option<String>,
    pub partstat: Option<String>,
}

/// The parts of a VEVENT the adapter reads.
#[derive(Debug, Clone, PartialEq)]
pub struct IcsEvent {
    pub uid: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub start: IcsTime,
    pub end: Option<IcsTime>,
    pub duration: Option<Duration>,
    pub status: Option<String>,
    pub transparent: bool,
    /// `RRULE`, `RDATE` and `EXDATE` lines as written in the resource.
    pub rules: Vec<String>,
    pub recurrence_id: Option<IcsTime>,
    pub sequence: Option<u32>,
    pub organizer: Option<IcsAttendee>,
    pub attendees: Vec<IcsAttendee>,
    /// All `X-` properties by name.
    pub x_props: BTreeMap<String, String>,
}

impl IcsEvent {
    /// End instant. A missing end means a one day event for dates and a zero
    /// length event otherwise.
    pub fn end_instant(&self, zone: Tz) -> DateTime<Utc> {
        let start = self.start.resolve(zone);
        match (&self.end, self.duration) {
            (Some(end), _) => end.resolve(zone),
            (None, Some(duration)) => start + duration,
            (None, None) if self.start.is_date() => start + Duration::days(1),
            (None, None) => start,
        }
    }

    pub fn attendee(&self, email: &str) -> Option<&IcsAttendee> {
        self.attendees
            .iter()
            .find(|a| a.email.trim().eq_ignore_ascii_case(email.trim()))
    }

    pub fn is_override(&self) -> bool {
        self.recurrence_id.is_some()
    }
}

/// Every VEVENT of an iCalendar object. Components without a UID or start
/// are skipped.
pub fn parse_events(content: &str) -> MeetsyncResult<Vec<IcsEvent>> {
    let unfolded = unfold(content);
    let calendar = read(&unfolded)?;

    let mut found = Vec::new();
    find_components(&calendar.components, "VEVENT", &mut found);
    Ok(found.into_iter().filter_map(read_event).collect())
}

/// Master VEVENT of a resource, or its first VEVENT when only overrides are
/// stored.
pub fn master_event(events: &[IcsEvent]) -> Option<&IcsEvent> {
    events
        .iter()
        .find(|e| !e.is_override())
        .or_else(|| events.first())
}

/// Busy periods of every VFREEBUSY component. `FBTYPE=FREE` periods are
/// skipped.
pub fn parse_free_busy(content: &str) -> MeetsyncResult<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded)
        .map_err(|e| parse_error(format!("invalid free-busy data: {}", e)))?;

    let mut found = Vec::new();
    find_components(&calendar.components, "VFREEBUSY", &mut found);

    let mut periods = Vec::new();
    for component in found {
        for prop in component.properties.iter().filter(|p| p.name == "FREEBUSY") {
            if param(prop, "FBTYPE").is_some_and(|t| t.eq_ignore_ascii_case("FREE")) {
                continue;
            }
            for period in prop.val.as_ref().split(',') {
                match parse_period(period.trim()) {
                    Some(p) => periods.push(p),
                    None => debug!("Skipping unreadable FREEBUSY period {}", period),
                }
            }
        }
    }
    Ok(periods)
}

fn read(unfolded: &str) -> MeetsyncResult<Calendar<'_>> {
    read_calendar(unfolded).map_err(|e| parse_error(format!("invalid iCalendar data: {}", e)))
}

fn find_components<'c, 'a>(
    components: &'c [Component<'a>],
    name: &str,
    found: &mut Vec<&'c Component<'a>>,
) {
    for component in components {
        if component.name == name {
            found.push(component);
        } else if component.name == "VCALENDAR" {
            find_components(&component.components, name, found);
        }
    }
}

fn read_event(vevent: &Component) -> Option<IcsEvent> {
    let Some(uid) = vevent.find_prop("UID").map(|p| p.val.to_string()) else {
        debug!("Skipping VEVENT without UID");
        return None;
    };
    let start = match vevent.find_prop("DTSTART").map(DatePerhapsTime::try_from) {
        Some(Ok(start)) => IcsTime::from(start),
        _ => {
            debug!("Skipping VEVENT {} without a readable DTSTART", uid);
            return None;
        }
    };

    let time = |name: &str| {
        vevent
            .find_prop(name)
            .and_then(|p| DatePerhapsTime::try_from(p).ok())
            .map(IcsTime::from)
    };

    Some(IcsEvent {
        summary: text_prop(vevent, "SUMMARY"),
        description: text_prop(vevent, "DESCRIPTION"),
        location: text_prop(vevent, "LOCATION"),
        url: text_prop(vevent, "URL"),
        end: time("DTEND"),
        duration: vevent
            .find_prop("DURATION")
            .and_then(|p| parse_duration(p.val.as_ref())),
        recurrence_id: time("RECURRENCE-ID"),
        status: vevent
            .find_prop("STATUS")
            .map(|p| p.val.as_ref().to_ascii_uppercase()),
        transparent: vevent
            .find_prop("TRANSP")
            .is_some_and(|p| p.val.as_ref().eq_ignore_ascii_case("TRANSPARENT")),
        rules: vevent
            .properties
            .iter()
            .filter(|p| p.name == "RRULE" || p.name == "RDATE" || p.name == "EXDATE")
            .map(render_property)
            .collect(),
        sequence: vevent
            .find_prop("SEQUENCE")
            .and_then(|p| p.val.as_ref().trim().parse().ok()),
        organizer: vevent.find_prop("ORGANIZER").map(read_attendee),
        attendees: vevent
            .properties
            .iter()
            .filter(|p| p.name == "ATTENDEE")
            .map(read_attendee)
            .collect(),
        x_props: vevent
            .properties
            .iter()
            .filter(|p| p.name.as_ref().starts_with("X-"))
            .map(|p| (p.name.to_string(), unescape_text(p.val.as_ref())))
            .collect(),
        uid,
        start,
    })
}

fn text_prop(component: &Component, name: &str) -> Option<String> {
    component
        .find_prop(name)
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|v| !v.trim().is_empty())
}

fn read_attendee(prop: &Property) -> IcsAttendee {
    IcsAttendee {
        email: strip_mailto(prop.val.as_ref()).to_string(),
        name: param(prop, "CN"),
        partstat: param(prop, "PARTSTAT").map(|s| s.to_ascii_uppercase()),
    }
}

fn param(prop: &Property, key: &str) -> Option<String> {
    prop.params
        .iter()
        .find(|p| p.key.as_ref().eq_ignore_ascii_case(key))
        .and_then(|p| p.val.as_ref())
        .map(|v| v.as_ref().trim_matches('"').to_string())
}

/// The property as a content line, unfolded.
fn render_property(prop: &Property) -> String {
    let mut line = prop.name.to_string();
    for p in &prop.params {
        match p.val.as_ref() {
            Some(value) if value.as_ref().contains([':', ';', ',']) => {
                line.push_str(&format!(";{}=\"{}\"", p.key, value.as_ref().trim_matches('"')))
            }
            Some(value) => line.push_str(&format!(";{}={}", p.key, value)),
            None => line.push_str(&format!(";{}", p.key)),
        }
    }
    line.push(':');
    line.push_str(prop.val.as_ref());
    line
}

pub fn strip_mailto(value: &str) -> &str {
    let value = value.trim();
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => &value[7..],
        _ => value,
    }
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// `start/end` or `start/duration` in UTC basic format.
fn parse_period(period: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (start, rest) = period.split_once('/')?;
    let start = parse_utc(start)?;
    let end = if rest.starts_with('P') || rest.starts_with("+P") {
        start + parse_duration(rest)?
    } else {
        parse_utc(rest)?
    };
    (end > start).then_some((start, end))
}

fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim().trim_end_matches('Z'), "%Y%m%dT%H%M%S")
        .ok()
        .map(|local| local.and_utc())
}

/// RFC 5545 duration such as `PT1H30M`, `P1D` or `-PT15M`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (negative, value) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let parsed: std::time::Duration = iso8601::duration(value).ok()?.into();
    let total = Duration::from_std(parsed).ok()?;
    Some(if negative { -total } else { total })
}

/// One property line such as `EXDATE;TZID=Europe/Berlin:...`, read through
/// the iCalendar parser. Returns the upper-cased name with the property.
pub fn parse_property_line(line: &str) -> Option<(String, icalendar::Property)> {
    let wrapped = unfold(&format!("BEGIN:VEVENT\r\n{}\r\nEND:VEVENT\r\n", line.trim()));
    let calendar = read_calendar(&wrapped).ok()?;
    let prop = calendar.components.first()?.properties.first()?;

    let name = prop.name.as_ref().to_ascii_uppercase();
    let mut owned = icalendar::Property::new(&name, prop.val.as_ref());
    for p in &prop.params {
        if let Some(value) = p.val.as_ref() {
            owned.add_parameter(p.key.as_ref(), value.as_ref().trim_matches('"'));
        }
    }
    Some((name, owned))
}

fn events_mut<'c, 'a>(components: &'c mut [Component<'a>], found: &mut Vec<&'c mut Component<'a>>) {
    for component in components.iter_mut() {
        if component.name == "VEVENT" {
            found.push(component);
        } else if component.name == "VCALENDAR" {
            events_mut(&mut component.components, found);
        }
    }
}

fn is_override(component: &Component) -> bool {
    component.find_prop("RECURRENCE-ID").is_some()
}

fn set_param<'a>(prop: &mut Property<'a>, key: &'a str, value: &'a str) {
    match prop
        .params
        .iter_mut()
        .find(|p| p.key.as_ref().eq_ignore_ascii_case(key))
    {
        Some(param) => param.val = Some(value.into()),
        None => prop.params.push(Parameter {
            key: key.into(),
            val: Some(value.into()),
        }),
    }
}

/// Sets `PARTSTAT` on every ATTENDEE addressed to `email`, in the master
/// and in all overrides. The address keeps the casing stored on the server.
/// `None` when no attendee matches.
pub fn set_partstat(content: &str, email: &str, partstat: &str) -> MeetsyncResult<Option<String>> {
    let unfolded = unfold(content);
    let mut calendar = read(&unfolded)?;
    let mut events = Vec::new();
    events_mut(&mut calendar.components, &mut events);

    let mut matched = false;
    for vevent in events {
        for prop in vevent.properties.iter_mut().filter(|p| p.name == "ATTENDEE") {
            if !strip_mailto(prop.val.as_ref()).eq_ignore_ascii_case(email.trim()) {
                continue;
            }
            set_param(prop, "PARTSTAT", partstat);
            if partstat != "NEEDS-ACTION" {
                prop.params.retain(|p| !p.key.as_ref().eq_ignore_ascii_case("RSVP"));
            }
            matched = true;
        }
    }
    Ok(matched.then(|| calendar.to_string()))
}

/// Replaces or appends `properties` (name, value) on the master VEVENT.
pub fn set_properties(content: &str, properties: &[(String, String)]) -> MeetsyncResult<String> {
    let unfolded = unfold(content);
    let mut calendar = read(&unfolded)?;
    let mut events = Vec::new();
    events_mut(&mut calendar.components, &mut events);

    let position = events.iter().position(|e| !is_override(e)).unwrap_or(0);
    let master = events
        .into_iter()
        .nth(position)
        .ok_or_else(|| validation_error("iCalendar object has no VEVENT"))?;

    for (name, value) in properties {
        match master
            .properties
            .iter_mut()
            .find(|p| p.name.as_ref().eq_ignore_ascii_case(name))
        {
            Some(existing) => {
                existing.val = value.as_str().into();
                existing.params.clear();
            }
            None => master.properties.push(Property {
                name: name.as_str().into(),
                val: value.as_str().into(),
                params: Vec::new(),
            }),
        }
    }
    Ok(calendar.to_string())
}

/// The VEVENTs that carry a `RECURRENCE-ID`, each printed as a component.
pub fn recurrence_overrides(content: &str) -> MeetsyncResult<Vec<String>> {
    let unfolded = unfold(content);
    let calendar = read(&unfolded)?;
    let mut found = Vec::new();
    find_components(&calendar.components, "VEVENT", &mut found);
    Ok(found
        .into_iter()
        .filter(|c| is_override(c))
        .map(|c| c.to_string())
        .collect())
}

/// Adds printed components to the VCALENDAR of `content`.
pub fn append_components(content: &str, components: &[String]) -> MeetsyncResult<String> {
    if components.is_empty() {
        return Ok(content.to_string());
    }
    let unfolded = unfold(content);
    let extra: Vec<String> = components.iter().map(|c| unfold(c)).collect();
    let mut calendar = read(&unfolded)?;

    let mut parsed = Vec::new();
    for component in &extra {
        parsed.extend(read(component)?.components);
    }
    match calendar
        .components
        .iter_mut()
        .find(|c| c.name == "VCALENDAR")
    {
        Some(vcalendar) => vcalendar.components.extend(parsed),
        None => calendar.components.extend(parsed),
    }
    Ok(calendar.to_string())
}
