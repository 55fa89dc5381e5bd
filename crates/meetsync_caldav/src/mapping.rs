//! Conversions between MeetSync models and iCalendar VEVENTs.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use icalendar::{Alarm, Calendar, Component, EventLike, Property, Trigger};
use meetsync_common::models::{
    emails_match, AdditionalEventInfo, Attendee, CalendarProvider, EventBusyDate, EventStatus,
    MeetingDetails, NewCalendarEvent, ParticipationStatus, RecurrenceInfo, UnifiedEvent,
};
use meetsync_common::services::{MEETING_ID_KEY, MEETING_URL_KEY, UPDATED_BY_KEY, UPDATED_BY_MARKER};
use meetsync_common::{validation_error, MeetsyncResult};
use std::collections::BTreeMap;

use crate::ics::{parse_property_line, IcsEvent};

pub const PROVIDER: &str = "caldav";

/// Prefix of the private properties written to every VEVENT.
const X_PREFIX: &str = "X-MEETSYNC-";

const OWNER_KEY: &str = "ownerAccount";
const REQUESTED_AT_KEY: &str = "requestedAt";

/// Recurrence properties accepted in [`MeetingDetails::recurrence`].
const RECURRENCE_PROPERTIES: [&str; 4] = ["RRULE", "EXRULE", "RDATE", "EXDATE"];

/// `meetingId` -> `X-MEETSYNC-MEETING-ID`
pub fn x_property_name(key: &str) -> String {
    let mut name = String::from(X_PREFIX);
    let mut previous_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() && previous_lower {
            name.push('-');
        }
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_uppercase());
        } else {
            name.push('-');
        }
        previous_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
    }
    name
}

/// `X-MEETSYNC-MEETING-ID` -> `meetingId`. `None` for foreign properties.
pub fn extension_key(name: &str) -> Option<String> {
    let rest = name.to_ascii_uppercase().strip_prefix(X_PREFIX)?.to_string();
    let mut key = String::new();
    for (i, word) in rest.split('-').filter(|w| !w.is_empty()).enumerate() {
        let word = word.to_ascii_lowercase();
        if i == 0 {
            key.push_str(&word);
            continue;
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            key.push(first.to_ascii_uppercase());
            key.push_str(chars.as_str());
        }
    }
    (!key.is_empty()).then_some(key)
}

/// Private metadata stored on the event.
pub fn extension_map(event: &IcsEvent) -> BTreeMap<String, String> {
    event
        .x_props
        .iter()
        .filter_map(|(name, value)| Some((extension_key(name)?, value.clone())))
        .collect()
}

/// `(property name, value)` pairs for private metadata.
pub fn to_properties(values: &BTreeMap<String, String>) -> Vec<(String, String)> {
    values
        .iter()
        .map(|(key, value)| (x_property_name(key), value.clone()))
        .collect()
}

pub fn to_partstat(status: ParticipationStatus) -> &'static str {
    match status {
        ParticipationStatus::Accepted => "ACCEPTED",
        ParticipationStatus::Declined => "DECLINED",
        ParticipationStatus::Tentative => "TENTATIVE",
        ParticipationStatus::NeedsAction => "NEEDS-ACTION",
    }
}

pub fn from_partstat(partstat: Option<&str>) -> ParticipationStatus {
    match partstat.map(str::to_ascii_uppercase).as_deref() {
        Some("ACCEPTED") => ParticipationStatus::Accepted,
        Some("DECLINED") => ParticipationStatus::Declined,
        Some("TENTATIVE") => ParticipationStatus::Tentative,
        _ => ParticipationStatus::NeedsAction,
    }
}

fn ics_utc(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Serialises `details` as a single-VEVENT calendar object whose UID is the
/// meeting id.
///
/// With `current`, the stored event of an update, the account's own
/// PARTSTAT, guest answers the details leave open, foreign private
/// properties and an unchanged location survive, and `SEQUENCE` is bumped.
pub fn build_ics(
    owner: &str,
    details: &MeetingDetails,
    account_email: &str,
    include_participants: bool,
    requested_at: Option<DateTime<Utc>>,
    current: Option<&IcsEvent>,
) -> MeetsyncResult<String> {
    let stored = current.map(extension_map).unwrap_or_default();
    let mut properties = stored.clone();
    properties.insert(MEETING_ID_KEY.to_string(), details.meeting_id.clone());
    properties.insert(UPDATED_BY_KEY.to_string(), UPDATED_BY_MARKER.to_string());
    properties.insert(OWNER_KEY.to_string(), owner.to_string());
    match &details.meeting_url {
        Some(url) => properties.insert(MEETING_URL_KEY.to_string(), url.clone()),
        None => properties.remove(MEETING_URL_KEY),
    };
    if let Some(at) = requested_at {
        properties.insert(REQUESTED_AT_KEY.to_string(), at.to_rfc3339());
    }

    let mut event = icalendar::Event::new();
    event.uid(&details.meeting_id);
    event.summary(&details.title);
    event.add_property("DTSTAMP", ics_utc(Utc::now()));
    event.add_property("DTSTART", ics_utc(details.start));
    event.add_property("DTEND", ics_utc(details.end));
    let sequence = current.and_then(|c| c.sequence).map_or(0, |s| s + 1);
    event.add_property("SEQUENCE", sequence.to_string());

    if let Some(description) = &details.description {
        event.description(description);
    }

    let location = match (&details.meeting_url, current) {
        (Some(url), _) => Some(url.clone()),
        (None, Some(current)) if stored.get(MEETING_URL_KEY).is_none() => current.location.clone(),
        (None, _) => None,
    };
    if let Some(location) = &location {
        event.location(location);
    }
    if let Some(url) = &details.meeting_url {
        event.add_property("URL", url);
    }

    for rule in &details.recurrence {
        event.append_multi_property(recurrence_property(rule)?);
    }

    for reminder in &details.reminders {
        let trigger = Trigger::before_start(Duration::minutes(reminder.minutes()));
        event.alarm(Alarm::display(&details.title, trigger));
    }

    let invitees = details.invitees();
    if include_participants && !invitees.is_empty() {
        event.append_property(Property::new("ORGANIZER", format!("mailto:{}", account_email)));
        for participant in invitees {
            let Some(email) = participant.email.as_deref() else {
                continue;
            };
            let previous = current
                .and_then(|c| c.attendee(email))
                .and_then(|a| a.partstat.clone());
            let partstat = if emails_match(email, account_email) {
                previous.unwrap_or_else(|| "ACCEPTED".to_string())
            } else if participant.status != ParticipationStatus::NeedsAction {
                to_partstat(participant.status).to_string()
            } else {
                previous.unwrap_or_else(|| "NEEDS-ACTION".to_string())
            };

            let mut prop = Property::new("ATTENDEE", format!("mailto:{}", email));
            if let Some(name) = &participant.name {
                prop.add_parameter("CN", name);
            }
            prop.add_parameter("ROLE", "REQ-PARTICIPANT");
            if partstat == "NEEDS-ACTION" {
                prop.add_parameter("RSVP", "TRUE");
            }
            prop.add_parameter("PARTSTAT", &partstat);
            event.append_multi_property(prop);
        }
    }

    for (name, value) in to_properties(&properties) {
        event.add_property(&name, &value);
    }

    let mut calendar = Calendar::new();
    calendar.push(event.done());
    Ok(calendar.done().to_string())
}

fn recurrence_property(rule: &str) -> MeetsyncResult<Property> {
    // a bare rule without the `RRULE:` prefix
    if rule.trim().to_ascii_uppercase().starts_with("FREQ=") {
        return Ok(Property::new("RRULE", rule.trim()));
    }
    match parse_property_line(rule) {
        Some((name, prop)) if RECURRENCE_PROPERTIES.contains(&name.as_str()) => Ok(prop),
        _ => Err(validation_error(format!("unsupported recurrence line {}", rule))),
    }
}

fn own_status(event: &IcsEvent, account_email: &str) -> Option<ParticipationStatus> {
    event
        .attendee(account_email)
        .map(|a| from_partstat(a.partstat.as_deref()))
}

fn event_status(event: &IcsEvent, account_email: &str) -> EventStatus {
    match event.status.as_deref() {
        Some("CANCELLED") => return EventStatus::Cancelled,
        Some("TENTATIVE") => return EventStatus::Tentative,
        _ => {}
    }
    match own_status(event, account_email) {
        Some(ParticipationStatus::Declined) => EventStatus::Declined,
        Some(ParticipationStatus::Tentative) => EventStatus::Tentative,
        _ => EventStatus::Confirmed,
    }
}

fn meeting_url_of(event: &IcsEvent, extensions: &BTreeMap<String, String>) -> Option<String> {
    extensions
        .get(MEETING_URL_KEY)
        .cloned()
        .or_else(|| event.url.clone())
        .or_else(|| event.location.clone().filter(|l| l.starts_with("http")))
}

/// Floating and all-day times are read in `zone`.
pub fn to_unified(
    event: &IcsEvent,
    calendar_id: &str,
    calendar_name: Option<&str>,
    account_email: &str,
    zone: Tz,
) -> UnifiedEvent {
    let extensions = extension_map(event);
    let organizer = event.organizer.as_ref().map(|o| o.email.as_str());

    let recurrence = (!event.rules.is_empty() || event.is_override()).then(|| RecurrenceInfo {
        rules: event.rules.clone(),
        series_id: event.is_override().then(|| event.uid.clone()),
    });

    let attendees = event
        .attendees
        .iter()
        .map(|a| Attendee {
            email: a.email.clone(),
            name: a.name.clone(),
            status: from_partstat(a.partstat.as_deref()),
            organizer: organizer.is_some_and(|o| emails_match(o, &a.email)),
        })
        .collect();

    UnifiedEvent {
        id: extensions
            .get(MEETING_ID_KEY)
            .cloned()
            .unwrap_or_else(|| event.uid.clone()),
        title: event.summary.clone().unwrap_or_default(),
        description: event.description.clone(),
        start: event.start.resolve(zone),
        end: event.end_instant(zone),
        is_all_day: event.start.is_date(),
        source: CalendarProvider::CalDav,
        provider_event_id: event.uid.clone(),
        calendar_id: calendar_id.to_string(),
        calendar_name: calendar_name.map(str::to_string),
        account_email: account_email.to_string(),
        attendees,
        recurrence,
        status: event_status(event, account_email),
        meeting_url: meeting_url_of(event, &extensions),
        extensions,
    }
}

/// Cancelled placeholder for a resource the server reported as removed.
pub fn tombstone(provider_event_id: &str, calendar_id: &str, account_email: &str) -> UnifiedEvent {
    UnifiedEvent {
        id: provider_event_id.to_string(),
        title: String::new(),
        description: None,
        start: DateTime::<Utc>::UNIX_EPOCH,
        end: DateTime::<Utc>::UNIX_EPOCH,
        is_all_day: false,
        source: CalendarProvider::CalDav,
        provider_event_id: provider_event_id.to_string(),
        calendar_id: calendar_id.to_string(),
        calendar_name: None,
        account_email: account_email.to_string(),
        attendees: Vec::new(),
        recurrence: None,
        status: EventStatus::Cancelled,
        meeting_url: None,
        extensions: BTreeMap::new(),
    }
}

/// Busy interval of an event. Transparent, cancelled and declined events and
/// events that take no time are not busy.
pub fn to_busy(
    event: &IcsEvent,
    calendar_id: &str,
    account_email: &str,
    zone: Tz,
) -> Option<EventBusyDate> {
    if event.transparent {
        return None;
    }
    if matches!(
        event_status(event, account_email),
        EventStatus::Cancelled | EventStatus::Declined
    ) {
        return None;
    }
    let start = event.start.resolve(zone);
    let end = event.end_instant(zone);
    if end <= start {
        return None;
    }

    let mut busy = EventBusyDate::new(start, end, CalendarProvider::CalDav.slot_source());
    busy.calendar_id = Some(calendar_id.to_string());
    busy.email = Some(account_email.to_string());
    busy.event_id = Some(event.uid.clone());
    busy.title = event.summary.clone();
    Some(busy)
}

pub fn to_new_calendar_event(
    meeting_id: &str,
    calendar_id: &str,
    resource_url: &str,
    event: Option<&IcsEvent>,
    meeting_url: Option<&str>,
) -> NewCalendarEvent {
    let stored_url = event.and_then(|e| meeting_url_of(e, &extension_map(e)));
    NewCalendarEvent::new(
        meeting_id,
        event.map_or_else(|| meeting_id.to_string(), |e| e.uid.clone()),
        calendar_id,
        AdditionalEventInfo {
            meeting_url: meeting_url.map(str::to_string).or(stored_url),
            hangout_link: None,
            html_link: Some(resource_url.to_string()),
        },
    )
}
