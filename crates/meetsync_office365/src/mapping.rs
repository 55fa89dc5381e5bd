// --- File: crates/meetsync_office365/src/mapping.rs ---
//! Conversions between MeetSync models and Microsoft Graph events.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use meetsync_common::models::{
    emails_match, AdditionalEventInfo, Attendee, CalendarProvider, EventBusyDate, EventStatus,
    MeetingDetails, MeetingPermission, NewCalendarEvent, ParticipationStatus, RecurrenceInfo,
    UnifiedEvent,
};
use meetsync_common::services::{MEETING_ID_KEY, MEETING_URL_KEY, UPDATED_BY_KEY, UPDATED_BY_MARKER};
use meetsync_common::{parse_error, validation_error, MeetsyncResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::models::{
    DateTimeTimeZone, EmailAddress, GraphAttendee, GraphEvent, ItemBody, Location,
    ResponseStatus, SingleValueProperty,
};
use crate::recurrence::{to_patterned_recurrence, to_rrule};

pub const PROVIDER: &str = "office365";

/// MAPI property set for named string properties (PS_PUBLIC_STRINGS).
const PUBLIC_STRINGS: &str = "{00020329-0000-0000-C000-000000000046}";

const OWNER_KEY: &str = "ownerAccount";
const REQUESTED_AT_KEY: &str = "requestedAt";

/// Keys fetched with every event lookup.
pub const KNOWN_PROPERTY_KEYS: [&str; 5] = [
    MEETING_ID_KEY,
    UPDATED_BY_KEY,
    OWNER_KEY,
    MEETING_URL_KEY,
    REQUESTED_AT_KEY,
];

/// Full id of a named single-value extended property.
pub fn property_id(name: &str) -> String {
    format!("String {} Name {}", PUBLIC_STRINGS, name)
}

/// Name part of a property id as Graph returns it (the GUID may come back
/// lowercased).
fn property_name(id: &str) -> Option<&str> {
    id.split_once(" Name ").map(|(_, name)| name)
}

/// `$expand` clause returning the properties listed in [`KNOWN_PROPERTY_KEYS`].
pub fn expand_clause() -> String {
    let filter = KNOWN_PROPERTY_KEYS
        .iter()
        .map(|key| format!("id eq '{}'", property_id(key)))
        .collect::<Vec<_>>()
        .join(" or ");
    format!("singleValueExtendedProperties($filter={})", filter)
}

/// `$filter` that finds the event carrying a meeting id.
pub fn meeting_filter(meeting_id: &str) -> String {
    format!(
        "singleValueExtendedProperties/Any(ep: ep/id eq '{}' and ep/value eq '{}')",
        property_id(MEETING_ID_KEY),
        meeting_id.replace('\'', "''")
    )
}

/// Named extended properties of an event.
pub fn extension_map(event: &GraphEvent) -> BTreeMap<String, String> {
    event
        .single_value_extended_properties
        .iter()
        .flatten()
        .filter_map(|p| Some((property_name(&p.id)?.to_string(), p.value.clone())))
        .collect()
}

pub fn to_properties(values: &BTreeMap<String, String>) -> Vec<SingleValueProperty> {
    values
        .iter()
        .map(|(name, value)| SingleValueProperty {
            id: property_id(name),
            value: value.clone(),
        })
        .collect()
}

pub fn to_graph_response(status: ParticipationStatus) -> &'static str {
    match status {
        ParticipationStatus::Accepted => "accepted",
        ParticipationStatus::Declined => "declined",
        ParticipationStatus::Tentative => "tentativelyAccepted",
        ParticipationStatus::NeedsAction => "notResponded",
    }
}

pub fn from_graph_response(response: Option<&str>) -> ParticipationStatus {
    match response {
        Some("accepted") | Some("organizer") => ParticipationStatus::Accepted,
        Some("declined") => ParticipationStatus::Declined,
        Some("tentativelyAccepted") => ParticipationStatus::Tentative,
        _ => ParticipationStatus::NeedsAction,
    }
}

/// Graph event action for a response of the signed-in user.
pub fn respond_action(status: ParticipationStatus) -> Option<&'static str> {
    match status {
        ParticipationStatus::Accepted => Some("accept"),
        ParticipationStatus::Declined => Some("decline"),
        ParticipationStatus::Tentative => Some("tentativelyAccept"),
        ParticipationStatus::NeedsAction => None,
    }
}

/// Graph local date time in UTC, as sent with `Prefer: outlook.timezone="UTC"`.
pub fn graph_time(at: DateTime<Utc>) -> DateTimeTimeZone {
    DateTimeTimeZone {
        date_time: at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        time_zone: "UTC".to_string(),
    }
}

/// Resolves a Graph `dateTimeTimeZone`. Zones that are not IANA names
/// (Windows names such as `Pacific Standard Time`) are read as UTC, which
/// is what the `Prefer` header asks Graph to answer with.
pub fn parse_graph_time(time: &DateTimeTimeZone) -> MeetsyncResult<DateTime<Utc>> {
    let raw = time.date_time.trim_end_matches('Z');
    let naive: NaiveDateTime = raw
        .parse()
        .map_err(|_| parse_error(format!("invalid Graph dateTime {}", time.date_time)))?;
    match time.time_zone.parse::<Tz>() {
        Ok(zone) if zone != Tz::UTC => zone
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| parse_error(format!("{} does not exist in {}", raw, zone))),
        _ => Ok(Utc.from_utc_datetime(&naive)),
    }
}

/// Request body for a create (with `transaction_id`) or a full update.
pub fn build_event(
    owner: &str,
    details: &MeetingDetails,
    account_email: &str,
    include_participants: bool,
    requested_at: Option<DateTime<Utc>>,
) -> MeetsyncResult<GraphEvent> {
    let mut properties = BTreeMap::new();
    properties.insert(MEETING_ID_KEY.to_string(), details.meeting_id.clone());
    properties.insert(UPDATED_BY_KEY.to_string(), UPDATED_BY_MARKER.to_string());
    properties.insert(OWNER_KEY.to_string(), owner.to_string());
    if let Some(url) = &details.meeting_url {
        properties.insert(MEETING_URL_KEY.to_string(), url.clone());
    }
    if let Some(at) = requested_at {
        properties.insert(REQUESTED_AT_KEY.to_string(), at.to_rfc3339());
    }

    let attendees = include_participants.then(|| {
        details
            .invitees()
            .into_iter()
            .filter_map(|p| {
                let address = p.email.clone()?;
                let response = if emails_match(&address, account_email) {
                    "organizer"
                } else {
                    to_graph_response(p.status)
                };
                Some(GraphAttendee {
                    email_address: EmailAddress {
                        address,
                        name: p.name.clone(),
                    },
                    attendee_type: Some("required".to_string()),
                    status: Some(ResponseStatus {
                        response: Some(response.to_string()),
                        time: None,
                    }),
                })
            })
            .collect::<Vec<_>>()
    });

    let rules: Vec<&String> = details
        .recurrence
        .iter()
        .filter(|r| r.starts_with("RRULE:"))
        .collect();
    let recurrence = match rules.as_slice() {
        [] => None,
        [rule] => {
            let zone = details.time_zone.parse::<Tz>().unwrap_or(Tz::UTC);
            let local_start = details.start.with_timezone(&zone).date_naive();
            Some(to_patterned_recurrence(rule, local_start, &details.time_zone)?)
        }
        _ => return Err(validation_error("Graph events carry a single RRULE")),
    };

    let wants_online = details.meeting_url.is_none() && details.request_conference;
    let reminder = details.reminders.first().map(|r| r.minutes());

    Ok(GraphEvent {
        subject: Some(details.title.clone()),
        body: details.description.as_ref().map(|text| ItemBody {
            content_type: "text".to_string(),
            content: text.clone(),
        }),
        start: Some(graph_time(details.start)),
        end: Some(graph_time(details.end)),
        location: details.meeting_url.as_ref().map(|url| Location {
            display_name: Some(url.clone()),
        }),
        attendees,
        recurrence,
        is_online_meeting: wants_online.then_some(true),
        online_meeting_provider: wants_online.then(|| "teamsForBusiness".to_string()),
        is_reminder_on: Some(reminder.is_some()),
        reminder_minutes_before_start: reminder,
        hide_attendees: Some(!details.permissions.contains(&MeetingPermission::SeeGuestList)),
        allow_new_time_proposals: Some(details.permissions.contains(&MeetingPermission::EditMeeting)),
        single_value_extended_properties: Some(to_properties(&properties)),
        ..Default::default()
    })
}

/// Carries the account's own response, unrelated properties, an existing
/// online meeting and, unless the meeting URL changed, the stored location.
pub fn carry_over_from_current(desired: &mut GraphEvent, current: &GraphEvent, account_email: &str) {
    if let (Some(new_attendees), Some(old_attendees)) =
        (desired.attendees.as_mut(), current.attendees.as_ref())
    {
        let own_previous = old_attendees
            .iter()
            .find(|a| emails_match(&a.email_address.address, account_email));
        if let Some(previous) = own_previous {
            for attendee in new_attendees.iter_mut() {
                if emails_match(&attendee.email_address.address, &previous.email_address.address) {
                    attendee.status = previous.status.clone();
                }
            }
        }
    }

    let stored = extension_map(current);
    let mut merged = stored.clone();
    merged.extend(extension_map(desired));
    if merged.get(MEETING_URL_KEY) == stored.get(MEETING_URL_KEY) && current.location.is_some() {
        desired.location = current.location.clone();
    }
    desired.single_value_extended_properties = Some(to_properties(&merged));

    if current.is_online_meeting == Some(true) {
        desired.is_online_meeting = None;
        desired.online_meeting_provider = None;
    }
}

/// True for instances of a recurring series, which only get partial updates.
pub fn is_series_instance(event: &GraphEvent) -> bool {
    event.series_master_id.is_some()
        || matches!(event.event_type.as_deref(), Some("occurrence") | Some("exception"))
}

fn same_field(key: &str, current: Option<&Value>, desired: &Value) -> bool {
    let Some(current) = current else {
        return false;
    };
    if key == "start" || key == "end" {
        let parse = |v: &Value| {
            serde_json::from_value::<DateTimeTimeZone>(v.clone())
                .ok()
                .and_then(|t| parse_graph_time(&t).ok())
        };
        return parse(current).is_some() && parse(current) == parse(desired);
    }
    current == desired
}

/// PATCH body for a series instance: the fields of `desired` whose value
/// differs from the stored instance. Recurrence is never sent.
pub fn patch_body(current: &GraphEvent, desired: &GraphEvent) -> MeetsyncResult<Value> {
    let current = serde_json::to_value(current)?;
    let desired = serde_json::to_value(desired)?;
    let mut patch = Map::new();
    if let Value::Object(fields) = desired {
        for (key, value) in fields {
            if matches!(key.as_str(), "recurrence" | "id" | "transactionId") {
                continue;
            }
            if !same_field(&key, current.get(&key), &value) {
                patch.insert(key, value);
            }
        }
    }
    Ok(Value::Object(patch))
}

fn own_response(event: &GraphEvent, account_email: &str) -> Option<ParticipationStatus> {
    if let Some(status) = &event.response_status {
        if status.response.as_deref() != Some("none") {
            return Some(from_graph_response(status.response.as_deref()));
        }
    }
    event
        .attendees
        .as_ref()?
        .iter()
        .find(|a| emails_match(&a.email_address.address, account_email))
        .map(|a| from_graph_response(a.status.as_ref().and_then(|s| s.response.as_deref())))
}

fn event_status(event: &GraphEvent, account_email: &str) -> EventStatus {
    if event.removed.is_some() || event.is_cancelled == Some(true) {
        return EventStatus::Cancelled;
    }
    match own_response(event, account_email) {
        Some(ParticipationStatus::Declined) => EventStatus::Declined,
        Some(ParticipationStatus::Tentative) => EventStatus::Tentative,
        _ => EventStatus::Confirmed,
    }
}

fn meeting_url_of(event: &GraphEvent, extensions: &BTreeMap<String, String>) -> Option<String> {
    extensions
        .get(MEETING_URL_KEY)
        .cloned()
        .or_else(|| event.online_meeting.as_ref().and_then(|m| m.join_url.clone()))
        .or_else(|| {
            event
                .location
                .as_ref()
                .and_then(|l| l.display_name.clone())
                .filter(|l| l.starts_with("http"))
        })
}

/// Maps a Graph event. Delta entries for deleted events only carry an id and
/// `@removed`; their times fall back to the Unix epoch.
pub fn to_unified(
    event: GraphEvent,
    calendar_id: &str,
    calendar_name: Option<&str>,
    account_email: &str,
) -> MeetsyncResult<UnifiedEvent> {
    let status = event_status(&event, account_email);
    let provider_event_id = event
        .id
        .clone()
        .ok_or_else(|| parse_error("Graph event without id"))?;

    let start = match &event.start {
        Some(t) => parse_graph_time(t)?,
        None if status == EventStatus::Cancelled => DateTime::<Utc>::UNIX_EPOCH,
        None => return Err(parse_error(format!("event {} has no start", provider_event_id))),
    };
    let end = match &event.end {
        Some(t) => parse_graph_time(t)?,
        None => start,
    };

    let extensions = extension_map(&event);
    let id = extensions
        .get(MEETING_ID_KEY)
        .cloned()
        .unwrap_or_else(|| provider_event_id.clone());
    let meeting_url = meeting_url_of(&event, &extensions);

    let recurrence = match (&event.recurrence, &event.series_master_id) {
        (None, None) => None,
        (pattern, series_id) => Some(RecurrenceInfo {
            rules: pattern.as_ref().and_then(to_rrule).into_iter().collect(),
            series_id: series_id.clone(),
        }),
    };

    let attendees = event
        .attendees
        .unwrap_or_default()
        .into_iter()
        .map(|a| {
            let response = a.status.and_then(|s| s.response);
            Attendee {
                status: from_graph_response(response.as_deref()),
                organizer: response.as_deref() == Some("organizer"),
                name: a.email_address.name,
                email: a.email_address.address,
            }
        })
        .collect();

    Ok(UnifiedEvent {
        id,
        title: event.subject.unwrap_or_default(),
        description: event.body.map(|b| b.content).filter(|c| !c.is_empty()),
        start,
        end,
        is_all_day: event.is_all_day.unwrap_or(false),
        source: CalendarProvider::Office365,
        provider_event_id,
        calendar_id: calendar_id.to_string(),
        calendar_name: calendar_name.map(str::to_string),
        account_email: account_email.to_string(),
        attendees,
        recurrence,
        status,
        meeting_url,
        extensions,
    })
}

/// Busy interval for an event, `None` for events that do not block time
/// (free, cancelled, declined by the account).
pub fn to_busy(
    event: &GraphEvent,
    calendar_id: &str,
    account_email: &str,
) -> MeetsyncResult<Option<EventBusyDate>> {
    if event.show_as.as_deref() == Some("free") {
        return Ok(None);
    }
    if matches!(
        event_status(event, account_email),
        EventStatus::Cancelled | EventStatus::Declined
    ) {
        return Ok(None);
    }
    let (Some(start), Some(end)) = (&event.start, &event.end) else {
        return Ok(None);
    };

    let mut busy = EventBusyDate::new(
        parse_graph_time(start)?,
        parse_graph_time(end)?,
        CalendarProvider::Office365.slot_source(),
    );
    busy.calendar_id = Some(calendar_id.to_string());
    busy.email = Some(account_email.to_string());
    busy.event_id = event.id.clone();
    busy.title = event.subject.clone();
    Ok(Some(busy))
}

pub fn to_new_calendar_event(
    meeting_id: &str,
    calendar_id: &str,
    event: &GraphEvent,
    meeting_url: Option<&str>,
) -> NewCalendarEvent {
    let extensions = extension_map(event);
    let join_url = event.online_meeting.as_ref().and_then(|m| m.join_url.clone());
    NewCalendarEvent::new(
        meeting_id,
        event.id.clone().unwrap_or_default(),
        calendar_id,
        AdditionalEventInfo {
            meeting_url: meeting_url
                .map(str::to_string)
                .or_else(|| meeting_url_of(event, &extensions)),
            hangout_link: join_url,
            html_link: event.web_link.clone(),
        },
    )
}
