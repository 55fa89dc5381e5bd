// --- File: crates/meetsync_gcal/src/mapping.rs ---
//! Conversions between MeetSync models and Google Calendar resources.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use meetsync_common::models::{
    emails_match, AdditionalEventInfo, Attendee, CalendarProvider, EventBusyDate, EventStatus,
    MeetingDetails, MeetingPermission, NewCalendarEvent, ParticipationStatus, RecurrenceInfo,
    UnifiedEvent,
};
use meetsync_common::services::{MEETING_ID_KEY, MEETING_URL_KEY, UPDATED_BY_KEY, UPDATED_BY_MARKER};
use meetsync_common::{parse_error, MeetsyncResult};
use serde_json::json;

use crate::models::{
    EventDateTime, ExtendedProperties, GoogleAttendee, GoogleEvent, ReminderOverride, Reminders,
};

pub const PROVIDER: &str = "google";

const OWNER_KEY: &str = "ownerAccount";
const REQUESTED_AT_KEY: &str = "requestedAt";

/// Google event ids are 5 to 1024 characters of `a-v` and `0-9`. A meeting
/// UUID loses its dashes and is lowercased; any other id is base32hex
/// encoded so it still maps to one stable event id.
pub fn event_id_for_meeting(meeting_id: &str) -> String {
    let compact = meeting_id
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_lowercase();
    if is_google_event_id(&compact) {
        return compact;
    }
    let mut encoded = base32hex(meeting_id.as_bytes());
    while encoded.len() < 5 {
        encoded.push('0');
    }
    encoded
}

fn is_google_event_id(id: &str) -> bool {
    (5..=1024).contains(&id.len())
        && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'v').contains(&b))
}

/// RFC 4648 base32hex, lowercase and unpadded.
fn base32hex(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
    let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for byte in bytes {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(char::from(ALPHABET[((buffer >> bits) & 0x1f) as usize]));
        }
    }
    if bits > 0 {
        out.push(char::from(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize]));
    }
    out
}

pub fn to_google_status(status: ParticipationStatus) -> &'static str {
    match status {
        ParticipationStatus::Accepted => "accepted",
        ParticipationStatus::Declined => "declined",
        ParticipationStatus::Tentative => "tentative",
        ParticipationStatus::NeedsAction => "needsAction",
    }
}

pub fn from_google_status(status: Option<&str>) -> ParticipationStatus {
    match status {
        Some("accepted") => ParticipationStatus::Accepted,
        Some("declined") => ParticipationStatus::Declined,
        Some("tentative") => ParticipationStatus::Tentative,
        _ => ParticipationStatus::NeedsAction,
    }
}

fn event_time(at: DateTime<Utc>, time_zone: &str) -> EventDateTime {
    EventDateTime {
        date_time: Some(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        date: None,
        time_zone: Some(time_zone.to_string()),
    }
}

/// Request body for an insert or full update.
pub fn build_event(
    owner: &str,
    details: &MeetingDetails,
    account_email: &str,
    include_participants: bool,
    requested_at: Option<DateTime<Utc>>,
) -> GoogleEvent {
    let mut private = std::collections::BTreeMap::new();
    private.insert(MEETING_ID_KEY.to_string(), details.meeting_id.clone());
    private.insert(UPDATED_BY_KEY.to_string(), UPDATED_BY_MARKER.to_string());
    private.insert(OWNER_KEY.to_string(), owner.to_string());
    if let Some(url) = &details.meeting_url {
        private.insert(MEETING_URL_KEY.to_string(), url.clone());
    }
    if let Some(at) = requested_at {
        private.insert(
            REQUESTED_AT_KEY.to_string(),
            at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
    }

    let attendees = include_participants.then(|| {
        details
            .invitees()
            .into_iter()
            .filter_map(|p| {
                let email = p.email.clone()?;
                let is_account = emails_match(&email, account_email);
                Some(GoogleAttendee {
                    organizer: is_account.then_some(true),
                    response_status: Some(to_google_status(p.status).to_string()),
                    display_name: p.name.clone(),
                    email,
                    ..Default::default()
                })
            })
            .collect::<Vec<_>>()
    });

    let reminders = if details.reminders.is_empty() {
        Reminders {
            use_default: true,
            overrides: None,
        }
    } else {
        Reminders {
            use_default: false,
            overrides: Some(
                details
                    .reminders
                    .iter()
                    .map(|r| ReminderOverride {
                        method: "popup".to_string(),
                        minutes: r.minutes(),
                    })
                    .collect(),
            ),
        }
    };

    let conference_data = (details.meeting_url.is_none() && details.request_conference).then(|| {
        json!({
            "createRequest": {
                "requestId": details.meeting_id,
                "conferenceSolutionKey": { "type": "hangoutsMeet" }
            }
        })
    });

    GoogleEvent {
        id: Some(event_id_for_meeting(&details.meeting_id)),
        summary: Some(details.title.clone()),
        description: details.description.clone(),
        location: details.meeting_url.clone(),
        start: Some(event_time(details.start, &details.time_zone)),
        end: Some(event_time(details.end, &details.time_zone)),
        attendees,
        recurrence: (!details.recurrence.is_empty()).then(|| details.recurrence.clone()),
        extended_properties: Some(ExtendedProperties {
            private: Some(private),
            shared: None,
        }),
        reminders: Some(reminders),
        conference_data,
        guests_can_invite_others: Some(details.permissions.contains(&MeetingPermission::InviteGuests)),
        guests_can_modify: Some(details.permissions.contains(&MeetingPermission::EditMeeting)),
        guests_can_see_other_guests: Some(
            details.permissions.contains(&MeetingPermission::SeeGuestList),
        ),
        ..Default::default()
    }
}

/// Carries state from the stored event into an update body: the connected
/// account's own RSVP, unrelated private keys and, unless the meeting URL
/// changed, the stored location.
pub fn carry_over_from_current(desired: &mut GoogleEvent, current: &GoogleEvent, account_email: &str) {
    if let (Some(new_attendees), Some(old_attendees)) =
        (desired.attendees.as_mut(), current.attendees.as_ref())
    {
        let own_previous = old_attendees
            .iter()
            .find(|a| a.is_self == Some(true) || emails_match(&a.email, account_email));
        if let Some(previous) = own_previous {
            for attendee in new_attendees.iter_mut() {
                if emails_match(&attendee.email, &previous.email) {
                    attendee.response_status = previous.response_status.clone();
                }
            }
        }
    }

    let stored = current.private_properties();
    let desired_url = desired.private_properties().get(MEETING_URL_KEY).cloned();
    if desired_url.as_deref() == stored.get(MEETING_URL_KEY).map(String::as_str) {
        desired.location = current.location.clone();
    }

    let mut merged = stored;
    merged.extend(desired.private_properties());
    desired.extended_properties = Some(ExtendedProperties {
        private: Some(merged),
        shared: current
            .extended_properties
            .as_ref()
            .and_then(|p| p.shared.clone()),
    });

    // An existing conference is kept as is
    if current.conference_data.is_some() {
        desired.conference_data = None;
    }
}

/// Partial update for a series instance: only fields that differ from the
/// stored instance. Recurrence is never sent so sibling instances stay intact.
pub fn patch_body(current: &GoogleEvent, desired: &GoogleEvent) -> GoogleEvent {
    fn changed<T: Clone + PartialEq>(current: &Option<T>, desired: &Option<T>) -> Option<T> {
        match desired {
            Some(value) if current.as_ref() != Some(value) => Some(value.clone()),
            _ => None,
        }
    }

    GoogleEvent {
        summary: changed(&current.summary, &desired.summary),
        description: changed(&current.description, &desired.description),
        location: changed(&current.location, &desired.location),
        start: changed(&current.start, &desired.start),
        end: changed(&current.end, &desired.end),
        attendees: changed(&current.attendees, &desired.attendees),
        extended_properties: changed(&current.extended_properties, &desired.extended_properties),
        reminders: changed(&current.reminders, &desired.reminders),
        conference_data: desired.conference_data.clone(),
        guests_can_invite_others: changed(
            &current.guests_can_invite_others,
            &desired.guests_can_invite_others,
        ),
        guests_can_modify: changed(&current.guests_can_modify, &desired.guests_can_modify),
        guests_can_see_other_guests: changed(
            &current.guests_can_see_other_guests,
            &desired.guests_can_see_other_guests,
        ),
        ..Default::default()
    }
}

/// Resolves a Google time to UTC. All-day dates start at local midnight in
/// `zone`. Returns the instant and whether it was an all-day date.
pub fn parse_event_time(time: &EventDateTime, zone: Tz) -> MeetsyncResult<(DateTime<Utc>, bool)> {
    if let Some(date_time) = &time.date_time {
        let parsed = DateTime::parse_from_rfc3339(date_time)?;
        return Ok((parsed.with_timezone(&Utc), false));
    }
    if let Some(date) = &time.date {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")?;
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| parse_error(format!("invalid date {}", date)))?;
        let local = zone
            .from_local_datetime(&midnight)
            .earliest()
            .ok_or_else(|| parse_error(format!("{} does not exist in {}", date, zone)))?;
        return Ok((local.with_timezone(&Utc), true));
    }
    Err(parse_error("event time has neither dateTime nor date"))
}

pub fn parse_zone(name: Option<&str>) -> Tz {
    name.and_then(|n| n.parse::<Tz>().ok()).unwrap_or(Tz::UTC)
}

fn own_response(event: &GoogleEvent, account_email: &str) -> Option<ParticipationStatus> {
    event
        .attendees
        .as_ref()?
        .iter()
        .find(|a| a.is_self == Some(true) || emails_match(&a.email, account_email))
        .map(|a| from_google_status(a.response_status.as_deref()))
}

fn event_status(event: &GoogleEvent, account_email: &str) -> EventStatus {
    match event.status.as_deref() {
        Some("cancelled") => EventStatus::Cancelled,
        Some("tentative") => EventStatus::Tentative,
        _ if own_response(event, account_email) == Some(ParticipationStatus::Declined) => {
            EventStatus::Declined
        }
        _ => EventStatus::Confirmed,
    }
}

/// Maps a Google event. Deleted events in incremental listings only carry an
/// id and status; their times fall back to the Unix epoch.
pub fn to_unified(
    event: GoogleEvent,
    calendar_id: &str,
    calendar_name: Option<&str>,
    account_email: &str,
    zone: Tz,
) -> MeetsyncResult<UnifiedEvent> {
    let status = event_status(&event, account_email);
    let provider_event_id = event
        .id
        .clone()
        .ok_or_else(|| parse_error("Google event without id"))?;

    let (start, is_all_day) = match &event.start {
        Some(t) => parse_event_time(t, zone)?,
        None if status == EventStatus::Cancelled => (DateTime::<Utc>::UNIX_EPOCH, false),
        None => return Err(parse_error(format!("event {} has no start", provider_event_id))),
    };
    let end = match &event.end {
        Some(t) => parse_event_time(t, zone)?.0,
        None => start,
    };

    let extensions = event.private_properties();
    let id = extensions
        .get(MEETING_ID_KEY)
        .cloned()
        .unwrap_or_else(|| provider_event_id.clone());
    let meeting_url = extensions
        .get(MEETING_URL_KEY)
        .cloned()
        .or_else(|| event.hangout_link.clone())
        .or_else(|| event.location.clone().filter(|l| l.starts_with("http")));

    let attendees = event
        .attendees
        .unwrap_or_default()
        .into_iter()
        .map(|a| Attendee {
            status: from_google_status(a.response_status.as_deref()),
            organizer: a.organizer.unwrap_or(false),
            name: a.display_name,
            email: a.email,
        })
        .collect();

    let recurrence = match (event.recurrence, event.recurring_event_id) {
        (None, None) => None,
        (rules, series_id) => Some(RecurrenceInfo {
            rules: rules.unwrap_or_default(),
            series_id,
        }),
    };

    Ok(UnifiedEvent {
        id,
        title: event.summary.unwrap_or_default(),
        description: event.description,
        start,
        end,
        is_all_day,
        source: CalendarProvider::Google,
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
/// (cancelled, transparent, declined by the account).
pub fn to_busy(
    event: &GoogleEvent,
    calendar_id: &str,
    account_email: &str,
    zone: Tz,
) -> MeetsyncResult<Option<EventBusyDate>> {
    if event.transparency.as_deref() == Some("transparent") {
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
        parse_event_time(start, zone)?.0,
        parse_event_time(end, zone)?.0,
        CalendarProvider::Google.slot_source(),
    );
    busy.calendar_id = Some(calendar_id.to_string());
    busy.email = Some(account_email.to_string());
    busy.event_id = event.id.clone();
    busy.title = event.summary.clone();
    Ok(Some(busy))
}

pub fn to_new_calendar_event(
    meeting_id: &str,
    calendar_id: &str,
    event: &GoogleEvent,
    meeting_url: Option<&str>,
) -> NewCalendarEvent {
    let stored_url = event.private_properties().get(MEETING_URL_KEY).cloned();
    NewCalendarEvent::new(
        meeting_id,
        event.id.clone().unwrap_or_default(),
        calendar_id,
        AdditionalEventInfo {
            meeting_url: meeting_url
                .map(str::to_string)
                .or(stored_url)
                .or_else(|| event.hangout_link.clone()),
            hangout_link: event.hangout_link.clone(),
            html_link: event.html_link.clone(),
        },
    )
}
