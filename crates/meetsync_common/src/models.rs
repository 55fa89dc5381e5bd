// --- File: crates/meetsync_common/src/models.rs ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{validation_error, MeetsyncError};

/// Calendar backends the engine can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarProvider {
    Google,
    #[serde(alias = "office_365", alias = "outlook")]
    Office365,
    #[serde(alias = "icloud", alias = "webdav")]
    CalDav,
}

impl CalendarProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarProvider::Google => "google",
            CalendarProvider::Office365 => "office365",
            CalendarProvider::CalDav => "caldav",
        }
    }

    pub fn slot_source(&self) -> TimeSlotSource {
        match self {
            CalendarProvider::Google => TimeSlotSource::Google,
            CalendarProvider::Office365 => TimeSlotSource::Office365,
            CalendarProvider::CalDav => TimeSlotSource::Webdav,
        }
    }
}

impl fmt::Display for CalendarProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a busy or free interval came from. `Mww` marks data entered in the
/// scheduling application itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlotSource {
    Mww,
    Google,
    Office365,
    Webdav,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStatus {
    Accepted,
    Declined,
    Tentative,
    #[default]
    NeedsAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Cancelled,
    Tentative,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    Scheduler,
    Owner,
    #[default]
    Invitee,
}

/// Reminder offsets a meeting can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingReminder {
    TenMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    OneDay,
    OneWeek,
}

impl MeetingReminder {
    /// Offset before the start, in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            MeetingReminder::TenMinutes => 10,
            MeetingReminder::FifteenMinutes => 15,
            MeetingReminder::ThirtyMinutes => 30,
            MeetingReminder::OneHour => 60,
            MeetingReminder::OneDay => 1440,
            MeetingReminder::OneWeek => 10080,
        }
    }
}

/// What guests may do with the event on the provider side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingPermission {
    InviteGuests,
    EditMeeting,
    SeeGuestList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParticipantInfo {
    pub account_address: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub status: ParticipationStatus,
    #[serde(default)]
    pub participant_type: ParticipantType,
}

/// Everything an adapter needs to write a meeting to a provider calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingDetails {
    /// Application meeting id, used as the idempotency key.
    pub meeting_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// IANA zone the meeting was scheduled in.
    pub time_zone: String,
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub participants: Vec<ParticipantInfo>,
    /// `RRULE:` lines, passed through unchanged.
    #[serde(default)]
    pub recurrence: Vec<String>,
    #[serde(default)]
    pub reminders: Vec<MeetingReminder>,
    #[serde(default)]
    pub permissions: Vec<MeetingPermission>,
    #[serde(default)]
    pub request_conference: bool,
}

impl MeetingDetails {
    /// Rejects details that must never reach a provider.
    pub fn validate(&self) -> Result<(), MeetsyncError> {
        if self.meeting_id.trim().is_empty() {
            return Err(validation_error("meeting_id must not be empty"));
        }
        if self.end <= self.start {
            return Err(validation_error(format!(
                "meeting {} ends before it starts",
                self.meeting_id
            )));
        }

        let mut seen = HashSet::new();
        for participant in &self.participants {
            let identity = match (&participant.account_address, &participant.email) {
                (Some(address), _) => format!("account:{}", address.to_lowercase()),
                (None, Some(email)) => format!("email:{}", email.to_lowercase()),
                (None, None) => continue,
            };
            if !seen.insert(identity.clone()) {
                return Err(validation_error(format!(
                    "duplicate participant {} in meeting {}",
                    identity, self.meeting_id
                )));
            }
        }
        Ok(())
    }

    /// Participants that can receive a calendar invitation.
    pub fn invitees(&self) -> Vec<&ParticipantInfo> {
        self.participants
            .iter()
            .filter(|p| p.email.as_deref().is_some_and(|e| !e.is_empty()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AdditionalEventInfo {
    pub meeting_url: Option<String>,
    pub hangout_link: Option<String>,
    pub html_link: Option<String>,
}

/// Result of a create or update. `id` and `uid` always carry the meeting id,
/// never the provider id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCalendarEvent {
    pub uid: String,
    pub id: String,
    pub provider_event_id: String,
    pub calendar_id: String,
    pub additional_info: AdditionalEventInfo,
}

impl NewCalendarEvent {
    pub fn new(
        meeting_id: &str,
        provider_event_id: impl Into<String>,
        calendar_id: &str,
        additional_info: AdditionalEventInfo,
    ) -> Self {
        Self {
            uid: meeting_id.to_string(),
            id: meeting_id.to_string(),
            provider_event_id: provider_event_id.into(),
            calendar_id: calendar_id.to_string(),
            additional_info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub name: Option<String>,
    pub status: ParticipationStatus,
    #[serde(default)]
    pub organizer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecurrenceInfo {
    /// Raw `RRULE`/`EXDATE` lines of a series master.
    pub rules: Vec<String>,
    /// Master id when the event is one instance of a series.
    pub series_id: Option<String>,
}

/// Provider independent event as read back from a calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_all_day: bool,
    pub source: CalendarProvider,
    pub provider_event_id: String,
    pub calendar_id: String,
    pub calendar_name: Option<String>,
    pub account_email: String,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    pub recurrence: Option<RecurrenceInfo>,
    pub status: EventStatus,
    pub meeting_url: Option<String>,
    /// Private provider metadata such as the stored meeting id.
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

/// A busy interval reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBusyDate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: TimeSlotSource,
    pub calendar_id: Option<String>,
    pub email: Option<String>,
    pub event_id: Option<String>,
    pub title: Option<String>,
}

impl EventBusyDate {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, source: TimeSlotSource) -> Self {
        Self {
            start,
            end,
            source,
            calendar_id: None,
            email: None,
            event_id: None,
            title: None,
        }
    }
}

/// One full or incremental listing of a calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SyncPage {
    pub events: Vec<UnifiedEvent>,
    pub next_sync_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookChannel {
    pub channel_id: String,
    pub resource_id: String,
    pub expiration: Option<DateTime<Utc>>,
    pub target_url: String,
    pub calendar_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarSyncInfo {
    pub calendar_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Meetings are written to this calendar.
    #[serde(default)]
    pub sync: bool,
    #[serde(default)]
    pub read_only: bool,
    pub color: Option<String>,
    #[serde(default)]
    pub sync_token: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl CalendarSyncInfo {
    pub fn new(calendar_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            name: name.into(),
            enabled: true,
            sync: false,
            read_only: false,
            color: None,
            sync_token: None,
            is_primary: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A calendar account connected by an application user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedCalendar {
    pub account_address: String,
    pub provider: CalendarProvider,
    pub email: String,
    /// Provider specific credential payload, see [`OAuthCredentialPayload`]
    /// and [`CalDavCredentialPayload`].
    pub payload: serde_json::Value,
    #[serde(default)]
    pub calendars: Vec<CalendarSyncInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ConnectedCalendar {
    pub fn new(
        account_address: impl Into<String>,
        provider: CalendarProvider,
        email: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            account_address: account_address.into(),
            provider,
            email: email.into(),
            payload,
            calendars: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Calendars that meetings are written to.
    pub fn sync_targets(&self) -> impl Iterator<Item = &CalendarSyncInfo> {
        self.calendars
            .iter()
            .filter(|c| c.enabled && c.sync && !c.read_only)
    }

    pub fn enabled_calendar_ids(&self) -> Vec<String> {
        self.calendars
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.calendar_id.clone())
            .collect()
    }

    pub fn is_same_account(&self, email: &str, provider: CalendarProvider) -> bool {
        self.provider == provider && self.email.eq_ignore_ascii_case(email)
    }
}

/// Stored credential of Google and Office 365 connections. `expiry_date` is
/// epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthCredentialPayload {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expiry_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Stored credential of CalDAV connections. The password may be marked
/// `encrypted:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalDavCredentialPayload {
    pub username: String,
    pub password: String,
    pub url: Option<String>,
}

/// Case-insensitive email comparison used for attendee matching.
pub fn emails_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
