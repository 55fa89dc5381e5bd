// --- File: crates/meetsync_common/src/services.rs ---
//! The provider-blind calendar contract.
//!
//! Every adapter (Google, Office 365, CalDAV) implements [`CalendarIntegration`]
//! and returns the shared shapes from [`crate::models`], so the engine and the
//! availability code never need to know which backend they talk to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::{unsupported, MeetsyncResult};
use crate::models::{
    CalendarProvider, CalendarSyncInfo, EventBusyDate, MeetingDetails, NewCalendarEvent,
    ParticipationStatus, SyncPage, UnifiedEvent, WebhookChannel,
};

/// Marker stamped into private event metadata on every write.
pub const UPDATED_BY_MARKER: &str = "meetsync";

/// Private metadata key holding the meeting id.
pub const MEETING_ID_KEY: &str = "meetingId";
pub const UPDATED_BY_KEY: &str = "updatedBy";
pub const MEETING_URL_KEY: &str = "meetingUrl";

/// Capability set every calendar adapter offers.
///
/// Meeting ids are idempotency keys: an adapter derives its provider event id
/// from them, so retrying a create never produces a second event.
#[async_trait]
pub trait CalendarIntegration: Send + Sync {
    fn provider(&self) -> CalendarProvider;

    /// Account email of the connected calendar.
    fn email(&self) -> &str;

    /// Creates the meeting, or returns the existing event when one is already
    /// stored under the meeting id.
    async fn create_event(
        &self,
        owner: &str,
        details: &MeetingDetails,
        requested_at: DateTime<Utc>,
        calendar_id: &str,
        include_participants: bool,
    ) -> MeetsyncResult<NewCalendarEvent>;

    /// Rewrites the meeting. Series instances get a partial update and the
    /// connected account's own RSVP survives.
    async fn update_event(
        &self,
        owner: &str,
        details: &MeetingDetails,
        calendar_id: &str,
    ) -> MeetsyncResult<NewCalendarEvent>;

    /// Deletes the meeting. An event that is already gone counts as deleted.
    async fn delete_event(&self, meeting_id: &str, calendar_id: &str) -> MeetsyncResult<()>;

    /// Busy intervals of the given calendars, merged across calendars.
    async fn get_availability(
        &self,
        calendar_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>>;

    /// Full listing without a sync token, incremental listing with one.
    /// Cancelled events are part of the result.
    async fn list_events(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> MeetsyncResult<SyncPage>;

    /// `Ok(None)` when neither the literal id nor its sanitized form resolve.
    async fn get_event_by_id(
        &self,
        event_id: &str,
        calendar_id: &str,
    ) -> MeetsyncResult<Option<UnifiedEvent>>;

    async fn update_event_rsvp(
        &self,
        meeting_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        calendar_id: &str,
    ) -> MeetsyncResult<()>;

    /// RSVP on an event that was not created by the engine; `event_id` is the
    /// provider id.
    async fn update_event_rsvp_for_external_event(
        &self,
        event_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        calendar_id: &str,
    ) -> MeetsyncResult<()>;

    /// Merges `properties` into the event's private metadata and stamps
    /// [`UPDATED_BY_KEY`]. Existing keys not in `properties` are kept.
    async fn update_event_extended_properties(
        &self,
        meeting_id: &str,
        calendar_id: &str,
        properties: &BTreeMap<String, String>,
    ) -> MeetsyncResult<()>;

    async fn list_calendars(&self) -> MeetsyncResult<Vec<CalendarSyncInfo>>;

    /// Registers a push channel on `calendar_id` (the primary calendar when
    /// `None`).
    async fn set_webhook_url(
        &self,
        _target_url: &str,
        _calendar_id: Option<&str>,
    ) -> MeetsyncResult<WebhookChannel> {
        Err(unsupported(format!(
            "{} does not support push notifications",
            self.provider()
        )))
    }

    async fn stop_webhook(&self, _channel_id: &str, _resource_id: &str) -> MeetsyncResult<()> {
        Err(unsupported(format!(
            "{} does not support push notifications",
            self.provider()
        )))
    }

    /// Stops the old channel, ignoring failures, and registers a new one.
    async fn refresh_webhook(
        &self,
        _channel_id: &str,
        _resource_id: &str,
        _target_url: &str,
        _calendar_id: Option<&str>,
    ) -> MeetsyncResult<WebhookChannel> {
        Err(unsupported(format!(
            "{} does not support push notifications",
            self.provider()
        )))
    }
}

/// Id retried by `get_event_by_id` after the literal id failed: only ASCII
/// letters and digits are kept. `None` when sanitizing changes nothing.
pub fn alternate_event_id(event_id: &str) -> Option<String> {
    let sanitized: String = event_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if sanitized.is_empty() || sanitized == event_id {
        None
    } else {
        Some(sanitized)
    }
}
