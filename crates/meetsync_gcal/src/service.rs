// --- File: crates/meetsync_gcal/src/service.rs ---
//! Google Calendar implementation of [`CalendarIntegration`].
//!
//! Talks to the Calendar v3 REST API with a caller supplied `reqwest::Client`.
//! Every request asks the [`TokenManager`] for a token first, so a refresh
//! (and its persistence) always happens before the call that needed it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use meetsync_common::models::{
    emails_match, CalendarProvider, CalendarSyncInfo, EventBusyDate, MeetingDetails,
    NewCalendarEvent, ParticipationStatus, SyncPage, UnifiedEvent, WebhookChannel,
};
use meetsync_common::services::{
    alternate_event_id, CalendarIntegration, UPDATED_BY_KEY, UPDATED_BY_MARKER,
};
use meetsync_common::{
    check_status, config_error, not_found, parse_error, MeetsyncError, MeetsyncResult,
    TokenManager,
};
use meetsync_config::{GoogleConfig, WebhookConfig};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::mapping::{
    build_event, carry_over_from_current, event_id_for_meeting, parse_zone, patch_body,
    to_busy, to_google_status, to_new_calendar_event, to_unified, PROVIDER,
};
use crate::models::{
    CalendarListResponse, EventsListResponse, ExtendedProperties, FreeBusyItem, FreeBusyRequest,
    FreeBusyResponse, GoogleEvent, StopChannelRequest, WatchChannel, WatchParams, WatchRequest,
};

const PRIMARY_CALENDAR: &str = "primary";
const PAGE_SIZE: &str = "250";

/// Google Calendar adapter for one connected account.
pub struct GoogleCalendarIntegration {
    http: Client,
    api_base: String,
    email: String,
    tokens: Arc<TokenManager>,
    channel_ttl: Duration,
}

impl GoogleCalendarIntegration {
    pub fn new(
        http: Client,
        config: &GoogleConfig,
        webhooks: &WebhookConfig,
        email: impl Into<String>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            http,
            api_base: config.api_base_url.clone(),
            email: email.into(),
            tokens,
            channel_ttl: Duration::hours(webhooks.google_channel_ttl_hours),
        }
    }

    fn url(&self, segments: &[&str]) -> MeetsyncResult<Url> {
        let mut url = Url::parse(&self.api_base)?;
        url.path_segments_mut()
            .map_err(|_| config_error(format!("{} cannot be a base URL", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> MeetsyncResult<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, builder: RequestBuilder) -> MeetsyncResult<reqwest::Response> {
        let response = builder.send().await?;
        check_status(PROVIDER, response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> MeetsyncResult<T> {
        Ok(self.send(builder).await?.json::<T>().await?)
    }

    async fn fetch_event(&self, calendar_id: &str, event_id: &str) -> MeetsyncResult<GoogleEvent> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        let builder = self.request(Method::GET, url).await?;
        self.send_json(builder).await
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        body: &GoogleEvent,
        include_participants: bool,
    ) -> MeetsyncResult<GoogleEvent> {
        let url = self.url(&["calendars", calendar_id, "events"])?;
        let builder = self
            .request(Method::POST, url)
            .await?
            .query(&[
                ("conferenceDataVersion", "1"),
                ("sendUpdates", send_updates(include_participants)),
            ])
            .json(body);
        self.send_json(builder).await
    }

    async fn write_event(
        &self,
        method: Method,
        calendar_id: &str,
        event_id: &str,
        body: &GoogleEvent,
    ) -> MeetsyncResult<GoogleEvent> {
        let url = self.url(&["calendars", calendar_id, "events", event_id])?;
        let builder = self
            .request(method, url)
            .await?
            .query(&[("conferenceDataVersion", "1"), ("sendUpdates", "all")])
            .json(body);
        self.send_json(builder).await
    }

    async fn patch_rsvp(
        &self,
        event_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        calendar_id: &str,
    ) -> MeetsyncResult<()> {
        let current = self.fetch_event(calendar_id, event_id).await?;
        let mut attendees = current.attendees.unwrap_or_default();
        let attendee = attendees
            .iter_mut()
            .find(|a| emails_match(&a.email, attendee_email))
            .ok_or_else(|| {
                not_found(format!("attendee {} on event {}", attendee_email, event_id))
            })?;
        // Stored casing of the email is kept
        attendee.response_status = Some(to_google_status(status).to_string());

        let body = GoogleEvent {
            attendees: Some(attendees),
            ..Default::default()
        };
        self.write_event(Method::PATCH, calendar_id, event_id, &body)
            .await?;
        debug!("RSVP of {} on {} set to {:?}", attendee_email, event_id, status);
        Ok(())
    }

    /// All events of a calendar between `start` and `end`, recurring series
    /// expanded into instances.
    async fn list_busy_from_events(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>> {
        let time_min = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut busy = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = self.url(&["calendars", calendar_id, "events"])?;
            let mut builder = self.request(Method::GET, url).await?.query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", PAGE_SIZE),
            ]);
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }
            let page: EventsListResponse = self.send_json(builder).await?;
            let zone = parse_zone(page.time_zone.as_deref());

            for event in &page.items {
                if let Some(interval) = to_busy(event, calendar_id, &self.email, zone)? {
                    busy.push(interval);
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(busy)
    }

    async fn query_freebusy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>> {
        let request = FreeBusyRequest {
            time_min: start.to_rfc3339_opts(SecondsFormat::Secs, true),
            time_max: end.to_rfc3339_opts(SecondsFormat::Secs, true),
            items: vec![FreeBusyItem {
                id: calendar_id.to_string(),
            }],
        };
        let url = self.url(&["freeBusy"])?;
        let builder = self.request(Method::POST, url).await?.json(&request);
        let response: FreeBusyResponse = self.send_json(builder).await?;

        let calendar = response.calendars.get(calendar_id).ok_or_else(|| {
            parse_error(format!("freeBusy answer lacks calendar {}", calendar_id))
        })?;
        if !calendar.errors.is_empty() {
            return Err(MeetsyncError::Provider {
                provider: PROVIDER.to_string(),
                status: 400,
                message: format!("freeBusy errors for {}: {:?}", calendar_id, calendar.errors),
            });
        }

        calendar
            .busy
            .iter()
            .map(|period| -> MeetsyncResult<EventBusyDate> {
                let mut busy = EventBusyDate::new(
                    DateTime::parse_from_rfc3339(&period.start)?.with_timezone(&Utc),
                    DateTime::parse_from_rfc3339(&period.end)?.with_timezone(&Utc),
                    CalendarProvider::Google.slot_source(),
                );
                busy.calendar_id = Some(calendar_id.to_string());
                busy.email = Some(self.email.clone());
                Ok(busy)
            })
            .collect()
    }

    async fn calendar_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>> {
        match self.list_busy_from_events(calendar_id, start, end).await {
            Ok(busy) => Ok(busy),
            Err(e) => {
                warn!(
                    "listing events of {} failed ({}), falling back to freeBusy",
                    calendar_id, e
                );
                self.query_freebusy(calendar_id, start, end).await
            }
        }
    }

    async fn list_pages(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> MeetsyncResult<SyncPage> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = self.url(&["calendars", calendar_id, "events"])?;
            let mut builder = self
                .request(Method::GET, url)
                .await?
                .query(&[("showDeleted", "true"), ("maxResults", PAGE_SIZE)]);
            if let Some(token) = sync_token {
                builder = builder.query(&[("syncToken", token)]);
            }
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }
            let page: EventsListResponse = self.send_json(builder).await?;
            let zone = parse_zone(page.time_zone.as_deref());

            for event in page.items {
                events.push(to_unified(
                    event,
                    calendar_id,
                    page.summary.as_deref(),
                    &self.email,
                    zone,
                )?);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    return Ok(SyncPage {
                        events,
                        next_sync_token: page.next_sync_token,
                    })
                }
            }
        }
    }

    async fn fetch_for_lookup(
        &self,
        event_id: &str,
        calendar_id: &str,
    ) -> MeetsyncResult<Option<GoogleEvent>> {
        match self.fetch_event(calendar_id, event_id).await {
            Ok(event) => Ok(Some(event)),
            // 400 is what Google answers for ids with invalid characters
            Err(e) if e.is_gone() || e.status() == Some(400) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn send_updates(include_participants: bool) -> &'static str {
    if include_participants {
        "all"
    } else {
        "none"
    }
}

#[async_trait]
impl CalendarIntegration for GoogleCalendarIntegration {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Google
    }

    fn email(&self) -> &str {
        &self.email
    }

    async fn create_event(
        &self,
        owner: &str,
        details: &MeetingDetails,
        requested_at: DateTime<Utc>,
        calendar_id: &str,
        include_participants: bool,
    ) -> MeetsyncResult<NewCalendarEvent> {
        details.validate()?;
        let event_id = event_id_for_meeting(&details.meeting_id);

        match self.fetch_event(calendar_id, &event_id).await {
            Ok(existing) => {
                debug!(
                    "meeting {} already on calendar {}, skipping insert",
                    details.meeting_id, calendar_id
                );
                return Ok(to_new_calendar_event(
                    &details.meeting_id,
                    calendar_id,
                    &existing,
                    details.meeting_url.as_deref(),
                ));
            }
            Err(e) if e.is_gone() => {}
            Err(e) => warn!("lookup of {} failed before insert: {}", event_id, e),
        }

        let body = build_event(
            owner,
            details,
            &self.email,
            include_participants,
            Some(requested_at),
        );
        let created = match self.insert_event(calendar_id, &body, include_participants).await {
            Ok(created) => created,
            // Another writer inserted the same id in between
            Err(e) if e.status() == Some(409) => self.fetch_event(calendar_id, &event_id).await?,
            Err(e) => return Err(e),
        };
        info!(
            "created Google event {} for meeting {}",
            event_id, details.meeting_id
        );
        Ok(to_new_calendar_event(
            &details.meeting_id,
            calendar_id,
            &created,
            details.meeting_url.as_deref(),
        ))
    }

    async fn update_event(
        &self,
        owner: &str,
        details: &MeetingDetails,
        calendar_id: &str,
    ) -> MeetsyncResult<NewCalendarEvent> {
        details.validate()?;
        let event_id = event_id_for_meeting(&details.meeting_id);
        let current = self.fetch_event(calendar_id, &event_id).await?;

        let mut desired = build_event(owner, details, &self.email, true, None);
        desired.id = None;
        carry_over_from_current(&mut desired, &current, &self.email);

        let updated = if current.recurring_event_id.is_some() {
            debug!("{} is a series instance, patching", event_id);
            let body = patch_body(&current, &desired);
            self.write_event(Method::PATCH, calendar_id, &event_id, &body)
                .await?
        } else {
            self.write_event(Method::PUT, calendar_id, &event_id, &desired)
                .await?
        };

        Ok(to_new_calendar_event(
            &details.meeting_id,
            calendar_id,
            &updated,
            details.meeting_url.as_deref(),
        ))
    }

    async fn delete_event(&self, meeting_id: &str, calendar_id: &str) -> MeetsyncResult<()> {
        let event_id = event_id_for_meeting(meeting_id);
        let url = self.url(&["calendars", calendar_id, "events", event_id.as_str()])?;
        let builder = self
            .request(Method::DELETE, url)
            .await?
            .query(&[("sendUpdates", "all")]);

        match self.send(builder).await {
            Ok(_) => {
                info!("deleted Google event {} for meeting {}", event_id, meeting_id);
                Ok(())
            }
            Err(e) if e.is_gone() => {
                debug!("Google event {} was already deleted", event_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_availability(
        &self,
        calendar_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>> {
        let results = join_all(
            calendar_ids
                .iter()
                .map(|calendar_id| self.calendar_busy(calendar_id, start, end)),
        )
        .await;

        let mut busy = Vec::new();
        for (calendar_id, result) in calendar_ids.iter().zip(results) {
            match result {
                Ok(intervals) => busy.extend(intervals),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => warn!("skipping busy times of {}: {}", calendar_id, e),
            }
        }
        busy.sort_by_key(|b| b.start);
        Ok(busy)
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> MeetsyncResult<SyncPage> {
        match self.list_pages(calendar_id, sync_token).await {
            Err(e) if sync_token.is_some() && e.status() == Some(410) => {
                warn!(
                    "sync token of {} was invalidated, running a full sync",
                    calendar_id
                );
                self.list_pages(calendar_id, None).await
            }
            other => other,
        }
    }

    async fn get_event_by_id(
        &self,
        event_id: &str,
        calendar_id: &str,
    ) -> MeetsyncResult<Option<UnifiedEvent>> {
        let mut found = self.fetch_for_lookup(event_id, calendar_id).await?;
        if found.is_none() {
            if let Some(alternate) = alternate_event_id(event_id) {
                debug!("{} not found, retrying as {}", event_id, alternate);
                found = self.fetch_for_lookup(&alternate, calendar_id).await?;
            }
        }

        found
            .map(|event| to_unified(event, calendar_id, None, &self.email, Tz::UTC))
            .transpose()
    }

    async fn update_event_rsvp(
        &self,
        meeting_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        calendar_id: &str,
    ) -> MeetsyncResult<()> {
        let event_id = event_id_for_meeting(meeting_id);
        self.patch_rsvp(&event_id, attendee_email, status, calendar_id)
            .await
    }

    async fn update_event_rsvp_for_external_event(
        &self,
        event_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        calendar_id: &str,
    ) -> MeetsyncResult<()> {
        self.patch_rsvp(event_id, attendee_email, status, calendar_id)
            .await
    }

    async fn update_event_extended_properties(
        &self,
        meeting_id: &str,
        calendar_id: &str,
        properties: &BTreeMap<String, String>,
    ) -> MeetsyncResult<()> {
        let event_id = event_id_for_meeting(meeting_id);
        let current = self.fetch_event(calendar_id, &event_id).await?;

        let mut private = current.private_properties();
        private.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        private.insert(UPDATED_BY_KEY.to_string(), UPDATED_BY_MARKER.to_string());

        let body = GoogleEvent {
            extended_properties: Some(ExtendedProperties {
                private: Some(private),
                shared: None,
            }),
            ..Default::default()
        };
        self.write_event(Method::PATCH, calendar_id, &event_id, &body)
            .await?;
        Ok(())
    }

    async fn list_calendars(&self) -> MeetsyncResult<Vec<CalendarSyncInfo>> {
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = self.url(&["users", "me", "calendarList"])?;
            let mut builder = self.request(Method::GET, url).await?;
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }
            let page: CalendarListResponse = self.send_json(builder).await?;

            for entry in page.items {
                let name = entry
                    .summary_override
                    .or(entry.summary)
                    .unwrap_or_else(|| entry.id.clone());
                let mut info = CalendarSyncInfo::new(entry.id, name);
                info.read_only = matches!(
                    entry.access_role.as_deref(),
                    Some("reader") | Some("freeBusyReader")
                );
                info.color = entry.background_color;
                info.is_primary = entry.primary;
                info.sync = entry.primary;
                calendars.push(info);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(calendars)
    }

    async fn set_webhook_url(
        &self,
        target_url: &str,
        calendar_id: Option<&str>,
    ) -> MeetsyncResult<WebhookChannel> {
        let calendar_id = calendar_id.unwrap_or(PRIMARY_CALENDAR);
        let request = WatchRequest {
            id: uuid::Uuid::new_v4().to_string(),
            kind: "web_hook".to_string(),
            address: target_url.to_string(),
            params: WatchParams {
                ttl: self.channel_ttl.num_seconds().to_string(),
            },
        };
        let url = self.url(&["calendars", calendar_id, "events", "watch"])?;
        let builder = self.request(Method::POST, url).await?.json(&request);
        let channel: WatchChannel = self.send_json(builder).await?;

        let expiration = channel
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        info!(
            "watching calendar {} through channel {} until {:?}",
            calendar_id, channel.id, expiration
        );
        Ok(WebhookChannel {
            channel_id: channel.id,
            resource_id: channel.resource_id,
            expiration,
            target_url: target_url.to_string(),
            calendar_id: calendar_id.to_string(),
        })
    }

    async fn stop_webhook(&self, channel_id: &str, resource_id: &str) -> MeetsyncResult<()> {
        let url = self.url(&["channels", "stop"])?;
        let builder = self
            .request(Method::POST, url)
            .await?
            .json(&StopChannelRequest {
                id: channel_id.to_string(),
                resource_id: resource_id.to_string(),
            });
        match self.send(builder).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_gone() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn refresh_webhook(
        &self,
        channel_id: &str,
        resource_id: &str,
        target_url: &str,
        calendar_id: Option<&str>,
    ) -> MeetsyncResult<WebhookChannel> {
        if let Err(e) = self.stop_webhook(channel_id, resource_id).await {
            warn!("stopping channel {} failed, continuing: {}", channel_id, e);
        }
        self.set_webhook_url(target_url, calendar_id).await
    }
}
