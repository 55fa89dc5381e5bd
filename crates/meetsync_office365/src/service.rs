// --- File: crates/meetsync_office365/src/service.rs ---
//! Microsoft Graph implementation of [`CalendarIntegration`].
//!
//! Events are found by the meeting id stored in a single-value extended
//! property, so no provider id has to be derived from the meeting id.
//! Every request carries `Prefer: outlook.timezone="UTC"` and all times on
//! the wire are UTC.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use meetsync_common::models::{
    emails_match, CalendarProvider, CalendarSyncInfo, EventBusyDate, MeetingDetails,
    NewCalendarEvent, ParticipationStatus, SyncPage, UnifiedEvent, WebhookChannel,
};
use meetsync_common::services::{
    alternate_event_id, CalendarIntegration, UPDATED_BY_KEY, UPDATED_BY_MARKER,
};
use meetsync_common::{
    auth_error, check_status, config_error, not_found, parse_error, MeetsyncError,
    MeetsyncResult, TokenManager,
};
use meetsync_config::{Office365Config, WebhookConfig};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::{Position, Url};

use crate::mapping::{
    build_event, carry_over_from_current, expand_clause, graph_time, is_series_instance,
    meeting_filter, parse_graph_time, patch_body, respond_action, to_busy, to_graph_response,
    to_new_calendar_event, to_properties, to_unified, PROVIDER,
};
use crate::models::{
    BatchRequest, BatchRequestItem, BatchResponse, GraphCalendar, GraphEvent, GraphList,
    GraphUser, RespondRequest, ResponseStatus, ScheduleInformation, ScheduleRequest, Subscription,
    SubscriptionRequest,
};

const PREFER_UTC: &str = "outlook.timezone=\"UTC\"";
const PAGE_SIZE: &str = "250";
/// Graph rejects `$batch` payloads with more than 20 requests.
const BATCH_LIMIT: usize = 20;
const SCHEDULE_INTERVAL_MINUTES: u32 = 30;

/// Office 365 adapter for one connected account.
pub struct Office365CalendarIntegration {
    http: Client,
    graph_base: String,
    email: String,
    tokens: Arc<TokenManager>,
    subscription_ttl: Duration,
    client_state: Option<String>,
    /// Window of the initial delta query; later rounds follow the delta link.
    delta_window: (Duration, Duration),
}

impl Office365CalendarIntegration {
    pub fn new(
        http: Client,
        config: &Office365Config,
        webhooks: &WebhookConfig,
        email: impl Into<String>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            http,
            graph_base: config.graph_base_url.clone(),
            email: email.into(),
            tokens,
            subscription_ttl: Duration::minutes(webhooks.graph_subscription_ttl_minutes),
            client_state: webhooks.client_state.clone(),
            delta_window: (Duration::days(30), Duration::days(365)),
        }
    }

    /// Mailbox address of the signed-in user. `mail` is empty for some
    /// personal and guest accounts, `userPrincipalName` is used then.
    pub async fn resolve_email(&self) -> MeetsyncResult<String> {
        let url = self.url(&["me"])?;
        let builder = self
            .request(Method::GET, url)
            .await?
            .query(&[("$select", "mail,userPrincipalName")]);
        let user: GraphUser = self.send_json(builder).await?;
        user.mail
            .filter(|m| !m.is_empty())
            .or(user.user_principal_name)
            .ok_or_else(|| auth_error("Graph user has neither mail nor userPrincipalName"))
    }

    fn url(&self, segments: &[&str]) -> MeetsyncResult<Url> {
        let mut url = Url::parse(&self.graph_base)?;
        url.path_segments_mut()
            .map_err(|_| config_error(format!("{} cannot be a base URL", self.graph_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> MeetsyncResult<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header("Prefer", PREFER_UTC))
    }

    async fn send(&self, builder: RequestBuilder) -> MeetsyncResult<reqwest::Response> {
        let response = builder.send().await?;
        check_status(PROVIDER, response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> MeetsyncResult<T> {
        Ok(self.send(builder).await?.json::<T>().await?)
    }

    /// Follows `@odata.nextLink` pages starting from `first`.
    async fn collect_pages<T: DeserializeOwned>(
        &self,
        first: RequestBuilder,
    ) -> MeetsyncResult<(Vec<T>, Option<String>)> {
        let mut page: GraphList<T> = self.send_json(first).await?;
        let mut items = std::mem::take(&mut page.value);
        while let Some(next) = page.next_link.take() {
            let builder = self.request(Method::GET, Url::parse(&next)?).await?;
            page = self.send_json(builder).await?;
            items.append(&mut page.value);
        }
        Ok((items, page.delta_link))
    }

    async fn find_by_meeting_id(
        &self,
        meeting_id: &str,
        calendar_id: &str,
    ) -> MeetsyncResult<Option<GraphEvent>> {
        let mut segments = calendar_segments(calendar_id);
        segments.push("events");
        let url = self.url(&segments)?;
        let builder = self.request(Method::GET, url).await?.query(&[
            ("$filter", meeting_filter(meeting_id)),
            ("$expand", expand_clause()),
            ("$top", "1".to_string()),
        ]);
        let page: GraphList<GraphEvent> = self.send_json(builder).await?;
        Ok(page.value.into_iter().next())
    }

    async fn require_by_meeting_id(
        &self,
        meeting_id: &str,
        calendar_id: &str,
    ) -> MeetsyncResult<GraphEvent> {
        self.find_by_meeting_id(meeting_id, calendar_id)
            .await?
            .ok_or_else(|| not_found(format!("meeting {} on calendar {}", meeting_id, calendar_id)))
    }

    async fn fetch_event(&self, event_id: &str) -> MeetsyncResult<GraphEvent> {
        let url = self.url(&["me", "events", event_id])?;
        let builder = self
            .request(Method::GET, url)
            .await?
            .query(&[("$expand", expand_clause())]);
        self.send_json(builder).await
    }

    async fn fetch_for_lookup(&self, event_id: &str) -> MeetsyncResult<Option<GraphEvent>> {
        match self.fetch_event(event_id).await {
            Ok(event) => Ok(Some(event)),
            // Malformed ids come back as 400 ErrorInvalidIdMalformed
            Err(e) if e.is_gone() || e.status() == Some(400) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert_event(&self, calendar_id: &str, body: &GraphEvent) -> MeetsyncResult<GraphEvent> {
        let mut segments = calendar_segments(calendar_id);
        segments.push("events");
        let url = self.url(&segments)?;
        let builder = self.request(Method::POST, url).await?.json(body);
        self.send_json(builder).await
    }

    async fn patch_event<B: serde::Serialize + ?Sized>(
        &self,
        event_id: &str,
        body: &B,
    ) -> MeetsyncResult<GraphEvent> {
        let url = self.url(&["me", "events", event_id])?;
        let builder = self.request(Method::PATCH, url).await?.json(body);
        self.send_json(builder).await
    }

    /// RSVP on a fetched event. The signed-in user answers through the
    /// respond actions; other attendees are rewritten in the attendee list.
    async fn apply_rsvp(
        &self,
        event: GraphEvent,
        attendee_email: &str,
        status: ParticipationStatus,
    ) -> MeetsyncResult<()> {
        let event_id = event
            .id
            .clone()
            .ok_or_else(|| not_found("Graph event without id"))?;
        let is_organizer = event
            .response_status
            .as_ref()
            .and_then(|s| s.response.as_deref())
            == Some("organizer");

        if emails_match(attendee_email, &self.email) && !is_organizer {
            if let Some(action) = respond_action(status) {
                let url = self.url(&["me", "events", event_id.as_str(), action])?;
                let builder = self
                    .request(Method::POST, url)
                    .await?
                    .json(&RespondRequest { send_response: true });
                self.send(builder).await?;
                debug!("responded {} on {}", action, event_id);
                return Ok(());
            }
        }

        let mut attendees = event.attendees.unwrap_or_default();
        let attendee = attendees
            .iter_mut()
            .find(|a| emails_match(&a.email_address.address, attendee_email))
            .ok_or_else(|| not_found(format!("attendee {} on event {}", attendee_email, event_id)))?;
        // Stored casing of the address is kept
        attendee.status = Some(ResponseStatus {
            response: Some(to_graph_response(status).to_string()),
            time: None,
        });
        self.patch_event(&event_id, &json!({ "attendees": attendees }))
            .await?;
        debug!("RSVP of {} on {} set to {:?}", attendee_email, event_id, status);
        Ok(())
    }

    /// `calendarView` requests for every calendar in one or more `$batch`
    /// calls. Each calendar gets its own result so a failing calendar can
    /// fall back on its own.
    async fn batch_calendar_views(
        &self,
        calendar_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<(String, MeetsyncResult<Vec<GraphEvent>>)>> {
        let mut results = Vec::new();
        for chunk in calendar_ids.chunks(BATCH_LIMIT) {
            let requests = chunk
                .iter()
                .enumerate()
                .map(|(index, calendar_id)| -> MeetsyncResult<BatchRequestItem> {
                    Ok(BatchRequestItem {
                        id: index.to_string(),
                        method: "GET".to_string(),
                        url: calendar_view_path(calendar_id, start, end)?,
                        headers: json!({ "Prefer": PREFER_UTC }),
                    })
                })
                .collect::<MeetsyncResult<Vec<_>>>()?;

            let url = self.url(&["$batch"])?;
            let builder = self
                .request(Method::POST, url)
                .await?
                .json(&BatchRequest { requests });
            let batch: BatchResponse = self.send_json(builder).await?;

            for (index, calendar_id) in chunk.iter().enumerate() {
                let answer = batch.responses.iter().find(|r| r.id == index.to_string());
                let outcome = match answer {
                    Some(item) if (200..300).contains(&item.status) => {
                        self.read_batch_page(item.body.clone()).await
                    }
                    Some(item) => Err(MeetsyncError::Provider {
                        provider: PROVIDER.to_string(),
                        status: item.status,
                        message: item
                            .body
                            .as_ref()
                            .map(|b| b.to_string())
                            .unwrap_or_default(),
                    }),
                    None => Err(parse_error(format!(
                        "$batch answer lacks request {}",
                        index
                    ))),
                };
                results.push((calendar_id.clone(), outcome));
            }
        }
        Ok(results)
    }

    async fn read_batch_page(
        &self,
        body: Option<serde_json::Value>,
    ) -> MeetsyncResult<Vec<GraphEvent>> {
        let body = body.unwrap_or_else(|| json!({ "value": [] }));
        let mut page: GraphList<GraphEvent> = serde_json::from_value(body)?;
        let mut events = std::mem::take(&mut page.value);
        if let Some(next) = page.next_link {
            let builder = self.request(Method::GET, Url::parse(&next)?).await?;
            let (more, _) = self.collect_pages::<GraphEvent>(builder).await?;
            events.extend(more);
        }
        Ok(events)
    }

    /// Busy blocks of the account's own mailbox via `getSchedule`.
    async fn schedule_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>> {
        let url = self.url(&["me", "calendar", "getSchedule"])?;
        let request = ScheduleRequest {
            schedules: vec![self.email.clone()],
            start_time: graph_time(start),
            end_time: graph_time(end),
            availability_view_interval: SCHEDULE_INTERVAL_MINUTES,
        };
        let builder = self.request(Method::POST, url).await?.json(&request);
        let response: GraphList<ScheduleInformation> = self.send_json(builder).await?;

        let mut busy = Vec::new();
        for schedule in response.value {
            for item in schedule.schedule_items {
                if item.status == "free" {
                    continue;
                }
                let mut interval = EventBusyDate::new(
                    parse_graph_time(&item.start)?,
                    parse_graph_time(&item.end)?,
                    CalendarProvider::Office365.slot_source(),
                );
                interval.calendar_id = Some(calendar_id.to_string());
                interval.email = Some(schedule.schedule_id.clone());
                interval.title = item.subject;
                busy.push(interval);
            }
        }
        Ok(busy)
    }

    async fn delta_pages(
        &self,
        calendar_id: &str,
        delta_link: Option<&str>,
    ) -> MeetsyncResult<SyncPage> {
        let first = match delta_link {
            Some(link) => self.request(Method::GET, Url::parse(link)?).await?,
            None => {
                let now = Utc::now();
                let (back, ahead) = self.delta_window;
                let mut segments = calendar_segments(calendar_id);
                segments.extend(["calendarView", "delta"]);
                let url = self.url(&segments)?;
                self.request(Method::GET, url).await?.query(&[
                    (
                        "startDateTime",
                        (now - back).to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                    (
                        "endDateTime",
                        (now + ahead).to_rfc3339_opts(SecondsFormat::Secs, true),
                    ),
                ])
            }
        };
        let (items, delta) = self.collect_pages::<GraphEvent>(first).await?;
        let events = items
            .into_iter()
            .map(|event| to_unified(event, calendar_id, None, &self.email))
            .collect::<MeetsyncResult<Vec<_>>>()?;
        Ok(SyncPage {
            events,
            next_sync_token: delta,
        })
    }

    async fn create_subscription(
        &self,
        target_url: &str,
        calendar_id: Option<&str>,
    ) -> MeetsyncResult<WebhookChannel> {
        let resource = match calendar_id {
            Some(id) if !is_default_calendar(id) => format!("/me/calendars/{}/events", id),
            _ => "/me/events".to_string(),
        };
        let request = SubscriptionRequest {
            change_type: "created,updated,deleted".to_string(),
            notification_url: target_url.to_string(),
            resource,
            expiration_date_time: (Utc::now() + self.subscription_ttl)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            client_state: self.client_state.clone(),
        };
        let url = self.url(&["subscriptions"])?;
        let builder = self.request(Method::POST, url).await?.json(&request);
        let subscription: Subscription = self.send_json(builder).await?;
        info!(
            "Graph subscription {} on {} created",
            subscription.id, subscription.resource
        );
        Ok(to_channel(subscription, target_url, calendar_id))
    }

}

fn is_default_calendar(calendar_id: &str) -> bool {
    calendar_id.is_empty() || calendar_id == "primary"
}

fn calendar_segments(calendar_id: &str) -> Vec<&str> {
    if is_default_calendar(calendar_id) {
        vec!["me", "calendar"]
    } else {
        vec!["me", "calendars", calendar_id]
    }
}

/// Path and query of a `calendarView` request relative to the Graph version
/// root, as `$batch` items expect.
fn calendar_view_path(
    calendar_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> MeetsyncResult<String> {
    let mut url = Url::parse("https://graph.invalid/")?;
    let mut segments = calendar_segments(calendar_id);
    segments.push("calendarView");
    url.path_segments_mut()
        .map_err(|_| config_error("batch URL cannot be a base"))?
        .pop_if_empty()
        .extend(segments);
    url.query_pairs_mut()
        .append_pair("startDateTime", &start.to_rfc3339_opts(SecondsFormat::Secs, true))
        .append_pair("endDateTime", &end.to_rfc3339_opts(SecondsFormat::Secs, true))
        .append_pair("$select", "id,subject,start,end,showAs,isCancelled,responseStatus")
        .append_pair("$top", PAGE_SIZE);
    Ok(url[Position::BeforePath..].to_string())
}

fn to_channel(subscription: Subscription, target_url: &str, calendar_id: Option<&str>) -> WebhookChannel {
    let expiration = subscription
        .expiration_date_time
        .as_deref()
        .and_then(|e| DateTime::parse_from_rfc3339(e).ok())
        .map(|e| e.with_timezone(&Utc));
    WebhookChannel {
        channel_id: subscription.id,
        resource_id: subscription.resource,
        expiration,
        target_url: target_url.to_string(),
        calendar_id: calendar_id.unwrap_or("primary").to_string(),
    }
}

#[async_trait]
impl CalendarIntegration for Office365CalendarIntegration {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Office365
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

        match self.find_by_meeting_id(&details.meeting_id, calendar_id).await {
            Ok(Some(existing)) => {
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
            Ok(None) => {}
            Err(e) => warn!("lookup of meeting {} failed before insert: {}", details.meeting_id, e),
        }

        let mut body = build_event(
            owner,
            details,
            &self.email,
            include_participants,
            Some(requested_at),
        )?;
        body.transaction_id = Some(details.meeting_id.clone());

        let created = match self.insert_event(calendar_id, &body).await {
            Ok(created) => created,
            Err(e) if e.status() == Some(409) => {
                self.require_by_meeting_id(&details.meeting_id, calendar_id)
                    .await?
            }
            Err(e) => return Err(e),
        };
        info!(
            "created Graph event {:?} for meeting {}",
            created.id, details.meeting_id
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
        let current = self
            .require_by_meeting_id(&details.meeting_id, calendar_id)
            .await?;
        let event_id = current
            .id
            .clone()
            .ok_or_else(|| not_found(format!("meeting {} has no Graph id", details.meeting_id)))?;

        let mut desired = build_event(owner, details, &self.email, true, None)?;
        carry_over_from_current(&mut desired, &current, &self.email);

        let updated = if is_series_instance(&current) {
            debug!("{} is a series instance, patching changed fields", event_id);
            let body = patch_body(&current, &desired)?;
            self.patch_event(&event_id, &body).await?
        } else {
            self.patch_event(&event_id, &desired).await?
        };

        Ok(to_new_calendar_event(
            &details.meeting_id,
            calendar_id,
            &updated,
            details.meeting_url.as_deref(),
        ))
    }

    async fn delete_event(&self, meeting_id: &str, calendar_id: &str) -> MeetsyncResult<()> {
        let Some(event_id) = self
            .find_by_meeting_id(meeting_id, calendar_id)
            .await?
            .and_then(|e| e.id)
        else {
            debug!("meeting {} has no Graph event left", meeting_id);
            return Ok(());
        };

        let url = self.url(&["me", "events", event_id.as_str()])?;
        let builder = self.request(Method::DELETE, url).await?;
        match self.send(builder).await {
            Ok(_) => {
                info!("deleted Graph event {} for meeting {}", event_id, meeting_id);
                Ok(())
            }
            Err(e) if e.is_gone() => {
                debug!("Graph event {} was already deleted", event_id);
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
        let mut busy = Vec::new();
        let mut needs_schedule = Vec::new();

        match self.batch_calendar_views(calendar_ids, start, end).await {
            Ok(results) => {
                for (calendar_id, outcome) in results {
                    match outcome {
                        Ok(events) => {
                            for event in &events {
                                if let Some(interval) = to_busy(event, &calendar_id, &self.email)? {
                                    busy.push(interval);
                                }
                            }
                        }
                        Err(e) => {
                            warn!(
                                "calendarView of {} failed ({}), falling back to getSchedule",
                                calendar_id, e
                            );
                            needs_schedule.push(calendar_id);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("$batch failed ({}), falling back to getSchedule", e);
                needs_schedule.extend(calendar_ids.iter().cloned());
            }
        }

        for calendar_id in needs_schedule {
            match self.schedule_busy(&calendar_id, start, end).await {
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
        match self.delta_pages(calendar_id, sync_token).await {
            Err(e) if sync_token.is_some() && e.status() == Some(410) => {
                warn!(
                    "delta link of {} expired, running a full sync",
                    calendar_id
                );
                self.delta_pages(calendar_id, None).await
            }
            other => other,
        }
    }

    async fn get_event_by_id(
        &self,
        event_id: &str,
        calendar_id: &str,
    ) -> MeetsyncResult<Option<UnifiedEvent>> {
        let mut found = self.fetch_for_lookup(event_id).await?;
        if found.is_none() {
            if let Some(alternate) = alternate_event_id(event_id) {
                debug!("{} not found, retrying as {}", event_id, alternate);
                found = self.fetch_for_lookup(&alternate).await?;
            }
        }
        found
            .map(|event| to_unified(event, calendar_id, None, &self.email))
            .transpose()
    }

    async fn update_event_rsvp(
        &self,
        meeting_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        calendar_id: &str,
    ) -> MeetsyncResult<()> {
        let event = self.require_by_meeting_id(meeting_id, calendar_id).await?;
        self.apply_rsvp(event, attendee_email, status).await
    }

    async fn update_event_rsvp_for_external_event(
        &self,
        event_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        _calendar_id: &str,
    ) -> MeetsyncResult<()> {
        let event = self.fetch_event(event_id).await?;
        self.apply_rsvp(event, attendee_email, status).await
    }

    async fn update_event_extended_properties(
        &self,
        meeting_id: &str,
        calendar_id: &str,
        properties: &BTreeMap<String, String>,
    ) -> MeetsyncResult<()> {
        let event = self.require_by_meeting_id(meeting_id, calendar_id).await?;
        let event_id = event
            .id
            .ok_or_else(|| not_found(format!("meeting {} has no Graph id", meeting_id)))?;

        // Graph merges single-value properties, unrelated keys stay as they are
        let mut values = properties.clone();
        values.insert(UPDATED_BY_KEY.to_string(), UPDATED_BY_MARKER.to_string());
        self.patch_event(
            &event_id,
            &json!({ "singleValueExtendedProperties": to_properties(&values) }),
        )
        .await?;
        Ok(())
    }

    /// The default calendar carries the mailbox address as its name, the way
    /// Google names the primary calendar.
    async fn list_calendars(&self) -> MeetsyncResult<Vec<CalendarSyncInfo>> {
        let identity = match self.resolve_email().await {
            Ok(identity) => {
                if !emails_match(&identity, &self.email) {
                    warn!(
                        "Graph signs in as {} but the calendar is connected as {}",
                        identity, self.email
                    );
                }
                Some(identity)
            }
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                warn!("resolving the Graph mailbox of {} failed: {}", self.email, e);
                None
            }
        };

        let url = self.url(&["me", "calendars"])?;
        let builder = self.request(Method::GET, url).await?;
        let (calendars, _) = self.collect_pages::<GraphCalendar>(builder).await?;

        Ok(calendars
            .into_iter()
            .map(|calendar| {
                let is_default = calendar.is_default_calendar.unwrap_or(false);
                let name = match (&identity, is_default) {
                    (Some(identity), true) => identity.clone(),
                    _ => calendar.name.unwrap_or_else(|| calendar.id.clone()),
                };
                let mut info = CalendarSyncInfo::new(calendar.id, name);
                info.read_only = !calendar.can_edit.unwrap_or(true);
                info.color = calendar.hex_color.filter(|c| !c.is_empty());
                info.is_primary = is_default;
                info.sync = is_default;
                info
            })
            .collect())
    }

    async fn set_webhook_url(
        &self,
        target_url: &str,
        calendar_id: Option<&str>,
    ) -> MeetsyncResult<WebhookChannel> {
        self.create_subscription(target_url, calendar_id).await
    }

    async fn stop_webhook(&self, channel_id: &str, _resource_id: &str) -> MeetsyncResult<()> {
        let url = self.url(&["subscriptions", channel_id])?;
        let builder = self.request(Method::DELETE, url).await?;
        match self.send(builder).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_gone() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Rotates the subscription: the old one is deleted, a failed delete only
    /// logged, then a new one is created.
    async fn refresh_webhook(
        &self,
        channel_id: &str,
        resource_id: &str,
        target_url: &str,
        calendar_id: Option<&str>,
    ) -> MeetsyncResult<WebhookChannel> {
        if let Err(e) = self.stop_webhook(channel_id, resource_id).await {
            warn!("deleting subscription {} failed, continuing: {}", channel_id, e);
        }
        self.set_webhook_url(target_url, calendar_id).await
    }
}
