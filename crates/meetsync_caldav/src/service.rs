//! CalDAV implementation of [`CalendarIntegration`] (iCloud and generic
//! RFC 4791 servers).
//!
//! Every meeting lives in its own resource `{calendar}/{meeting id}.ics`, so
//! the meeting id doubles as UID and file name and a create can always be
//! checked for an earlier attempt. Calendar ids are collection URLs, as
//! returned by [`CalendarIntegration::list_calendars`]; `primary` stands for
//! the configured URL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use meetsync_common::models::{
    CalDavCredentialPayload, CalendarProvider, CalendarSyncInfo, EventBusyDate, MeetingDetails,
    NewCalendarEvent, ParticipationStatus, SyncPage, UnifiedEvent,
};
use meetsync_common::services::{
    alternate_event_id, CalendarIntegration, UPDATED_BY_KEY, UPDATED_BY_MARKER,
};
use meetsync_common::{
    check_status, config_error, not_found, Context, MeetsyncResult,
};
use meetsync_config::{reveal_secret, CalDavConfig};
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use url::Url;

use crate::dav::{
    calendar_multiget, calendar_query, free_busy_query, parse_multistatus, sync_collection,
    DavResponse, Multistatus, PROPFIND_CALENDARS, PROPFIND_CALENDAR_HOME, PROPFIND_PRINCIPAL,
};
use crate::ics::{
    append_components, master_event, parse_events, parse_free_busy, recurrence_overrides,
    set_partstat, set_properties, IcsEvent,
};
use crate::mapping::{
    build_ics, to_busy, to_new_calendar_event, to_partstat, to_properties, to_unified, tombstone,
    PROVIDER,
};

const PRIMARY_CALENDAR: &str = "primary";
const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";
const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
/// Upper bound on `sync-collection` continuations for a single sync.
const MAX_SYNC_ROUNDS: usize = 50;

/// A calendar object resource as read from the server.
struct StoredResource {
    etag: Option<String>,
    body: String,
    events: Vec<IcsEvent>,
}

impl StoredResource {
    fn master(&self) -> Option<&IcsEvent> {
        master_event(&self.events)
    }
}

/// Conditional header of a `PUT`.
enum Precondition {
    /// Fails with 412 when the resource exists.
    Absent,
    /// Fails with 412 when the resource changed. Unconditional without etag.
    Matches(Option<String>),
}

/// CalDAV adapter for one connected account. Uses basic auth; the
/// credential never expires, so there is no token manager.
pub struct CalDavCalendarIntegration {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    email: String,
    zone: Tz,
}

impl CalDavCalendarIntegration {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            email: email.into(),
            zone: Tz::UTC,
        }
    }

    /// Builds the adapter from a stored credential, decrypting the password
    /// and falling back to the configured server URL.
    pub fn from_payload(
        http: Client,
        payload: &CalDavCredentialPayload,
        config: &CalDavConfig,
        email: impl Into<String>,
    ) -> MeetsyncResult<Self> {
        let password = reveal_secret(config.credential_key.as_deref(), &payload.password)?;
        let url = payload
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| config.default_url.clone());
        Ok(Self::new(http, url, payload.username.clone(), password, email))
    }

    /// Zone used for floating and all-day times.
    pub fn with_time_zone(mut self, zone: Tz) -> Self {
        self.zone = zone;
        self
    }

    fn base(&self) -> MeetsyncResult<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    fn calendar_url(&self, calendar_id: &str) -> MeetsyncResult<Url> {
        let mut url = match calendar_id.trim() {
            "" | PRIMARY_CALENDAR => self.base()?,
            id if id.starts_with("http://") || id.starts_with("https://") => Url::parse(id)?,
            id => self.base()?.join(id)?,
        };
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    fn resource_url(&self, calendar_id: &str, uid: &str) -> MeetsyncResult<Url> {
        let mut url = self.calendar_url(calendar_id)?;
        let file = format!("{}.ics", uid.trim_end_matches(".ics"));
        url.path_segments_mut()
            .map_err(|_| config_error(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .push(&file);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn send(&self, builder: RequestBuilder) -> MeetsyncResult<Response> {
        let response = builder.send().await?;
        check_status(PROVIDER, response).await
    }

    async fn dav(&self, verb: &str, url: Url, depth: &str, body: String) -> MeetsyncResult<String> {
        let method = Method::from_bytes(verb.as_bytes())
            .with_context(|| format!("invalid method {}", verb))?;
        let builder = self
            .request(method, url)
            .header("Depth", depth)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(body);
        Ok(self.send(builder).await?.text().await?)
    }

    async fn multistatus(
        &self,
        verb: &str,
        url: Url,
        depth: &str,
        body: String,
    ) -> MeetsyncResult<Multistatus> {
        parse_multistatus(&self.dav(verb, url, depth, body).await?)
    }

    /// `Ok(None)` when the resource does not exist.
    async fn fetch(&self, url: &Url) -> MeetsyncResult<Option<StoredResource>> {
        let response = match self.send(self.request(Method::GET, url.clone())).await {
            Ok(response) => response,
            Err(e) if e.is_gone() => return Ok(None),
            Err(e) => return Err(e),
        };
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        let events = parse_events(&body)?;
        Ok(Some(StoredResource { etag, body, events }))
    }

    async fn require(&self, url: &Url) -> MeetsyncResult<StoredResource> {
        self.fetch(url)
            .await?
            .ok_or_else(|| not_found(format!("no calendar object at {}", url)))
    }

    async fn put(&self, url: Url, body: String, precondition: Precondition) -> MeetsyncResult<()> {
        let mut builder = self
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, ICS_CONTENT_TYPE)
            .body(body);
        builder = match precondition {
            Precondition::Absent => builder.header(IF_NONE_MATCH, "*"),
            Precondition::Matches(Some(etag)) => builder.header(IF_MATCH, etag),
            Precondition::Matches(None) => builder,
        };
        self.send(builder).await?;
        Ok(())
    }

    async fn write_update(
        &self,
        owner: &str,
        details: &MeetingDetails,
        url: &Url,
    ) -> MeetsyncResult<()> {
        let stored = self.require(url).await?;
        let mut body = build_ics(owner, details, &self.email, true, None, stored.master())?;
        if !details.recurrence.is_empty() {
            // instance overrides stay attached to the rewritten series
            body = append_components(&body, &recurrence_overrides(&stored.body)?)?;
        }
        self.put(url.clone(), body, Precondition::Matches(stored.etag))
            .await
    }

    async fn calendar_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>> {
        let url = self.calendar_url(calendar_id)?;
        let listing = self
            .multistatus("REPORT", url.clone(), "1", calendar_query(start, end, true))
            .await;

        let responses = match listing {
            Ok(listing) => listing.responses,
            Err(e) => {
                warn!(
                    "calendar-query on {} failed ({}), asking for free-busy instead",
                    calendar_id, e
                );
                return self.free_busy(calendar_id, url, start, end).await;
            }
        };

        let mut busy = Vec::new();
        for response in responses {
            let Some(data) = response.calendar_data.as_deref() else {
                continue;
            };
            let events = match parse_events(data) {
                Ok(events) => events,
                Err(e) => {
                    debug!("Skipping unreadable resource {}: {}", response.href, e);
                    continue;
                }
            };
            busy.extend(
                events
                    .iter()
                    .filter_map(|e| to_busy(e, calendar_id, &self.email, self.zone))
                    .filter(|b| b.start < end && b.end > start),
            );
        }
        Ok(busy)
    }

    async fn free_busy(
        &self,
        calendar_id: &str,
        url: Url,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>> {
        let body = self
            .dav("REPORT", url, "1", free_busy_query(start, end))
            .await?;
        Ok(parse_free_busy(&body)?
            .into_iter()
            .map(|(from, to)| {
                let mut busy =
                    EventBusyDate::new(from, to, CalendarProvider::CalDav.slot_source());
                busy.calendar_id = Some(calendar_id.to_string());
                busy.email = Some(self.email.clone());
                busy
            })
            .collect())
    }

    fn unify(&self, calendar_id: &str, response: &DavResponse) -> Vec<UnifiedEvent> {
        let Some(data) = response.calendar_data.as_deref() else {
            return Vec::new();
        };
        match parse_events(data) {
            Ok(events) => events
                .iter()
                .map(|e| to_unified(e, calendar_id, None, &self.email, self.zone))
                .collect(),
            Err(e) => {
                warn!("Skipping unreadable resource {}: {}", response.href, e);
                Vec::new()
            }
        }
    }

    /// Runs `sync-collection` from `sync_token`, following truncated answers
    /// with the token each one hands out.
    async fn sync(&self, calendar_id: &str, sync_token: Option<&str>) -> MeetsyncResult<SyncPage> {
        let url = self.calendar_url(calendar_id)?;
        let mut token = sync_token.map(str::to_string);
        let mut events = Vec::new();
        let mut without_data = Vec::new();

        for round in 1..=MAX_SYNC_ROUNDS {
            let listing = self
                .multistatus("REPORT", url.clone(), "1", sync_collection(token.as_deref()))
                .await?;

            for response in &listing.responses {
                if response.is_truncated() || response.href.ends_with('/') {
                    continue;
                }
                if response.is_missing() {
                    events.push(tombstone(&uid_of(&response.href), calendar_id, &self.email));
                } else if response.calendar_data.is_some() {
                    events.extend(self.unify(calendar_id, response));
                } else {
                    without_data.push(response.href.clone());
                }
            }

            let advanced = listing.sync_token.is_some() && listing.sync_token != token;
            let truncated = listing.is_truncated();
            token = listing.sync_token;
            if !truncated {
                break;
            }
            if !advanced {
                warn!(
                    "sync-collection of {} was truncated without a new token, stopping",
                    calendar_id
                );
                break;
            }
            if round == MAX_SYNC_ROUNDS {
                warn!(
                    "sync-collection of {} still truncated after {} rounds",
                    calendar_id, round
                );
            } else {
                debug!("sync-collection of {} was truncated, continuing", calendar_id);
            }
        }

        if !without_data.is_empty() {
            debug!(
                "Fetching {} changed resources of {} with calendar-multiget",
                without_data.len(),
                calendar_id
            );
            let fetched = self
                .multistatus("REPORT", url, "1", calendar_multiget(&without_data))
                .await?;
            for response in &fetched.responses {
                if response.is_missing() {
                    events.push(tombstone(&uid_of(&response.href), calendar_id, &self.email));
                } else {
                    events.extend(self.unify(calendar_id, response));
                }
            }
        }

        Ok(SyncPage {
            events,
            next_sync_token: token,
        })
    }

    async fn lookup(&self, calendar_id: &str, event_id: &str) -> MeetsyncResult<Option<UnifiedEvent>> {
        let url = self.resource_url(calendar_id, event_id)?;
        Ok(self.fetch(&url).await?.and_then(|stored| {
            stored
                .master()
                .map(|e| to_unified(e, calendar_id, None, &self.email, self.zone))
        }))
    }

    async fn apply_rsvp(
        &self,
        url: Url,
        attendee_email: &str,
        status: ParticipationStatus,
    ) -> MeetsyncResult<()> {
        let stored = self.require(&url).await?;
        let body = set_partstat(&stored.body, attendee_email, to_partstat(status))?
            .ok_or_else(|| not_found(format!("{} is not invited to {}", attendee_email, url)))?;
        self.put(url, body, Precondition::Matches(stored.etag)).await
    }

    /// Calendar home of the account, found through `current-user-principal`
    /// and `calendar-home-set`. Servers that answer neither are treated as
    /// serving the calendars directly under the configured URL.
    async fn calendar_home(&self) -> MeetsyncResult<Url> {
        let base = self.base()?;
        let principal = match self
            .multistatus("PROPFIND", base.clone(), "0", PROPFIND_PRINCIPAL.to_string())
            .await
        {
            Ok(found) => found
                .responses
                .into_iter()
                .find_map(|r| r.current_user_principal),
            Err(e) => {
                debug!("current-user-principal lookup failed: {}", e);
                None
            }
        };
        let Some(principal) = principal else {
            return Ok(base);
        };

        let principal = base.join(&principal)?;
        let home = self
            .multistatus("PROPFIND", principal, "0", PROPFIND_CALENDAR_HOME.to_string())
            .await?
            .responses
            .into_iter()
            .find_map(|r| r.calendar_home);
        match home {
            Some(home) => Ok(base.join(&home)?),
            None => Ok(base),
        }
    }
}

/// UID of a resource from its href, `/cal/abc.ics` -> `abc`.
fn uid_of(href: &str) -> String {
    let file = href.rsplit('/').next().unwrap_or(href);
    file.strip_suffix(".ics").unwrap_or(file).to_string()
}

#[async_trait]
impl CalendarIntegration for CalDavCalendarIntegration {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::CalDav
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
        let url = self.resource_url(calendar_id, &details.meeting_id)?;
        let meeting_url = details.meeting_url.as_deref();

        match self.fetch(&url).await {
            Ok(Some(existing)) => {
                info!(
                    "meeting {} already stored at {}, skipping create",
                    details.meeting_id, url
                );
                return Ok(to_new_calendar_event(
                    &details.meeting_id,
                    calendar_id,
                    url.as_str(),
                    existing.master(),
                    meeting_url,
                ));
            }
            Ok(None) => {}
            Err(e) => warn!(
                "lookup of meeting {} failed ({}), creating anyway",
                details.meeting_id, e
            ),
        }

        let body = build_ics(
            owner,
            details,
            &self.email,
            include_participants,
            Some(requested_at),
            None,
        )?;
        match self.put(url.clone(), body, Precondition::Absent).await {
            Ok(()) => {
                info!("created CalDAV event for meeting {} at {}", details.meeting_id, url);
                Ok(to_new_calendar_event(
                    &details.meeting_id,
                    calendar_id,
                    url.as_str(),
                    None,
                    meeting_url,
                ))
            }
            Err(e) if e.status() == Some(412) => {
                info!(
                    "meeting {} was created concurrently, returning the stored event",
                    details.meeting_id
                );
                let existing = self.require(&url).await?;
                Ok(to_new_calendar_event(
                    &details.meeting_id,
                    calendar_id,
                    url.as_str(),
                    existing.master(),
                    meeting_url,
                ))
            }
            Err(e) => Err(e),
        }
    }

    async fn update_event(
        &self,
        owner: &str,
        details: &MeetingDetails,
        calendar_id: &str,
    ) -> MeetsyncResult<NewCalendarEvent> {
        details.validate()?;
        let url = self.resource_url(calendar_id, &details.meeting_id)?;

        match self.write_update(owner, details, &url).await {
            Err(e) if e.status() == Some(412) => {
                warn!(
                    "meeting {} changed on the server while updating, retrying once",
                    details.meeting_id
                );
                self.write_update(owner, details, &url).await?;
            }
            other => other?,
        }
        info!("updated CalDAV event for meeting {}", details.meeting_id);

        Ok(to_new_calendar_event(
            &details.meeting_id,
            calendar_id,
            url.as_str(),
            None,
            details.meeting_url.as_deref(),
        ))
    }

    async fn delete_event(&self, meeting_id: &str, calendar_id: &str) -> MeetsyncResult<()> {
        let url = self.resource_url(calendar_id, meeting_id)?;
        match self.send(self.request(Method::DELETE, url.clone())).await {
            Ok(_) => {
                info!("deleted CalDAV event {}", url);
                Ok(())
            }
            Err(e) if e.is_gone() => {
                debug!("{} was already deleted", url);
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
        match self.sync(calendar_id, sync_token).await {
            Err(e) if sync_token.is_some() && matches!(e.status(), Some(403 | 409 | 410)) => {
                warn!(
                    "sync token of {} was rejected ({}), running a full sync",
                    calendar_id, e
                );
                self.sync(calendar_id, None).await
            }
            other => other,
        }
    }

    async fn get_event_by_id(
        &self,
        event_id: &str,
        calendar_id: &str,
    ) -> MeetsyncResult<Option<UnifiedEvent>> {
        if let Some(event) = self.lookup(calendar_id, event_id).await? {
            return Ok(Some(event));
        }
        match alternate_event_id(event_id.trim_end_matches(".ics")) {
            Some(alternate) => {
                debug!("{} not found, retrying as {}", event_id, alternate);
                self.lookup(calendar_id, &alternate).await
            }
            None => Ok(None),
        }
    }

    async fn update_event_rsvp(
        &self,
        meeting_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        calendar_id: &str,
    ) -> MeetsyncResult<()> {
        let url = self.resource_url(calendar_id, meeting_id)?;
        self.apply_rsvp(url, attendee_email, status).await
    }

    async fn update_event_rsvp_for_external_event(
        &self,
        event_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
        calendar_id: &str,
    ) -> MeetsyncResult<()> {
        let url = self.resource_url(calendar_id, event_id)?;
        self.apply_rsvp(url, attendee_email, status).await
    }

    async fn update_event_extended_properties(
        &self,
        meeting_id: &str,
        calendar_id: &str,
        properties: &BTreeMap<String, String>,
    ) -> MeetsyncResult<()> {
        let url = self.resource_url(calendar_id, meeting_id)?;
        let stored = self.require(&url).await?;

        let mut merged = properties.clone();
        merged.insert(UPDATED_BY_KEY.to_string(), UPDATED_BY_MARKER.to_string());
        let body = set_properties(&stored.body, &to_properties(&merged))?;
        self.put(url, body, Precondition::Matches(stored.etag)).await
    }

    async fn list_calendars(&self) -> MeetsyncResult<Vec<CalendarSyncInfo>> {
        let home = self.calendar_home().await?;
        let listing = self
            .multistatus("PROPFIND", home.clone(), "1", PROPFIND_CALENDARS.to_string())
            .await?;

        let mut calendars = Vec::new();
        for response in listing.responses.iter().filter(|r| r.holds_events()) {
            let url = home.join(&response.href)?;
            let name = response
                .display_name
                .clone()
                .unwrap_or_else(|| uid_of(response.href.trim_end_matches('/')));
            let mut info = CalendarSyncInfo::new(url.as_str(), name);
            info.read_only = response.can_write == Some(false);
            info.color = response.color.clone();
            calendars.push(info);
        }

        // the first writable calendar receives meetings
        if let Some(first) = calendars.iter_mut().find(|c| !c.read_only) {
            first.is_primary = true;
            first.sync = true;
        }
        Ok(calendars)
    }
}
