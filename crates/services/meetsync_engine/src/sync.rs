//! Fan-out of meeting changes to every connected calendar of an account.
//!
//! Provider failures never fail the scheduling action: each one is handed to
//! the [`ErrorSink`] and listed in the returned [`SyncReport`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use meetsync_availability::{
    collect_busy_events, compute_free_time, month_window, BusySource, Interval,
    ParticipantAvailability, ParticipantAvailabilityInput, WeeklySchedule,
};
use meetsync_common::models::{
    CalendarProvider, ConnectedCalendar, EventBusyDate, MeetingDetails, ParticipantType,
    ParticipationStatus, UnifiedEvent, WebhookChannel,
};
use meetsync_common::{
    CalendarIntegration, ConnectedCalendarStore, ErrorSink, MeetsyncError, MeetsyncResult,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::factory::IntegrationFactory;

/// One calendar a change was written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncTarget {
    pub provider: CalendarProvider,
    pub email: String,
    pub calendar_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub provider: Option<CalendarProvider>,
    pub email: Option<String>,
    pub calendar_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SyncReport {
    pub succeeded: Vec<SyncTarget>,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: SyncReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }
}

/// Changes of one calendar since its stored sync token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarChanges {
    pub provider: CalendarProvider,
    pub email: String,
    pub calendar_id: String,
    pub events: Vec<UnifiedEvent>,
    pub next_sync_token: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum MeetingChange<'a> {
    Created {
        details: &'a MeetingDetails,
        requested_at: DateTime<Utc>,
    },
    Updated {
        details: &'a MeetingDetails,
    },
    Deleted {
        meeting_id: &'a str,
    },
    Rsvp {
        meeting_id: &'a str,
        attendee_email: &'a str,
        status: ParticipationStatus,
    },
}

impl MeetingChange<'_> {
    fn verb(&self) -> &'static str {
        match self {
            MeetingChange::Created { .. } => "create",
            MeetingChange::Updated { .. } => "update",
            MeetingChange::Deleted { .. } => "delete",
            MeetingChange::Rsvp { .. } => "rsvp",
        }
    }
}

pub struct CalendarSyncService {
    store: Arc<dyn ConnectedCalendarStore>,
    factory: Arc<dyn IntegrationFactory>,
    sink: Arc<dyn ErrorSink>,
    default_schedule: WeeklySchedule,
    time_zone: Tz,
}

impl CalendarSyncService {
    pub fn new(
        store: Arc<dyn ConnectedCalendarStore>,
        factory: Arc<dyn IntegrationFactory>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            store,
            factory,
            sink,
            default_schedule: WeeklySchedule::new(),
            time_zone: Tz::UTC,
        }
    }

    /// Schedule and zone used when a participant brings neither.
    pub fn with_availability_defaults(mut self, schedule: WeeklySchedule, time_zone: Tz) -> Self {
        self.default_schedule = schedule;
        self.time_zone = time_zone;
        self
    }

    /// Writes a new meeting to the owner's calendars. Invalid details are
    /// rejected before any provider is contacted.
    pub async fn sync_created_meeting(
        &self,
        owner: &str,
        details: &MeetingDetails,
        requested_at: DateTime<Utc>,
    ) -> MeetsyncResult<SyncReport> {
        details.validate()?;
        Ok(self
            .fan_out(
                owner,
                MeetingChange::Created {
                    details,
                    requested_at,
                },
            )
            .await)
    }

    pub async fn sync_updated_meeting(
        &self,
        owner: &str,
        details: &MeetingDetails,
    ) -> MeetsyncResult<SyncReport> {
        details.validate()?;
        Ok(self.fan_out(owner, MeetingChange::Updated { details }).await)
    }

    pub async fn sync_deleted_meeting(&self, owner: &str, meeting_id: &str) -> SyncReport {
        self.fan_out(owner, MeetingChange::Deleted { meeting_id }).await
    }

    pub async fn sync_rsvp(
        &self,
        owner: &str,
        meeting_id: &str,
        attendee_email: &str,
        status: ParticipationStatus,
    ) -> SyncReport {
        self.fan_out(
            owner,
            MeetingChange::Rsvp {
                meeting_id,
                attendee_email,
                status,
            },
        )
        .await
    }

    /// Busy intervals of every enabled calendar across the account's
    /// connections. Connections that cannot be reached are skipped.
    pub async fn busy_times_for_account(
        &self,
        account_address: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<EventBusyDate> {
        let Some(connections) = self.connections(account_address, "busy times").await else {
            return Vec::new();
        };
        self.busy_times(&connections, Interval::new(start, end)).await
    }

    /// Free time of the account over one calendar month. Busy data comes from
    /// the connected calendars; the configured schedule and zone fill in for a
    /// participant that has none.
    pub async fn month_availability(
        &self,
        account_address: &str,
        year: i32,
        month: u32,
        mut input: ParticipantAvailabilityInput,
        time_zone: Option<Tz>,
    ) -> MeetsyncResult<ParticipantAvailability> {
        let tz = time_zone.unwrap_or(self.time_zone);
        let window = month_window(year, month, tz)?;

        let connections = self
            .connections(account_address, "month availability")
            .await
            .unwrap_or_default();
        if !connections.is_empty() {
            input.has_connected_account = true;
            let busy = self.busy_times(&connections, window).await;
            input.busy.extend(busy.iter().map(Interval::from));
        }
        if input.default_schedule.is_none() && !self.default_schedule.is_empty() {
            input.default_schedule = Some(self.default_schedule.clone());
        }

        Ok(compute_free_time(&input, window, tz))
    }

    /// Renews the push channels of every enabled calendar. A calendar with a
    /// channel in `existing` is rotated, others get a new channel. Providers
    /// without push support are skipped.
    pub async fn refresh_webhooks(
        &self,
        account_address: &str,
        target_url: &str,
        existing: &[WebhookChannel],
    ) -> Vec<WebhookChannel> {
        let Some(connections) = self.connections(account_address, "webhook refresh").await else {
            return Vec::new();
        };

        let mut channels = Vec::new();
        for connection in &connections {
            let Some(integration) = self.integration(connection) else {
                continue;
            };
            for calendar_id in connection.enabled_calendar_ids() {
                let result = match existing.iter().find(|c| c.calendar_id == calendar_id) {
                    Some(channel) => {
                        integration
                            .refresh_webhook(
                                &channel.channel_id,
                                &channel.resource_id,
                                target_url,
                                Some(&calendar_id),
                            )
                            .await
                    }
                    None => integration.set_webhook_url(target_url, Some(&calendar_id)).await,
                };
                match result {
                    Ok(channel) => {
                        info!(
                            "push channel {} active for {} {}",
                            channel.channel_id, connection.email, calendar_id
                        );
                        channels.push(channel);
                    }
                    Err(MeetsyncError::Unsupported(_)) => {
                        debug!("{} has no push channels, skipping", connection.provider);
                        break;
                    }
                    Err(e) => self.sink.capture(
                        &e,
                        &context("webhook", connection.provider, &connection.email, Some(&calendar_id)),
                    ),
                }
            }
        }
        channels
    }

    /// Lists changes of every enabled calendar since its stored sync token
    /// and stores the new token.
    pub async fn incremental_sync(&self, account_address: &str) -> Vec<CalendarChanges> {
        let Some(connections) = self.connections(account_address, "incremental sync").await else {
            return Vec::new();
        };

        let mut changes = Vec::new();
        for connection in &connections {
            let Some(integration) = self.integration(connection) else {
                continue;
            };
            for calendar in connection.calendars.iter().filter(|c| c.enabled) {
                let ctx = context("sync", connection.provider, &connection.email, Some(&calendar.calendar_id));
                let page = match integration
                    .list_events(&calendar.calendar_id, calendar.sync_token.as_deref())
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        self.sink.capture(&e, &ctx);
                        continue;
                    }
                };
                if let Err(e) = self
                    .store
                    .update_sync_token(
                        account_address,
                        &connection.email,
                        connection.provider,
                        &calendar.calendar_id,
                        page.next_sync_token.clone(),
                    )
                    .await
                {
                    self.sink.capture(&e, &ctx);
                }
                debug!("{}: {} changed events", ctx, page.events.len());
                changes.push(CalendarChanges {
                    provider: connection.provider,
                    email: connection.email.clone(),
                    calendar_id: calendar.calendar_id.clone(),
                    events: page.events,
                    next_sync_token: page.next_sync_token,
                });
            }
        }
        changes
    }

    async fn fan_out(&self, owner: &str, change: MeetingChange<'_>) -> SyncReport {
        let Some(connections) = self.connections(owner, change.verb()).await else {
            return SyncReport {
                succeeded: vec![],
                failed: vec![SyncFailure {
                    provider: None,
                    email: None,
                    calendar_id: None,
                    error: format!("connected calendars of {} unavailable", owner),
                }],
            };
        };

        let jobs = connections
            .iter()
            .map(|connection| self.apply_to_connection(owner, connection, change));
        let mut report = SyncReport::default();
        for partial in join_all(jobs).await {
            report.merge(partial);
        }
        if !report.is_clean() {
            warn!(
                "{} of meeting for {}: {} calendars failed",
                change.verb(),
                owner,
                report.failed.len()
            );
        }
        report
    }

    // Calendars of one connection are written one after another.
    async fn apply_to_connection(
        &self,
        owner: &str,
        connection: &ConnectedCalendar,
        change: MeetingChange<'_>,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let targets: Vec<String> = connection
            .sync_targets()
            .map(|c| c.calendar_id.clone())
            .collect();
        if targets.is_empty() {
            return report;
        }

        let integration = match self.factory.create(connection) {
            Ok(integration) => integration,
            Err(e) => {
                self.sink
                    .capture(&e, &context(change.verb(), connection.provider, &connection.email, None));
                report.failed.push(SyncFailure {
                    provider: Some(connection.provider),
                    email: Some(connection.email.clone()),
                    calendar_id: None,
                    error: e.to_string(),
                });
                return report;
            }
        };

        for calendar_id in targets {
            let result = apply_change(integration.as_ref(), owner, &calendar_id, change).await;
            match result {
                Ok(()) => report.succeeded.push(SyncTarget {
                    provider: connection.provider,
                    email: connection.email.clone(),
                    calendar_id,
                }),
                Err(e) => {
                    self.sink.capture(
                        &e,
                        &context(change.verb(), connection.provider, &connection.email, Some(&calendar_id)),
                    );
                    report.failed.push(SyncFailure {
                        provider: Some(connection.provider),
                        email: Some(connection.email.clone()),
                        calendar_id: Some(calendar_id),
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn busy_times(&self, connections: &[ConnectedCalendar], window: Interval) -> Vec<EventBusyDate> {
        let integrations: Vec<(Box<dyn CalendarIntegration>, Vec<String>)> = connections
            .iter()
            .filter_map(|c| self.integration(c).map(|i| (i, c.enabled_calendar_ids())))
            .collect();
        let sources: Vec<BusySource<'_>> = integrations
            .iter()
            .map(|(integration, ids)| BusySource::new(integration.as_ref(), ids.clone()))
            .collect();
        collect_busy_events(&sources, window).await
    }

    async fn connections(&self, account_address: &str, purpose: &str) -> Option<Vec<ConnectedCalendar>> {
        match self.store.get_connected_calendars(account_address).await {
            Ok(connections) => Some(connections),
            Err(e) => {
                self.sink
                    .capture(&e, &format!("{}: loading connections of {}", purpose, account_address));
                None
            }
        }
    }

    fn integration(&self, connection: &ConnectedCalendar) -> Option<Box<dyn CalendarIntegration>> {
        match self.factory.create(connection) {
            Ok(integration) => Some(integration),
            Err(e) => {
                self.sink
                    .capture(&e, &context("connect", connection.provider, &connection.email, None));
                None
            }
        }
    }
}

async fn apply_change(
    integration: &dyn CalendarIntegration,
    owner: &str,
    calendar_id: &str,
    change: MeetingChange<'_>,
) -> MeetsyncResult<()> {
    match change {
        MeetingChange::Created {
            details,
            requested_at,
        } => {
            let include_participants = sends_invitations(owner, details);
            let created = integration
                .create_event(owner, details, requested_at, calendar_id, include_participants)
                .await?;
            debug!("meeting {} stored as {}", details.meeting_id, created.provider_event_id);
        }
        MeetingChange::Updated { details } => {
            integration.update_event(owner, details, calendar_id).await?;
        }
        MeetingChange::Deleted { meeting_id } => {
            integration.delete_event(meeting_id, calendar_id).await?;
        }
        MeetingChange::Rsvp {
            meeting_id,
            attendee_email,
            status,
        } => {
            integration
                .update_event_rsvp(meeting_id, attendee_email, status, calendar_id)
                .await?;
        }
    }
    Ok(())
}

/// Only the scheduler's copy carries the guest list, so guests get one
/// invitation instead of one per participant calendar.
pub fn sends_invitations(owner: &str, details: &MeetingDetails) -> bool {
    details.participants.iter().any(|p| {
        p.participant_type == ParticipantType::Scheduler
            && p.account_address
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(owner))
    })
}

fn context(verb: &str, provider: CalendarProvider, email: &str, calendar_id: Option<&str>) -> String {
    match calendar_id {
        Some(calendar_id) => format!("{} {} {} {}", verb, provider, email, calendar_id),
        None => format!("{} {} {}", verb, provider, email),
    }
}
