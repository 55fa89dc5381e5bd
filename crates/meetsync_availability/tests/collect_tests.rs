use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use meetsync_availability::{collect_busy_events, collect_busy_times, BusySource, Interval};
use meetsync_common::models::*;
use meetsync_common::{provider_error, unsupported, CalendarIntegration, MeetsyncResult};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Calendar that answers availability from a fixed list.
struct StaticCalendar {
    provider: CalendarProvider,
    email: String,
    busy: MeetsyncResult<Vec<EventBusyDate>>,
    queried: Mutex<Vec<Vec<String>>>,
}

impl StaticCalendar {
    fn new(provider: CalendarProvider, busy: MeetsyncResult<Vec<EventBusyDate>>) -> Self {
        Self {
            provider,
            email: format!("{}@example.com", provider),
            busy,
            queried: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CalendarIntegration for StaticCalendar {
    fn provider(&self) -> CalendarProvider {
        self.provider
    }

    fn email(&self) -> &str {
        &self.email
    }

    async fn create_event(
        &self,
        _owner: &str,
        _details: &MeetingDetails,
        _requested_at: DateTime<Utc>,
        _calendar_id: &str,
        _include_participants: bool,
    ) -> MeetsyncResult<NewCalendarEvent> {
        Err(unsupported("create"))
    }

    async fn update_event(
        &self,
        _owner: &str,
        _details: &MeetingDetails,
        _calendar_id: &str,
    ) -> MeetsyncResult<NewCalendarEvent> {
        Err(unsupported("update"))
    }

    async fn delete_event(&self, _meeting_id: &str, _calendar_id: &str) -> MeetsyncResult<()> {
        Err(unsupported("delete"))
    }

    async fn get_availability(
        &self,
        calendar_ids: &[String],
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> MeetsyncResult<Vec<EventBusyDate>> {
        self.queried.lock().unwrap().push(calendar_ids.to_vec());
        match &self.busy {
            Ok(busy) => Ok(busy.clone()),
            Err(_) => Err(provider_error(self.provider.as_str(), 503, "unavailable")),
        }
    }

    async fn list_events(&self, _calendar_id: &str, _sync_token: Option<&str>) -> MeetsyncResult<SyncPage> {
        Err(unsupported("list"))
    }

    async fn get_event_by_id(&self, _event_id: &str, _calendar_id: &str) -> MeetsyncResult<Option<UnifiedEvent>> {
        Ok(None)
    }

    async fn update_event_rsvp(
        &self,
        _meeting_id: &str,
        _attendee_email: &str,
        _status: ParticipationStatus,
        _calendar_id: &str,
    ) -> MeetsyncResult<()> {
        Err(unsupported("rsvp"))
    }

    async fn update_event_rsvp_for_external_event(
        &self,
        _event_id: &str,
        _attendee_email: &str,
        _status: ParticipationStatus,
        _calendar_id: &str,
    ) -> MeetsyncResult<()> {
        Err(unsupported("rsvp"))
    }

    async fn update_event_extended_properties(
        &self,
        _meeting_id: &str,
        _calendar_id: &str,
        _properties: &BTreeMap<String, String>,
    ) -> MeetsyncResult<()> {
        Err(unsupported("properties"))
    }

    async fn list_calendars(&self) -> MeetsyncResult<Vec<CalendarSyncInfo>> {
        Ok(vec![])
    }
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 5, 13, hour, 0, 0).unwrap()
}

fn window() -> Interval {
    Interval::new(at(8), at(18))
}

#[tokio::test]
async fn test_collect_merges_across_adapters() {
    let google = StaticCalendar::new(
        CalendarProvider::Google,
        Ok(vec![
            EventBusyDate::new(at(13), at(14), TimeSlotSource::Google),
            EventBusyDate::new(at(9), at(10), TimeSlotSource::Google),
        ]),
    );
    let caldav = StaticCalendar::new(
        CalendarProvider::CalDav,
        Ok(vec![
            EventBusyDate::new(at(9) + Duration::minutes(30), at(11), TimeSlotSource::Webdav),
            // reaches past the window end
            EventBusyDate::new(at(17), at(20), TimeSlotSource::Webdav),
        ]),
    );
    let sources = [
        BusySource::new(&google, vec!["primary".to_string()]),
        BusySource::new(&caldav, vec!["https://dav.example.com/cal/".to_string()]),
    ];

    let busy = collect_busy_times(&sources, window()).await;
    assert_eq!(
        busy,
        vec![
            Interval::new(at(9), at(11)),
            Interval::new(at(13), at(14)),
            Interval::new(at(17), at(18)),
        ]
    );
    assert_eq!(google.queried.lock().unwrap()[0], vec!["primary".to_string()]);

    let events = collect_busy_events(&sources, window()).await;
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].start, at(9));
}

#[tokio::test]
async fn test_failing_adapter_is_skipped() {
    let broken = StaticCalendar::new(CalendarProvider::Office365, Err(unsupported("down")));
    let healthy = StaticCalendar::new(
        CalendarProvider::Google,
        Ok(vec![EventBusyDate::new(at(10), at(11), TimeSlotSource::Google)]),
    );
    let sources = [
        BusySource::new(&broken, vec!["cal".to_string()]),
        BusySource::new(&healthy, vec!["primary".to_string()]),
    ];

    let busy = collect_busy_times(&sources, window()).await;
    assert_eq!(busy, vec![Interval::new(at(10), at(11))]);
    assert_eq!(broken.queried.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sources_without_calendars_are_not_queried() {
    let idle = StaticCalendar::new(CalendarProvider::Google, Ok(vec![]));
    let sources = [BusySource::new(&idle, vec![])];

    assert!(collect_busy_times(&sources, window()).await.is_empty());
    assert!(idle.queried.lock().unwrap().is_empty());
}
