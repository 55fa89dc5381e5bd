//! Busy time gathered from connected calendars.

use futures::future::join_all;
use meetsync_common::models::EventBusyDate;
use meetsync_common::CalendarIntegration;
use tracing::{debug, warn};

use crate::interval::{merge, Interval};

/// One adapter and the calendars to ask it about.
pub struct BusySource<'a> {
    pub integration: &'a dyn CalendarIntegration,
    pub calendar_ids: Vec<String>,
}

impl<'a> BusySource<'a> {
    pub fn new(integration: &'a dyn CalendarIntegration, calendar_ids: Vec<String>) -> Self {
        Self {
            integration,
            calendar_ids,
        }
    }
}

/// Queries every source concurrently. A failing adapter is logged and
/// skipped so the other calendars still count.
pub async fn collect_busy_events(sources: &[BusySource<'_>], window: Interval) -> Vec<EventBusyDate> {
    let requests = sources
        .iter()
        .filter(|source| !source.calendar_ids.is_empty())
        .map(|source| async move {
            let result = source
                .integration
                .get_availability(&source.calendar_ids, window.start, window.end)
                .await;
            (source, result)
        });

    let mut busy = Vec::new();
    for (source, result) in join_all(requests).await {
        match result {
            Ok(events) => {
                debug!(
                    "{} {}: {} busy intervals",
                    source.integration.provider(),
                    source.integration.email(),
                    events.len()
                );
                busy.extend(events);
            }
            Err(e) => warn!(
                "skipping busy times of {} {}: {}",
                source.integration.provider(),
                source.integration.email(),
                e
            ),
        }
    }
    busy.sort_by_key(|b| b.start);
    busy
}

/// Busy time of every source inside `window`, merged.
pub async fn collect_busy_times(sources: &[BusySource<'_>], window: Interval) -> Vec<Interval> {
    let events = collect_busy_events(sources, window).await;
    let intervals: Vec<Interval> = events
        .iter()
        .filter_map(|busy| Interval::from(busy).intersection(&window))
        .collect();
    merge(&intervals)
}
