// --- File: crates/services/meetsync_engine/src/lib.rs ---
//! Calendar sync orchestration for MeetSync: the provider factory and the
//! service that fans meeting changes out to connected calendars.

use std::sync::Arc;

use meetsync_availability::WeeklySchedule;
use meetsync_common::{create_client, ConnectedCalendarStore, ErrorSink, MeetsyncResult};
use meetsync_config::EngineConfig;

pub mod factory;
pub mod sync;

pub use factory::{create_integration, default_time_zone, IntegrationFactory, ProviderFactory};
pub use sync::{CalendarChanges, CalendarSyncService, SyncFailure, SyncReport, SyncTarget};

/// Wires a [`CalendarSyncService`] from the engine configuration: one HTTP
/// client for all adapters, the configured schedule and zone as availability
/// defaults.
pub fn build_sync_service(
    config: Arc<EngineConfig>,
    store: Arc<dyn ConnectedCalendarStore>,
    sink: Arc<dyn ErrorSink>,
) -> MeetsyncResult<CalendarSyncService> {
    let http = create_client(config.http.timeout_secs, true)?;
    let schedule = WeeklySchedule::from_config(&config.availability.default_weekly_schedule)?;
    let time_zone = default_time_zone(&config)?;
    let factory = Arc::new(ProviderFactory::new(config, http, store.clone()));

    Ok(CalendarSyncService::new(store, factory, sink).with_availability_defaults(schedule, time_zone))
}
