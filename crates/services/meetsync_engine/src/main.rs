// File: services/meetsync_engine/src/main.rs
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use meetsync_availability::ParticipantAvailabilityInput;
use meetsync_common::models::ConnectedCalendar;
use meetsync_common::{
    config_error, logging, validation_error, InMemoryCalendarStore, MeetsyncResult,
    TracingErrorSink,
};
use meetsync_config::load_config;
use meetsync_engine::build_sync_service;
use tracing::{error, info};

const USAGE: &str = "usage: meetsync-engine <connections.json> <account_address> [YYYY-MM]";

/// Reads connected-calendar records from a JSON file, runs an incremental
/// sync for the account and prints its free time for the month as JSON.
#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", USAGE);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> MeetsyncResult<()> {
    let mut args = env::args().skip(1);
    let records_path = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| validation_error("missing connections file"))?;
    let account = args
        .next()
        .ok_or_else(|| validation_error("missing account address"))?;
    let (year, month) = match args.next() {
        Some(value) => parse_month(&value)?,
        None => {
            let today = Utc::now();
            (today.year(), today.month())
        }
    };

    let config = Arc::new(load_config().map_err(|e| config_error(e.to_string()))?);
    let records: Vec<ConnectedCalendar> =
        serde_json::from_str(&std::fs::read_to_string(&records_path)?)?;
    info!("loaded {} connections from {}", records.len(), records_path.display());

    let store = Arc::new(InMemoryCalendarStore::with_records(records));
    let service = build_sync_service(config, store, Arc::new(TracingErrorSink))?;

    for changes in service.incremental_sync(&account).await {
        info!(
            "{} {} {}: {} changes",
            changes.provider,
            changes.email,
            changes.calendar_id,
            changes.events.len()
        );
    }

    let availability = service
        .month_availability(&account, year, month, ParticipantAvailabilityInput::default(), None)
        .await?;
    println!("{}", serde_json::to_string_pretty(&availability)?);
    Ok(())
}

fn parse_month(value: &str) -> MeetsyncResult<(i32, u32)> {
    let (year, month) = value
        .split_once('-')
        .ok_or_else(|| validation_error(format!("expected YYYY-MM, got '{}'", value)))?;
    let year = year
        .parse()
        .map_err(|_| validation_error(format!("invalid year '{}'", year)))?;
    let month = month
        .parse()
        .map_err(|_| validation_error(format!("invalid month '{}'", month)))?;
    Ok((year, month))
}
