// --- File: crates/meetsync_common/src/store.rs ---
//! Access to connected-calendar records.
//!
//! The application database owns these records; the engine only reads and
//! updates them through [`ConnectedCalendarStore`].

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{not_found, MeetsyncResult};
use crate::models::{CalendarProvider, CalendarSyncInfo, ConnectedCalendar};

#[async_trait]
pub trait ConnectedCalendarStore: Send + Sync {
    /// Active (not removed) connections of an account.
    async fn get_connected_calendars(
        &self,
        account_address: &str,
    ) -> MeetsyncResult<Vec<ConnectedCalendar>>;

    /// Inserts the record, or replaces the one with the same account, email and
    /// provider. A previously removed connection is revived.
    async fn add_or_update_connected_calendar(
        &self,
        record: ConnectedCalendar,
    ) -> MeetsyncResult<ConnectedCalendar>;

    /// Replaces the calendar list and its sync flags.
    async fn change_connected_calendar_sync(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
        calendars: Vec<CalendarSyncInfo>,
    ) -> MeetsyncResult<()>;

    /// Writes a refreshed credential payload.
    async fn update_credential_payload(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
        payload: serde_json::Value,
    ) -> MeetsyncResult<()>;

    async fn update_sync_token(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
        calendar_id: &str,
        sync_token: Option<String>,
    ) -> MeetsyncResult<()>;

    /// Soft removal on disconnect.
    async fn remove_connected_calendar(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
    ) -> MeetsyncResult<()>;
}

/// Process local store used in development and tests.
#[derive(Default)]
pub struct InMemoryCalendarStore {
    records: RwLock<Vec<ConnectedCalendar>>,
}

impl InMemoryCalendarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ConnectedCalendar>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Every record including removed ones.
    pub async fn snapshot(&self) -> Vec<ConnectedCalendar> {
        self.records.read().await.clone()
    }

    async fn modify<F>(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
        f: F,
    ) -> MeetsyncResult<()>
    where
        F: FnOnce(&mut ConnectedCalendar) -> MeetsyncResult<()> + Send,
    {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.account_address == account_address && r.is_same_account(email, provider))
            .ok_or_else(|| {
                not_found(format!(
                    "no {} connection {} for account {}",
                    provider, email, account_address
                ))
            })?;
        f(record)?;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ConnectedCalendarStore for InMemoryCalendarStore {
    async fn get_connected_calendars(
        &self,
        account_address: &str,
    ) -> MeetsyncResult<Vec<ConnectedCalendar>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.account_address == account_address && r.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn add_or_update_connected_calendar(
        &self,
        mut record: ConnectedCalendar,
    ) -> MeetsyncResult<ConnectedCalendar> {
        let mut records = self.records.write().await;
        record.updated_at = Utc::now();
        record.deleted_at = None;

        let existing = records.iter_mut().find(|r| {
            r.account_address == record.account_address
                && r.is_same_account(&record.email, record.provider)
        });
        match existing {
            Some(current) => {
                debug!(
                    "updating {} connection {} of {}",
                    record.provider, record.email, record.account_address
                );
                record.created_at = current.created_at;
                *current = record.clone();
            }
            None => {
                debug!(
                    "adding {} connection {} for {}",
                    record.provider, record.email, record.account_address
                );
                records.push(record.clone());
            }
        }
        Ok(record)
    }

    async fn change_connected_calendar_sync(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
        calendars: Vec<CalendarSyncInfo>,
    ) -> MeetsyncResult<()> {
        self.modify(account_address, email, provider, |record| {
            record.calendars = calendars;
            Ok(())
        })
        .await
    }

    async fn update_credential_payload(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
        payload: serde_json::Value,
    ) -> MeetsyncResult<()> {
        self.modify(account_address, email, provider, |record| {
            record.payload = payload;
            Ok(())
        })
        .await
    }

    async fn update_sync_token(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
        calendar_id: &str,
        sync_token: Option<String>,
    ) -> MeetsyncResult<()> {
        let calendar_id = calendar_id.to_string();
        self.modify(account_address, email, provider, move |record| {
            let calendar = record
                .calendars
                .iter_mut()
                .find(|c| c.calendar_id == calendar_id)
                .ok_or_else(|| not_found(format!("calendar {}", calendar_id)))?;
            calendar.sync_token = sync_token;
            Ok(())
        })
        .await
    }

    async fn remove_connected_calendar(
        &self,
        account_address: &str,
        email: &str,
        provider: CalendarProvider,
    ) -> MeetsyncResult<()> {
        self.modify(account_address, email, provider, |record| {
            record.deleted_at = Some(Utc::now());
            Ok(())
        })
        .await
    }
}
