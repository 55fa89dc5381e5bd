//! Maps a connected-calendar record to its adapter.
//!
//! The provider tag alone decides which adapter is built. OAuth providers get
//! a [`TokenManager`] that writes refreshed tokens back through the store;
//! CalDAV gets its decrypted basic-auth password.
//!
//! [`ProviderFactory`] hands every adapter of one connected calendar the same
//! token manager, so concurrent calls refresh an expiring token once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use chrono_tz::Tz;
use meetsync_caldav::CalDavCalendarIntegration;
use meetsync_common::models::{
    CalDavCredentialPayload, CalendarProvider, ConnectedCalendar, OAuthCredentialPayload,
};
use meetsync_common::{
    auth_error, config_error, CalendarIntegration, ConnectedCalendarStore,
    ConnectedCalendarTokenPersister, MeetsyncResult, OAuthRefresher, OAuthToken, TokenManager,
};
use meetsync_config::EngineConfig;
use meetsync_gcal::GoogleCalendarIntegration;
use meetsync_office365::Office365CalendarIntegration;
use reqwest::Client;
use tracing::debug;

/// Builds adapters for connected calendars.
pub trait IntegrationFactory: Send + Sync {
    fn create(&self, record: &ConnectedCalendar) -> MeetsyncResult<Box<dyn CalendarIntegration>>;
}

/// `(account address, email, provider)` of a connected calendar.
type TokenKey = (String, String, CalendarProvider);

fn token_key(record: &ConnectedCalendar) -> TokenKey {
    (
        record.account_address.to_lowercase(),
        record.email.to_lowercase(),
        record.provider,
    )
}

/// Factory backed by the engine configuration and one shared HTTP client.
pub struct ProviderFactory {
    config: Arc<EngineConfig>,
    http: Client,
    store: Arc<dyn ConnectedCalendarStore>,
    tokens: Mutex<HashMap<TokenKey, Arc<TokenManager>>>,
}

impl ProviderFactory {
    pub fn new(config: Arc<EngineConfig>, http: Client, store: Arc<dyn ConnectedCalendarStore>) -> Self {
        Self {
            config,
            http,
            store,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Drops the cached token of `record`. The next adapter reads the
    /// credential from the record again, as after a reconnect.
    pub fn forget(&self, record: &ConnectedCalendar) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if tokens.remove(&token_key(record)).is_some() {
            debug!("dropped cached token of {} ({})", record.email, record.provider);
        }
    }

    fn cached_tokens(
        &self,
        record: &ConnectedCalendar,
        refresher: OAuthRefresher,
    ) -> MeetsyncResult<Arc<TokenManager>> {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let key = token_key(record);
        if let Some(manager) = tokens.get(&key) {
            return Ok(manager.clone());
        }
        let manager = token_manager(record, &self.config, self.store.clone(), refresher)?;
        tokens.insert(key, manager.clone());
        Ok(manager)
    }
}

impl IntegrationFactory for ProviderFactory {
    fn create(&self, record: &ConnectedCalendar) -> MeetsyncResult<Box<dyn CalendarIntegration>> {
        let tokens_for = |record: &ConnectedCalendar, refresher: OAuthRefresher| {
            self.cached_tokens(record, refresher)
        };
        build_integration(record, &self.config, self.http.clone(), &tokens_for)
    }
}

/// Builds an adapter with a token manager of its own. Adapters built this
/// way do not coordinate refreshes with each other; [`ProviderFactory`] does.
pub fn create_integration(
    record: &ConnectedCalendar,
    config: &EngineConfig,
    http: Client,
    store: Arc<dyn ConnectedCalendarStore>,
) -> MeetsyncResult<Box<dyn CalendarIntegration>> {
    let tokens_for = |record: &ConnectedCalendar, refresher: OAuthRefresher| {
        token_manager(record, config, store.clone(), refresher)
    };
    build_integration(record, config, http, &tokens_for)
}

type TokenSource<'a> =
    &'a dyn Fn(&ConnectedCalendar, OAuthRefresher) -> MeetsyncResult<Arc<TokenManager>>;

fn build_integration(
    record: &ConnectedCalendar,
    config: &EngineConfig,
    http: Client,
    tokens_for: TokenSource<'_>,
) -> MeetsyncResult<Box<dyn CalendarIntegration>> {
    debug!(
        "creating {} integration for {} ({})",
        record.provider, record.email, record.account_address
    );
    match record.provider {
        CalendarProvider::Google => {
            let google = config
                .google
                .as_ref()
                .ok_or_else(|| config_error("Google Calendar is not configured"))?;
            let refresher = OAuthRefresher::new(
                http.clone(),
                google.token_url.clone(),
                google.client_id.clone(),
                google.client_secret.clone(),
            );
            let tokens = tokens_for(record, refresher)?;
            Ok(Box::new(GoogleCalendarIntegration::new(
                http,
                google,
                &config.webhooks,
                record.email.clone(),
                tokens,
            )))
        }
        CalendarProvider::Office365 => {
            let office = config
                .office365
                .as_ref()
                .ok_or_else(|| config_error("Office 365 is not configured"))?;
            let refresher = OAuthRefresher::new(
                http.clone(),
                office.token_endpoint(),
                office.client_id.clone(),
                office.client_secret.clone(),
            )
            .with_scope(office.scope.clone());
            let tokens = tokens_for(record, refresher)?;
            Ok(Box::new(Office365CalendarIntegration::new(
                http,
                office,
                &config.webhooks,
                record.email.clone(),
                tokens,
            )))
        }
        CalendarProvider::CalDav => {
            let payload: CalDavCredentialPayload = serde_json::from_value(record.payload.clone())
                .map_err(|e| auth_error(format!("invalid CalDAV credential of {}: {}", record.email, e)))?;
            let integration =
                CalDavCalendarIntegration::from_payload(http, &payload, &config.caldav, record.email.clone())?
                    .with_time_zone(default_time_zone(config)?);
            Ok(Box::new(integration))
        }
    }
}

fn token_manager(
    record: &ConnectedCalendar,
    config: &EngineConfig,
    store: Arc<dyn ConnectedCalendarStore>,
    refresher: OAuthRefresher,
) -> MeetsyncResult<Arc<TokenManager>> {
    let payload: OAuthCredentialPayload = serde_json::from_value(record.payload.clone())
        .map_err(|e| auth_error(format!("invalid OAuth credential of {}: {}", record.email, e)))?;
    let token = OAuthToken::from_payload(&payload)?;
    let persister = ConnectedCalendarTokenPersister::new(
        store,
        record.account_address.clone(),
        record.email.clone(),
        record.provider,
    );
    Ok(Arc::new(TokenManager::new(
        token,
        Arc::new(refresher),
        Arc::new(persister),
        Duration::seconds(config.tokens.refresh_threshold_secs),
    )))
}

/// Zone configured for availability, also used for floating CalDAV times.
pub fn default_time_zone(config: &EngineConfig) -> MeetsyncResult<Tz> {
    let name = &config.availability.default_time_zone;
    name.parse::<Tz>()
        .map_err(|_| config_error(format!("unknown time zone '{}'", name)))
}
