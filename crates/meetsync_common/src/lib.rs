// --- File: crates/meetsync_common/src/lib.rs ---

pub mod auth; // Token lifecycle
pub mod error; // Error handling
pub mod http; // HTTP client construction
pub mod logging; // Logging utilities
pub mod models; // Shared data structures
pub mod services; // CalendarIntegration contract
pub mod sink; // Observability sink for swallowed failures
pub mod store; // Connected-calendar records

#[cfg(test)]
mod auth_test;

// Re-export error types and utilities for easier access
pub use error::{
    auth_error, config_error, internal_error, not_found, parse_error, provider_error,
    storage_error, unsupported, validation_error, Context, HttpStatusCode, MeetsyncError,
    MeetsyncResult,
};

pub use auth::{
    is_expiring, ConnectedCalendarTokenPersister, OAuthRefresher, OAuthToken, TokenManager,
    TokenPersister, TokenRefresher,
};
pub use http::{check_status, create_client};
pub use logging::{init, init_with_level};
pub use services::{alternate_event_id, CalendarIntegration};
pub use sink::{ErrorSink, TracingErrorSink};
pub use store::{ConnectedCalendarStore, InMemoryCalendarStore};
