use tracing::error;

use crate::error::{HttpStatusCode, MeetsyncError};

/// Receives failures that are swallowed so a provider outage never blocks the
/// scheduling action.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorSink: Send + Sync {
    fn capture(&self, error: &MeetsyncError, context: &str);
}

/// Emits every captured failure as a structured `error!` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn capture(&self, error: &MeetsyncError, context: &str) {
        error!(
            context = context,
            status = error.status(),
            http_status = error.status_code(),
            "calendar sync failure: {}",
            error
        );
    }
}
