// --- File: crates/meetsync_common/src/http.rs ---
use reqwest::{Client, Response};
use std::time::Duration;

use crate::error::{provider_error, MeetsyncError, MeetsyncResult};

/// Default timeout for HTTP requests in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Creates an HTTP client. Adapters receive one from whoever constructs them.
///
/// # Arguments
///
/// * `timeout_secs` - The timeout in seconds for the client
/// * `follow_redirects` - Whether the client should follow redirects
pub fn create_client(timeout_secs: u64, follow_redirects: bool) -> MeetsyncResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .redirect(if follow_redirects {
            reqwest::redirect::Policy::default()
        } else {
            reqwest::redirect::Policy::none()
        })
        .build()
        .map_err(MeetsyncError::from)
}

/// Passes a successful response through and turns anything else into
/// [`MeetsyncError::Provider`] carrying the status and response body.
pub async fn check_status(provider: &str, response: Response) -> MeetsyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    } else {
        body
    };
    Err(provider_error(provider, status.as_u16(), message))
}
