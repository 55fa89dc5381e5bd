// --- File: crates/meetsync_common/src/error.rs ---
use std::fmt;
use thiserror::Error;

/// The error type shared by every MeetSync crate.
///
/// Provider adapters surface non-2xx answers as [`MeetsyncError::Provider`] so
/// callers can still classify the status code (404/410 on delete, 5xx on a
/// transient outage).
#[derive(Error, Debug)]
pub enum MeetsyncError {
    /// Transport level failure (connect, TLS, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The provider answered with a non-success status
    #[error("{provider} API error ({status}): {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    /// Credential missing or rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The refresh-token grant failed
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to parse data: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Capability the provider does not offer
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The connected-calendar store failed
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type MeetsyncResult<T> = Result<T, MeetsyncError>;

impl MeetsyncError {
    /// Provider status code, if the error came from a provider response.
    pub fn status(&self) -> Option<u16> {
        match self {
            MeetsyncError::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for "Not Found" and "Gone" provider answers.
    pub fn is_gone(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }

    /// True when the account credential is missing, rejected or cannot be
    /// refreshed. Such failures affect every calendar of the account alike.
    pub fn is_auth(&self) -> bool {
        matches!(self, MeetsyncError::Auth(_) | MeetsyncError::TokenRefresh(_))
            || self.status() == Some(401)
    }
}

/// A trait for converting errors to HTTP status codes.
///
/// The engine has no HTTP surface of its own; the API layer that embeds it
/// uses this to answer its clients.
pub trait HttpStatusCode {
    /// Returns the HTTP status code for this error.
    fn status_code(&self) -> u16;
}

impl HttpStatusCode for MeetsyncError {
    fn status_code(&self) -> u16 {
        match self {
            MeetsyncError::Http(_) => 502,
            MeetsyncError::Provider { status, .. } if *status == 429 => 429,
            MeetsyncError::Provider { .. } => 502,
            MeetsyncError::Auth(_) => 401,
            MeetsyncError::TokenRefresh(_) => 401,
            MeetsyncError::NotFound(_) => 404,
            MeetsyncError::Validation(_) => 400,
            MeetsyncError::Parse(_) => 502,
            MeetsyncError::Config(_) => 500,
            MeetsyncError::Unsupported(_) => 501,
            MeetsyncError::Storage(_) => 500,
            MeetsyncError::Internal(_) => 500,
        }
    }
}

/// A trait for adding context to foreign errors.
pub trait Context<T, E> {
    /// Adds context to an error.
    fn context<C>(self, context: C) -> Result<T, MeetsyncError>
    where
        C: fmt::Display + Send + Sync + 'static;

    /// Adds context to an error with a lazy context provider.
    fn with_context<C, F>(self, f: F) -> Result<T, MeetsyncError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E: std::error::Error + Send + Sync + 'static> Context<T, E> for Result<T, E> {
    fn context<C>(self, context: C) -> Result<T, MeetsyncError>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|error| MeetsyncError::Internal(format!("{}: {}", context, error)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, MeetsyncError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| MeetsyncError::Internal(format!("{}: {}", f(), error)))
    }
}

impl From<reqwest::Error> for MeetsyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MeetsyncError::Parse(err.to_string())
        } else {
            MeetsyncError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MeetsyncError {
    fn from(err: serde_json::Error) -> Self {
        MeetsyncError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for MeetsyncError {
    fn from(err: std::io::Error) -> Self {
        MeetsyncError::Internal(err.to_string())
    }
}

impl From<url::ParseError> for MeetsyncError {
    fn from(err: url::ParseError) -> Self {
        MeetsyncError::Config(format!("invalid URL: {}", err))
    }
}

impl From<chrono::ParseError> for MeetsyncError {
    fn from(err: chrono::ParseError) -> Self {
        MeetsyncError::Parse(format!("invalid timestamp: {}", err))
    }
}

impl From<meetsync_config::SecretError> for MeetsyncError {
    fn from(err: meetsync_config::SecretError) -> Self {
        MeetsyncError::Auth(err.to_string())
    }
}

// Utility functions for error handling
pub fn provider_error<T: fmt::Display>(provider: &str, status: u16, message: T) -> MeetsyncError {
    MeetsyncError::Provider {
        provider: provider.to_string(),
        status,
        message: message.to_string(),
    }
}

pub fn auth_error<T: fmt::Display>(message: T) -> MeetsyncError {
    MeetsyncError::Auth(message.to_string())
}

pub fn config_error<T: fmt::Display>(message: T) -> MeetsyncError {
    MeetsyncError::Config(message.to_string())
}

pub fn validation_error<T: fmt::Display>(message: T) -> MeetsyncError {
    MeetsyncError::Validation(message.to_string())
}

pub fn not_found<T: fmt::Display>(message: T) -> MeetsyncError {
    MeetsyncError::NotFound(message.to_string())
}

pub fn parse_error<T: fmt::Display>(message: T) -> MeetsyncError {
    MeetsyncError::Parse(message.to_string())
}

pub fn unsupported<T: fmt::Display>(message: T) -> MeetsyncError {
    MeetsyncError::Unsupported(message.to_string())
}

pub fn storage_error<T: fmt::Display>(message: T) -> MeetsyncError {
    MeetsyncError::Storage(message.to_string())
}

pub fn internal_error<T: fmt::Display>(message: T) -> MeetsyncError {
    MeetsyncError::Internal(message.to_string())
}
