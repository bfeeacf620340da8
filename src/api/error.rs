//! Remote API error types.
//!
//! Every HTTP call made by the platform client, the CircleCI client and the
//! GitHub client surfaces an [`ApiError`]. The kind drives two decisions:
//!
//! - **Retry**: only `Transient` errors are retried by the transport layer.
//! - **Existence**: `NotFound` is data, not failure. Lookup operations turn it
//!   into `Ok(None)` so callers can ask "does this exist yet" without treating
//!   a 404 as an exception path.
//!
//! `Conflict` marks a write that collided with existing remote state, such as
//! creating an app whose name is already taken.

use std::fmt;
use thiserror::Error;

/// The kind of API error, categorized for retry and existence decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Transient error - safe to retry with backoff.
    ///
    /// HTTP 5xx, HTTP 429, rate-limit 403s, and network-level failures.
    Transient,

    /// Permanent error - retrying will not help.
    Permanent,

    /// The addressed resource does not exist (HTTP 404).
    NotFound,

    /// The write conflicts with existing remote state (HTTP 409, or a 422 whose
    /// message says the name is already taken).
    Conflict,
}

impl ApiErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApiErrorKind::Transient)
    }
}

/// A remote API error with categorization.
#[derive(Debug, Error)]
pub struct ApiError {
    pub kind: ApiErrorKind,

    /// The HTTP status code, if the request got far enough to receive one.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "API error (HTTP {}): {}", code, self.message),
            None => write!(f, "API error: {}", self.message),
        }
    }
}

impl ApiError {
    /// Categorizes an HTTP error response by status code and body text.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::bare(kind_for_status(Some(status), &message), Some(status), message)
    }

    fn bare(kind: ApiErrorKind, status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::bare(ApiErrorKind::Permanent, None, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::bare(ApiErrorKind::Transient, None, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::bare(ApiErrorKind::NotFound, Some(404), message)
    }

    /// Categorizes a reqwest transport or decoding error.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let message = err.to_string();
        let kind = if err.is_timeout() || err.is_connect() {
            ApiErrorKind::Transient
        } else if err.is_decode() {
            ApiErrorKind::Permanent
        } else {
            kind_for_status(status_code, &message)
        };
        Self {
            kind,
            status_code,
            message,
            source: Some(Box::new(err)),
        }
    }

    /// Categorizes an octocrab error.
    ///
    /// GitHub error responses carry their status code; everything else (transport,
    /// serde, URI errors) is categorized from the message text.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = match &err {
            octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
            _ => None,
        };
        let message = err.to_string();
        Self {
            kind: kind_for_status(status_code, &message),
            status_code,
            message,
            source: Some(Box::new(err)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == ApiErrorKind::Conflict
    }
}

/// Lifts a 404 out of the error channel.
///
/// `Ok(Some(v))` found, `Ok(None)` not found, `Err(e)` any other failure.
pub fn found<T>(result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn kind_for_status(status_code: Option<u16>, message: &str) -> ApiErrorKind {
    match status_code {
        Some(404) => ApiErrorKind::NotFound,
        Some(409) => ApiErrorKind::Conflict,
        Some(422) if is_name_taken(message) => ApiErrorKind::Conflict,
        Some(429) => ApiErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => ApiErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => ApiErrorKind::Transient,
        Some(_) => ApiErrorKind::Permanent,
        None => {
            if is_network_error(message) {
                ApiErrorKind::Transient
            } else {
                ApiErrorKind::Permanent
            }
        }
    }
}

/// Checks if a validation failure says the resource name is already in use.
fn is_name_taken(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("already taken") || message_lower.contains("already exists")
}

fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}
