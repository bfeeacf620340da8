//! Shared plumbing for the remote HTTP APIs the tool talks to.
//!
//! - Error categorization (transient / permanent / not-found / conflict)
//! - Exponential backoff retry for transient errors

mod error;
mod retry;

pub use error::{ApiError, ApiErrorKind, found};
pub use retry::{RetryConfig, RetryPolicy, retry_with_backoff};
