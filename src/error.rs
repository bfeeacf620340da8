//! Errors surfaced by reconciliation steps and teardown.

use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;
use crate::types::AppName;

/// A failure while reconciling or tearing down a review app.
///
/// None of these are retried by the caller: the run aborts, earlier steps are
/// left applied, and the whole run is expected to be re-run.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Bad input, detected before any remote call.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Reading remote state failed for a reason other than "not found".
    #[error("failed to read {what}: {source}")]
    RemoteLookup {
        what: String,
        #[source]
        source: ApiError,
    },

    /// A remote write failed.
    #[error("failed to {action}: {source}")]
    RemoteMutation {
        action: String,
        status: Option<u16>,
        #[source]
        source: ApiError,
    },

    /// A remote job did not reach the awaited state before its deadline.
    #[error("timed out after {elapsed:?} waiting for {waiting_for}")]
    PollTimeout {
        waiting_for: String,
        elapsed: Duration,
    },

    /// A remote job finished, but not successfully.
    #[error("{job} finished with status \"{status}\"")]
    DeploymentFailed { job: String, status: String },

    /// Creating the app collided with an existing one that then could not be read.
    #[error("app \"{0}\" already exists but could not be read back")]
    AlreadyExists(AppName),

    /// Pushing source to the platform's git endpoint failed.
    #[error("git push to {app} failed: {details}")]
    Push { app: AppName, details: String },
}

impl DeployError {
    /// Adapter for `map_err` on a failed read.
    pub fn lookup(what: impl Into<String>) -> impl FnOnce(ApiError) -> Self {
        let what = what.into();
        move |source| DeployError::RemoteLookup { what, source }
    }

    /// Adapter for `map_err` on a failed write.
    pub fn mutation(action: impl Into<String>) -> impl FnOnce(ApiError) -> Self {
        let action = action.into();
        move |source| DeployError::RemoteMutation {
            action,
            status: source.status_code,
            source,
        }
    }

    /// The remote HTTP status behind this error, if there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeployError::RemoteLookup { source, .. } => source.status_code,
            DeployError::RemoteMutation { status, .. } => *status,
            _ => None,
        }
    }
}
