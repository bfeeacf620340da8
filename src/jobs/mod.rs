//! Asynchronous build jobs run on a CI system.
//!
//! A containerized deploy triggers a job on CI, waits for it to show up, then
//! waits for it to finish. Neither CI system returns a correlation id when a
//! job is triggered, so the job that matters is picked out of a candidate list
//! by [`select_run`].
//!
//! Two backends implement [`JobProvider`]:
//! - [`CircleCiClient`]: pipeline trigger, candidates are the pipeline's workflows
//! - [`crate::github::GitHubActionsClient`]: `workflow_dispatch`, candidates are
//!   the workflow's runs for the branch and commit

mod circleci;
mod disambiguate;
mod poll;
mod run;

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::github::GitHubActionsClient;
use crate::types::{AppName, JobId, RepoId, Sha};

pub use circleci::{CIRCLECI_API_URL, CircleCiClient};
pub use disambiguate::select_run;
pub use poll::{PollError, PollSettings, PollWindow, poll_until};
pub use run::run_build;

/// How a job ended, once it has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failure,
    /// Not terminal yet, or a terminal status the backend did not explain.
    Unknown,
}

/// One job as reported by a CI backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub created_at: DateTime<Utc>,
    /// Raw backend status, for messages.
    pub status: String,
    /// True once no further status transition can happen.
    pub terminal: bool,
    pub outcome: JobOutcome,
    pub web_url: Option<String>,
}

/// Parameters of a container build for one review app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub repo: RepoId,
    pub branch: String,
    pub sha: Sha,
    pub app_name: AppName,
    pub node_env: Option<String>,
}

/// What a backend returns from a trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerReceipt {
    /// Backend handle used to list candidates: a CircleCI pipeline id or a
    /// GitHub workflow id.
    pub id: String,
    /// Human-facing sequence number, if the backend assigns one at trigger time.
    pub number: Option<u64>,
    pub web_url: Option<String>,
}

/// A CI system that can run container builds.
pub trait JobProvider: Sync {
    /// Short backend name for logs and messages.
    fn name(&self) -> &'static str;

    fn trigger(
        &self,
        request: &BuildRequest,
    ) -> impl Future<Output = Result<TriggerReceipt, ApiError>> + Send;

    /// Jobs that might have been started by `receipt`, in any order.
    fn list_candidates(
        &self,
        receipt: &TriggerReceipt,
        request: &BuildRequest,
    ) -> impl Future<Output = Result<Vec<JobRecord>, ApiError>> + Send;

    fn get_status(&self, id: &JobId) -> impl Future<Output = Result<JobRecord, ApiError>> + Send;
}

/// The build backend selected for this invocation.
#[derive(Debug, Clone)]
pub enum JobBackend {
    CircleCi(CircleCiClient),
    GitHubActions(GitHubActionsClient),
}

impl fmt::Display for JobBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl JobProvider for JobBackend {
    fn name(&self) -> &'static str {
        match self {
            JobBackend::CircleCi(c) => c.name(),
            JobBackend::GitHubActions(c) => c.name(),
        }
    }

    async fn trigger(&self, request: &BuildRequest) -> Result<TriggerReceipt, ApiError> {
        match self {
            JobBackend::CircleCi(c) => c.trigger(request).await,
            JobBackend::GitHubActions(c) => c.trigger(request).await,
        }
    }

    async fn list_candidates(
        &self,
        receipt: &TriggerReceipt,
        request: &BuildRequest,
    ) -> Result<Vec<JobRecord>, ApiError> {
        match self {
            JobBackend::CircleCi(c) => c.list_candidates(receipt, request).await,
            JobBackend::GitHubActions(c) => c.list_candidates(receipt, request).await,
        }
    }

    async fn get_status(&self, id: &JobId) -> Result<JobRecord, ApiError> {
        match self {
            JobBackend::CircleCi(c) => c.get_status(id).await,
            JobBackend::GitHubActions(c) => c.get_status(id).await,
        }
    }
}
