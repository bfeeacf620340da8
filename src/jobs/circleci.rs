//! CircleCI v2 API backend.
//!
//! A build is a pipeline triggered on the PR branch with parameters telling the
//! project's config to build the Docker image and release it to one app. The
//! candidates for disambiguation are the pipeline's workflows; more than one
//! shows up when a workflow is re-run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::trace;

use super::{BuildRequest, JobOutcome, JobProvider, JobRecord, TriggerReceipt};
use crate::api::{ApiError, RetryConfig, RetryPolicy, retry_with_backoff};
use crate::types::{JobId, RepoId};

pub const CIRCLECI_API_URL: &str = "https://circleci.com/api/v2";

#[derive(Debug, Deserialize)]
struct PipelinePayload {
    id: String,
    number: u64,
}

#[derive(Debug, Deserialize)]
struct WorkflowPayload {
    id: String,
    status: String,
    created_at: DateTime<Utc>,
    pipeline_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WorkflowListPayload {
    items: Vec<WorkflowPayload>,
}

/// Maps a CircleCI workflow status to (terminal, outcome).
///
/// `running`, `on_hold` and `failing` can still change; everything else is final.
fn classify(status: &str) -> (bool, JobOutcome) {
    match status {
        "running" | "on_hold" | "failing" => (false, JobOutcome::Unknown),
        "success" => (true, JobOutcome::Success),
        "failed" | "error" | "canceled" | "unauthorized" | "not_run" => {
            (true, JobOutcome::Failure)
        }
        _ => (true, JobOutcome::Unknown),
    }
}

/// Web URL of a pipeline in the CircleCI app.
pub fn pipeline_url(repo: &RepoId, number: u64) -> String {
    format!(
        "https://app.circleci.com/pipelines/github/{}/{}/{}",
        repo.owner, repo.repo, number
    )
}

#[derive(Clone)]
pub struct CircleCiClient {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    repo: RepoId,
    retry: RetryConfig,
}

impl CircleCiClient {
    pub fn new(token: SecretString, repo: RepoId) -> Result<Self, ApiError> {
        Self::with_base_url(CIRCLECI_API_URL, token, repo)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: SecretString,
        repo: RepoId,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(ApiError::from_reqwest)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            repo,
            retry: RetryConfig::DEFAULT,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        retry_with_backoff(self.retry, RetryPolicy::for_method(&method), || {
            self.send_once(method.clone(), path, body.as_ref())
        })
        .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        trace!(%method, path, "circleci request");
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Circle-Token", self.token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), text.trim().to_string()));
        }
        response.json::<T>().await.map_err(ApiError::from_reqwest)
    }

    fn record(workflow: WorkflowPayload, repo: &RepoId) -> JobRecord {
        let (terminal, outcome) = classify(&workflow.status);
        JobRecord {
            id: JobId(workflow.id),
            created_at: workflow.created_at,
            status: workflow.status,
            terminal,
            outcome,
            web_url: workflow.pipeline_number.map(|n| pipeline_url(repo, n)),
        }
    }
}

impl std::fmt::Debug for CircleCiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircleCiClient")
            .field("base_url", &self.base_url)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

/// Pipeline parameters for a Docker build released to a single app.
fn pipeline_parameters(request: &BuildRequest) -> Value {
    let mut params = Map::new();
    params.insert("RUN_TEST".into(), json!(false));
    params.insert("RUN_DOCKER".into(), json!(true));
    params.insert("HEROKU_APPS_TO_PUSH".into(), json!(request.app_name));
    params.insert("HEROKU_APPS_TO_RELEASE".into(), json!(request.app_name));
    if let Some(node_env) = &request.node_env {
        params.insert("NODE_ENV".into(), json!(node_env));
    }
    Value::Object(params)
}

impl JobProvider for CircleCiClient {
    fn name(&self) -> &'static str {
        "CircleCI"
    }

    async fn trigger(&self, request: &BuildRequest) -> Result<TriggerReceipt, ApiError> {
        let body = json!({
            "branch": request.branch,
            "parameters": pipeline_parameters(request),
        });
        let pipeline: PipelinePayload = self
            .request(
                Method::POST,
                &format!("/project/gh/{}/{}/pipeline", request.repo.owner, request.repo.repo),
                Some(body),
            )
            .await?;
        Ok(TriggerReceipt {
            id: pipeline.id,
            number: Some(pipeline.number),
            web_url: Some(pipeline_url(&request.repo, pipeline.number)),
        })
    }

    async fn list_candidates(
        &self,
        receipt: &TriggerReceipt,
        request: &BuildRequest,
    ) -> Result<Vec<JobRecord>, ApiError> {
        let list: WorkflowListPayload = self
            .request(Method::GET, &format!("/pipeline/{}/workflow", receipt.id), None)
            .await?;
        Ok(list
            .items
            .into_iter()
            .map(|w| Self::record(w, &request.repo))
            .collect())
    }

    async fn get_status(&self, id: &JobId) -> Result<JobRecord, ApiError> {
        let workflow: WorkflowPayload = self
            .request(Method::GET, &format!("/workflow/{}", id), None)
            .await?;
        Ok(Self::record(workflow, &self.repo))
    }
}
