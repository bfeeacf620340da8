//! GitHub Actions build backend.
//!
//! Builds are started with a `workflow_dispatch` on the PR branch. The dispatch
//! endpoint returns nothing, so the candidates are the workflow's runs for the
//! branch and head commit, and [`crate::jobs::select_run`] picks ours.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::OctocrabClient;
use crate::api::{ApiError, RetryConfig, RetryPolicy, retry_with_backoff};
use crate::jobs::{BuildRequest, JobOutcome, JobProvider, JobRecord, TriggerReceipt};
use crate::types::JobId;

/// The workflow a repository must define to support containerized deploys.
pub const DEPLOY_WORKFLOW_NAME: &str = "Deploy";

#[derive(Debug, Deserialize)]
struct WorkflowPayload {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowListPayload {
    workflows: Vec<WorkflowPayload>,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    id: u64,
    status: Option<String>,
    conclusion: Option<String>,
    created_at: DateTime<Utc>,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunListPayload {
    workflow_runs: Vec<RunPayload>,
}

#[derive(Debug, Serialize)]
struct RunQuery<'a> {
    branch: &'a str,
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    head_sha: Option<&'a str>,
}

impl From<RunPayload> for JobRecord {
    fn from(run: RunPayload) -> Self {
        let status = run.status.unwrap_or_else(|| "queued".to_string());
        let terminal = status == "completed";
        let outcome = match (terminal, run.conclusion.as_deref()) {
            (false, _) | (true, None) => JobOutcome::Unknown,
            (true, Some("success")) => JobOutcome::Success,
            (true, Some(_)) => JobOutcome::Failure,
        };
        let status = match run.conclusion {
            Some(conclusion) if terminal => conclusion,
            _ => status,
        };
        JobRecord {
            id: JobId::from(run.id),
            created_at: run.created_at,
            status,
            terminal,
            outcome,
            web_url: run.html_url,
        }
    }
}

fn find_workflow(workflows: &[WorkflowPayload], name: &str) -> Option<u64> {
    workflows.iter().find(|w| w.name == name).map(|w| w.id)
}

fn dispatch_inputs(request: &BuildRequest) -> Value {
    let mut inputs = json!({
        "heroku_apps_to_push": request.app_name,
        "heroku_apps_to_release": request.app_name,
    });
    if let (Some(node_env), Some(map)) = (&request.node_env, inputs.as_object_mut()) {
        map.insert("node_env".to_string(), json!(node_env));
    }
    inputs
}

#[derive(Debug, Clone)]
pub struct GitHubActionsClient {
    client: OctocrabClient,
    workflow_name: String,
    retry: RetryConfig,
}

impl GitHubActionsClient {
    pub fn new(client: OctocrabClient) -> Self {
        Self {
            client,
            workflow_name: DEPLOY_WORKFLOW_NAME.to_string(),
            retry: RetryConfig::DEFAULT,
        }
    }

    async fn get<T, P>(&self, route: &str, params: Option<&P>) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        P: Serialize + ?Sized + Sync,
    {
        retry_with_backoff(self.retry, RetryPolicy::RetryTransient, || async {
            self.client
                .inner()
                .get::<T, _, _>(route, params)
                .await
                .map_err(ApiError::from_octocrab)
        })
        .await
    }

    async fn workflow_id(&self) -> Result<u64, ApiError> {
        let list: WorkflowListPayload = self
            .get(&self.client.repo_route("/actions/workflows"), None::<&()>)
            .await?;
        find_workflow(&list.workflows, &self.workflow_name).ok_or_else(|| {
            ApiError::not_found(format!(
                "no workflow named {:?} in {}",
                self.workflow_name,
                self.client.repo()
            ))
        })
    }
}

impl JobProvider for GitHubActionsClient {
    fn name(&self) -> &'static str {
        "GitHub Actions"
    }

    async fn trigger(&self, request: &BuildRequest) -> Result<TriggerReceipt, ApiError> {
        let workflow_id = self.workflow_id().await?;
        debug!(workflow_id, branch = %request.branch, "dispatching workflow");
        self.client
            .inner()
            .actions()
            .create_workflow_dispatch(
                self.client.owner(),
                self.client.repo_name(),
                workflow_id.to_string(),
                request.branch.clone(),
            )
            .inputs(dispatch_inputs(request))
            .send()
            .await
            .map_err(ApiError::from_octocrab)?;
        Ok(TriggerReceipt {
            id: workflow_id.to_string(),
            number: None,
            web_url: None,
        })
    }

    async fn list_candidates(
        &self,
        receipt: &TriggerReceipt,
        request: &BuildRequest,
    ) -> Result<Vec<JobRecord>, ApiError> {
        let query = RunQuery {
            branch: &request.branch,
            event: "workflow_dispatch",
            head_sha: Some(request.sha.as_str()).filter(|s| !s.is_empty()),
        };
        let list: RunListPayload = self
            .get(
                &self
                    .client
                    .repo_route(&format!("/actions/workflows/{}/runs", receipt.id)),
                Some(&query),
            )
            .await?;
        Ok(list.workflow_runs.into_iter().map(JobRecord::from).collect())
    }

    async fn get_status(&self, id: &JobId) -> Result<JobRecord, ApiError> {
        let run: RunPayload = self
            .get(
                &self.client.repo_route(&format!("/actions/runs/{}", id)),
                None::<&()>,
            )
            .await?;
        Ok(run.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppName, RepoId, Sha};

    fn run(status: &str, conclusion: Option<&str>) -> RunPayload {
        serde_json::from_value(json!({
            "id": 30433642,
            "status": status,
            "conclusion": conclusion,
            "created_at": "2029-12-31T12:00:01Z",
            "html_url": "https://github.com/owlbert/owl-ears/actions/runs/30433642"
        }))
        .unwrap()
    }

    #[test]
    fn in_progress_run_is_not_terminal() {
        let record = JobRecord::from(run("in_progress", None));
        assert!(!record.terminal);
        assert_eq!(record.outcome, JobOutcome::Unknown);
        assert_eq!(record.status, "in_progress");
    }

    #[test]
    fn completed_run_reports_its_conclusion() {
        let ok = JobRecord::from(run("completed", Some("success")));
        assert!(ok.terminal);
        assert_eq!(ok.outcome, JobOutcome::Success);

        let failed = JobRecord::from(run("completed", Some("cancelled")));
        assert!(failed.terminal);
        assert_eq!(failed.outcome, JobOutcome::Failure);
        assert_eq!(failed.status, "cancelled");
    }

    #[test]
    fn run_keeps_its_html_url() {
        let record = JobRecord::from(run("queued", None));
        assert_eq!(record.id, JobId::from(30433642));
        assert_eq!(
            record.web_url.as_deref(),
            Some("https://github.com/owlbert/owl-ears/actions/runs/30433642")
        );
    }

    #[test]
    fn deploy_workflow_is_found_by_name() {
        let list: WorkflowListPayload = serde_json::from_value(json!({
            "total_count": 2,
            "workflows": [
                { "id": 161335, "name": "CI" },
                { "id": 269289, "name": "Deploy" }
            ]
        }))
        .unwrap();
        assert_eq!(find_workflow(&list.workflows, DEPLOY_WORKFLOW_NAME), Some(269289));
        assert_eq!(find_workflow(&list.workflows, "Release"), None);
    }

    #[test]
    fn dispatch_inputs_name_the_app_twice() {
        let request = BuildRequest {
            repo: RepoId::new("owlbert", "owl-ears"),
            branch: "feat/droopy-ears".to_string(),
            sha: Sha::new("abc123"),
            app_name: AppName::new("owl-ears-pr-72"),
            node_env: Some("review".to_string()),
        };
        assert_eq!(
            dispatch_inputs(&request),
            json!({
                "heroku_apps_to_push": "owl-ears-pr-72",
                "heroku_apps_to_release": "owl-ears-pr-72",
                "node_env": "review",
            })
        );
    }

    #[test]
    fn run_query_omits_empty_sha() {
        let query = RunQuery {
            branch: "main",
            event: "workflow_dispatch",
            head_sha: None,
        };
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({ "branch": "main", "event": "workflow_dispatch" })
        );
    }
}
