//! Invocation settings, read from `REVIEW_APPS_*` environment variables.
//!
//! Everything is validated before any remote call is made. [`Settings::resolve`]
//! then consults the platform once to turn the settings into the immutable
//! [`DesiredConfiguration`] a run works from.

use std::fmt;
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;
use tracing::debug;

use crate::error::DeployError;
use crate::jobs::PollSettings;
use crate::platform::ResourceProvider;
use crate::teardown::DEFAULT_SETTLE_DELAY;
use crate::types::{
    AppName, DEFAULT_DYNO_SIZE, DEFAULT_FEATURES, DeployMechanism, DesiredConfiguration,
    DomainSettings, PrNumber, RepoId, Sha, SourceChange,
};

pub const DEFAULT_STACK: &str = "heroku-22";
pub const DEFAULT_DOMAIN_SETUP_COMMAND: &str = "node bin/setdomain.js";
pub const DEFAULT_DOMAIN_TEARDOWN_COMMAND: &str = "node bin/removedomain.js";

const EMAIL_PATTERN: &str = r"^[a-z0-9-@.]+$";
const API_KEY_PATTERN: &str = r"^[a-f0-9-]+$";
const PIPELINE_PATTERN: &str = r"^[a-z0-9_-]+$";
const CIRCLECI_TOKEN_PATTERN: &str = r"^[a-f0-9]{40}$";

/// The pull request event that triggered this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
    Closed,
    /// Any other event; nothing is done for it.
    Other(String),
}

impl PullRequestAction {
    pub fn parse(s: &str) -> Self {
        match s {
            "opened" => PullRequestAction::Opened,
            "reopened" => PullRequestAction::Reopened,
            "synchronize" => PullRequestAction::Synchronize,
            "closed" => PullRequestAction::Closed,
            other => PullRequestAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PullRequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullRequestAction::Opened => write!(f, "opened"),
            PullRequestAction::Reopened => write!(f, "reopened"),
            PullRequestAction::Synchronize => write!(f, "synchronize"),
            PullRequestAction::Closed => write!(f, "closed"),
            PullRequestAction::Other(s) => write!(f, "{}", s),
        }
    }
}

/// The CI system that runs container builds.
#[derive(Debug, Clone)]
pub enum BuildBackendSettings {
    CircleCi { token: SecretString },
    GitHubActions,
}

/// Validated invocation settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub heroku_email: String,
    pub heroku_api_key: SecretString,
    /// Team that owns newly created apps; personal account when unset.
    pub heroku_team: Option<String>,
    pub pipeline: String,
    pub pr: PrNumber,
    pub action: PullRequestAction,
    pub repo: RepoId,
    pub branch: String,
    pub sha: Sha,
    pub git_ref: String,
    /// Commit subject; read from the local checkout when unset.
    pub change_message: Option<String>,
    pub size: String,
    pub stack: String,
    pub log_drain_url: Option<String>,
    pub node_env: Option<String>,
    pub deploy: DeployMechanism,
    /// Only set for container deploys.
    pub build_backend: Option<BuildBackendSettings>,
    /// Used by the GitHub Actions backend and for PR comments.
    pub github_token: Option<SecretString>,
    pub domain: DomainSettings,
    pub polling: PollSettings,
    pub settle_delay: Duration,
}

fn check_pattern(pattern: &str, key: &str, value: &str) -> Result<(), DeployError> {
    let re = Regex::new(pattern)
        .map_err(|e| DeployError::Validation(format!("bad pattern for {}: {}", key, e)))?;
    if re.is_match(value) {
        Ok(())
    } else {
        Err(DeployError::Validation(format!(
            "{} has an invalid value (expected {})",
            key, pattern
        )))
    }
}

impl Settings {
    /// Reads and validates settings through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DeployError> {
        let optional = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &str| {
            optional(key).ok_or_else(|| DeployError::Validation(format!("{} is required", key)))
        };

        let heroku_email = required("REVIEW_APPS_HEROKU_EMAIL")?;
        check_pattern(EMAIL_PATTERN, "REVIEW_APPS_HEROKU_EMAIL", &heroku_email)?;
        let api_key = required("REVIEW_APPS_HEROKU_API_KEY")?;
        check_pattern(API_KEY_PATTERN, "REVIEW_APPS_HEROKU_API_KEY", &api_key)?;

        let pipeline = required("REVIEW_APPS_PIPELINE")?;
        check_pattern(PIPELINE_PATTERN, "REVIEW_APPS_PIPELINE", &pipeline)?;

        let pr_raw = required("REVIEW_APPS_PR_NUMBER")?;
        let pr = match pr_raw.parse::<u64>() {
            Ok(n) if n > 0 => PrNumber(n),
            _ => {
                return Err(DeployError::Validation(format!(
                    "\"{}\" is not a valid pull request number",
                    pr_raw
                )));
            }
        };
        let action = PullRequestAction::parse(&required("REVIEW_APPS_ACTION")?);

        let repo_raw = required("REVIEW_APPS_REPOSITORY")?;
        let repo = RepoId::parse(&repo_raw).ok_or_else(|| {
            DeployError::Validation(format!("\"{}\" is not an owner/repo pair", repo_raw))
        })?;

        let deploy = match optional("REVIEW_APPS_DEPLOY").as_deref() {
            None | Some("push") => DeployMechanism::DirectPush,
            Some("docker") => DeployMechanism::ContainerBuild,
            Some(other) => {
                return Err(DeployError::Validation(format!(
                    "REVIEW_APPS_DEPLOY must be \"push\" or \"docker\", not \"{}\"",
                    other
                )));
            }
        };

        let github_token = optional("REVIEW_APPS_GITHUB_TOKEN").map(SecretString::from);
        let build_backend = match deploy {
            DeployMechanism::DirectPush => None,
            DeployMechanism::ContainerBuild => {
                match optional("REVIEW_APPS_BUILD_BACKEND").as_deref() {
                    None | Some("circleci") => {
                        let token = required("REVIEW_APPS_CIRCLECI_TOKEN")?;
                        check_pattern(CIRCLECI_TOKEN_PATTERN, "REVIEW_APPS_CIRCLECI_TOKEN", &token)?;
                        Some(BuildBackendSettings::CircleCi {
                            token: SecretString::from(token),
                        })
                    }
                    Some("github-actions") => {
                        if github_token.is_none() {
                            return Err(DeployError::Validation(
                                "REVIEW_APPS_GITHUB_TOKEN is required for GitHub Actions builds"
                                    .to_string(),
                            ));
                        }
                        Some(BuildBackendSettings::GitHubActions)
                    }
                    Some(other) => {
                        return Err(DeployError::Validation(format!(
                            "REVIEW_APPS_BUILD_BACKEND must be \"circleci\" or \"github-actions\", not \"{}\"",
                            other
                        )));
                    }
                }
            }
        };

        let domain = DomainSettings {
            pipelines: optional("REVIEW_APPS_DOMAIN_PIPELINES")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            host_suffix: optional("REVIEW_APPS_DOMAIN_SUFFIX"),
            setup_command: optional("REVIEW_APPS_DOMAIN_SETUP_COMMAND")
                .unwrap_or_else(|| DEFAULT_DOMAIN_SETUP_COMMAND.to_string()),
            teardown_command: optional("REVIEW_APPS_DOMAIN_TEARDOWN_COMMAND")
                .unwrap_or_else(|| DEFAULT_DOMAIN_TEARDOWN_COMMAND.to_string()),
        };

        let settle_delay = match optional("REVIEW_APPS_TEARDOWN_SETTLE_SECS") {
            None => DEFAULT_SETTLE_DELAY,
            Some(raw) => Duration::from_secs(raw.parse().map_err(|_| {
                DeployError::Validation(format!(
                    "REVIEW_APPS_TEARDOWN_SETTLE_SECS must be a number of seconds, not \"{}\"",
                    raw
                ))
            })?),
        };

        let polling = PollSettings::from_lookup(&lookup)?;

        Ok(Settings {
            heroku_email,
            heroku_api_key: SecretString::from(api_key),
            heroku_team: optional("REVIEW_APPS_HEROKU_TEAM"),
            git_ref: optional("REVIEW_APPS_REF")
                .unwrap_or_else(|| format!("refs/remotes/pull/{}/merge", pr.0)),
            pipeline,
            pr,
            action,
            repo,
            branch: required("REVIEW_APPS_BRANCH")?,
            sha: Sha::new(required("REVIEW_APPS_SHA")?),
            change_message: optional("REVIEW_APPS_CHANGE_MESSAGE"),
            size: optional("REVIEW_APPS_SIZE").unwrap_or_else(|| DEFAULT_DYNO_SIZE.to_string()),
            stack: optional("REVIEW_APPS_STACK").unwrap_or_else(|| DEFAULT_STACK.to_string()),
            log_drain_url: optional("REVIEW_APPS_LOG_DRAIN_URL"),
            node_env: optional("REVIEW_APPS_NODE_ENV"),
            deploy,
            build_backend,
            github_token,
            domain,
            polling,
            settle_delay,
        })
    }

    pub fn from_env() -> Result<Self, DeployError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Looks up the pipeline and derives the desired state of the review app.
    ///
    /// The app is named `<base>-pr-<n>`, where `<base>` is the pipeline's
    /// review-app base name if one is configured and the pipeline name
    /// otherwise. Config vars come from the pipeline's review stage.
    pub async fn resolve<P: ResourceProvider>(
        &self,
        platform: &P,
        change_message: String,
    ) -> Result<DesiredConfiguration, DeployError> {
        let pipeline_id = platform
            .get_pipeline_id(&self.pipeline)
            .await
            .map_err(DeployError::lookup(format!("pipeline {}", self.pipeline)))?
            .ok_or_else(|| {
                DeployError::Validation(format!(
                    "the pipeline \"{}\" does not exist",
                    self.pipeline
                ))
            })?;

        let base_name = platform
            .get_review_app_base_name(&pipeline_id)
            .await
            .map_err(DeployError::lookup(format!(
                "review app config of {}",
                self.pipeline
            )))?
            .unwrap_or_else(|| self.pipeline.clone());

        let config_vars = platform
            .get_pipeline_stage_vars(&pipeline_id)
            .await
            .map_err(DeployError::lookup(format!(
                "review config vars of {}",
                self.pipeline
            )))?;

        let app_name = AppName::for_pull_request(&base_name, self.pr);
        debug!(app = %app_name, pipeline_id = %pipeline_id, vars = config_vars.len(), "resolved settings");

        Ok(DesiredConfiguration {
            app_name,
            pipeline_name: self.pipeline.clone(),
            pipeline_id,
            size: self.size.clone(),
            stack: self.stack.clone(),
            log_drain_url: self.log_drain_url.clone(),
            config_vars,
            features: DEFAULT_FEATURES.iter().map(|f| f.to_string()).collect(),
            deploy: self.deploy,
            source: SourceChange {
                repo: self.repo.clone(),
                pr: self.pr,
                branch: self.branch.clone(),
                sha: self.sha.clone(),
                git_ref: self.git_ref.clone(),
                message: change_message,
            },
            node_env: self.node_env.clone(),
            domain: self.domain.clone(),
        })
    }
}
