//! The immutable input to a reconciliation run.
//!
//! A `DesiredConfiguration` is produced once per invocation by
//! [`crate::config::Settings::resolve`] and is only ever read afterwards. Every
//! step holds a shared reference to it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{AppName, PipelineId, PrNumber, RepoId, Sha};

/// Dyno size given to a freshly created app by the platform.
pub const DEFAULT_DYNO_SIZE: &str = "standard-1x";

/// Labs features every review app must have enabled.
pub const DEFAULT_FEATURES: [&str; 3] = [
    "nodejs-language-metrics",
    "runtime-dyno-metadata",
    "runtime-heroku-metrics",
];

/// How the app's code reaches the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMechanism {
    /// `git push` straight to the platform's git endpoint.
    DirectPush,
    /// A CI job builds a container image and releases it to the app.
    ContainerBuild,
}

impl fmt::Display for DeployMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMechanism::DirectPush => write!(f, "push"),
            DeployMechanism::ContainerBuild => write!(f, "docker"),
        }
    }
}

/// The source-control change being deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceChange {
    pub repo: RepoId,
    pub pr: PrNumber,
    pub branch: String,
    pub sha: Sha,
    /// Local ref pushed by the direct deploy (usually the PR merge ref).
    pub git_ref: String,
    /// Commit subject, echoed in notifications.
    pub message: String,
}

/// Custom-domain handling for a designated set of pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DomainSettings {
    /// Pipelines whose review apps get a custom domain.
    pub pipelines: Vec<String>,
    /// Host suffix; the public URL becomes `http://<app>.<suffix>`.
    pub host_suffix: Option<String>,
    /// One-off command that registers the domain.
    pub setup_command: String,
    /// One-off command that removes the domain before teardown.
    pub teardown_command: String,
}

impl DomainSettings {
    pub fn applies_to(&self, pipeline_name: &str) -> bool {
        self.pipelines.iter().any(|p| p == pipeline_name)
    }

    /// Returns the custom public URL for `app`, if this pipeline has one.
    pub fn public_url(&self, pipeline_name: &str, app: &AppName) -> Option<String> {
        if !self.applies_to(pipeline_name) {
            return None;
        }
        self.host_suffix
            .as_ref()
            .map(|suffix| format!("http://{}.{}", app, suffix))
    }
}

/// Everything a run needs to know about the desired state of the review app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfiguration {
    pub app_name: AppName,
    pub pipeline_name: String,
    pub pipeline_id: PipelineId,
    /// Desired `web` formation size, compared case-insensitively.
    pub size: String,
    /// Desired build stack. Only consulted on the direct-push path.
    pub stack: String,
    pub log_drain_url: Option<String>,
    /// Config vars applied wholesale to the app.
    pub config_vars: BTreeMap<String, String>,
    /// Labs features that must be enabled.
    pub features: Vec<String>,
    pub deploy: DeployMechanism,
    pub source: SourceChange,
    /// Forwarded to container builds as `NODE_ENV`.
    pub node_env: Option<String>,
    pub domain: DomainSettings,
}

impl DesiredConfiguration {
    /// Whether this app's pipeline is one of the custom-domain pipelines.
    pub fn uses_custom_domain(&self) -> bool {
        self.domain.applies_to(&self.pipeline_name)
    }
}
