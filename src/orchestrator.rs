//! Plans and executes the reconciliation pipeline for one review app.
//!
//! # Algorithm
//!
//! 1. **Plan**: every step's prerequisite check runs concurrently. They only
//!    read, and reads of the app itself are serialized and memoized by the
//!    run's cache. The first failing check aborts the run with no plan.
//! 2. **Execute**: the steps that must run are applied one at a time, in
//!    pipeline order. The first failure stops the run; steps already applied
//!    stay applied, and re-running the whole action converges.
//!
//! The pipeline is a literal ordered list ([`StepName::PIPELINE`]), so the
//! dependency order (create, couple, configure, deploy, domain) is visible in
//! one place.

use futures::future::try_join_all;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::error::DeployError;
use crate::jobs::{JobProvider, JobRecord, PollSettings};
use crate::platform::{App, ResourceProvider};
use crate::push::SourcePusher;
use crate::steps::{RunContext, Step, StepKind, StepName, pipeline};
use crate::types::DesiredConfiguration;

/// A run that stopped before reconciling everything.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("checking \"{title}\" failed: {source}")]
    PrereqFailed {
        title: &'static str,
        #[source]
        source: DeployError,
    },

    #[error("[Step {number}/{total}] {title} failed: {source}")]
    StepFailed {
        number: usize,
        total: usize,
        title: &'static str,
        #[source]
        source: DeployError,
    },
}

impl OrchestrationError {
    pub fn source_error(&self) -> &DeployError {
        match self {
            OrchestrationError::PrereqFailed { source, .. }
            | OrchestrationError::StepFailed { source, .. } => source,
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Steps that ran, in order.
    pub executed: Vec<StepName>,
    /// The app as last seen, if it could be read back.
    pub app: Option<App>,
    /// Where the review app can be reached.
    pub url: Option<String>,
    /// The container build, for container deploys.
    pub build: Option<JobRecord>,
}

pub struct Orchestrator<'a, P, J, G> {
    ctx: RunContext<'a, P, J, G>,
    steps: Vec<Step>,
}

impl<'a, P, J, G> Orchestrator<'a, P, J, G>
where
    P: ResourceProvider,
    J: JobProvider,
    G: SourcePusher,
{
    pub fn new(
        desired: &'a DesiredConfiguration,
        platform: &'a P,
        jobs: Option<&'a J>,
        pusher: &'a G,
        polling: PollSettings,
    ) -> Self {
        Self {
            ctx: RunContext::new(desired, platform, jobs, pusher, polling),
            steps: pipeline(),
        }
    }

    /// Checks every step concurrently and returns the positions of the steps
    /// that must run, in pipeline order.
    pub async fn plan(&mut self) -> Result<Vec<usize>, OrchestrationError> {
        let ctx = &self.ctx;
        try_join_all(self.steps.iter_mut().map(|step| async move {
            let title = step.title();
            step.check_prereqs(ctx)
                .await
                .map_err(|source| OrchestrationError::PrereqFailed { title, source })
        }))
        .await?;

        Ok(self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.should_run() == Some(true))
            .map(|(i, _)| i)
            .collect())
    }

    /// The step names at the given positions.
    pub fn names(&self, queue: &[usize]) -> Vec<StepName> {
        queue.iter().map(|&i| self.steps[i].name()).collect()
    }

    /// Runs the queued steps strictly in sequence, stopping at the first failure.
    pub async fn execute(&mut self, queue: &[usize]) -> Result<Vec<StepName>, OrchestrationError> {
        let total = queue.len();
        let mut executed = Vec::with_capacity(total);
        for (n, &i) in queue.iter().enumerate() {
            let step = &mut self.steps[i];
            let number = n + 1;
            info!("[Step {}/{}] {}...", number, total, step.title());
            step.run(&self.ctx)
                .await
                .map_err(|source| OrchestrationError::StepFailed {
                    number,
                    total,
                    title: step.title(),
                    source,
                })?;
            executed.push(step.name());
        }
        Ok(executed)
    }

    /// Plans, executes, and reports where the app can be reached.
    #[instrument(skip_all, fields(app = %self.ctx.desired.app_name))]
    pub async fn run(mut self) -> Result<RunReport, OrchestrationError> {
        let queue = self.plan().await?;
        let executed = self.execute(&queue).await?;

        let desired = self.ctx.desired;
        let app = match self.ctx.current_app().await {
            Ok(app) => app,
            Err(e) => {
                warn!(error = %e, "could not read the app back after deploying");
                None
            }
        };
        let url = desired
            .domain
            .public_url(&desired.pipeline_name, &desired.app_name)
            .or_else(|| app.as_ref().and_then(|a| a.web_url.clone()));
        let build = self.steps.iter().find_map(|step| match step.kind() {
            StepKind::ContainerDeploy(deploy) => deploy.finished().cloned(),
            _ => None,
        });

        Ok(RunReport {
            executed,
            app,
            url,
            build,
        })
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
