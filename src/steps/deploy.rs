//! The two mutually exclusive deploy steps. Whichever matches the configured
//! [`DeployMechanism`] always runs; the other never does.

use tracing::info;

use super::RunContext;
use crate::error::DeployError;
use crate::jobs::{BuildRequest, JobProvider, JobRecord, run_build};
use crate::platform::ResourceProvider;
use crate::push::SourcePusher;
use crate::types::DeployMechanism;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectDeploy;

impl DirectDeploy {
    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        if ctx.desired.deploy != DeployMechanism::DirectPush {
            return Ok(false);
        }
        let git_ref = &ctx.desired.source.git_ref;
        let exists = ctx.pusher.ref_exists(git_ref).await.map_err(|e| DeployError::Push {
            app: ctx.desired.app_name.clone(),
            details: e.to_string(),
        })?;
        if !exists {
            return Err(DeployError::Validation(format!(
                "git ref {} does not exist in the local checkout",
                git_ref
            )));
        }
        Ok(true)
    }

    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let app = &ctx.desired.app_name;
        ctx.pusher
            .push(app, &ctx.desired.source.git_ref)
            .await
            .map_err(|e| DeployError::Push {
                app: app.clone(),
                details: e.to_string(),
            })?;
        info!("  - Pushed {} to {}.", ctx.desired.source.sha.short(), app);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerDeploy {
    /// The finished build, once `run` has succeeded.
    finished: Option<JobRecord>,
}

impl ContainerDeploy {
    pub fn finished(&self) -> Option<&JobRecord> {
        self.finished.as_ref()
    }

    fn request<P, J, G>(ctx: &RunContext<'_, P, J, G>) -> BuildRequest {
        let source = &ctx.desired.source;
        BuildRequest {
            repo: source.repo.clone(),
            branch: source.branch.clone(),
            sha: source.sha.clone(),
            app_name: ctx.desired.app_name.clone(),
            node_env: ctx.desired.node_env.clone(),
        }
    }

    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        if ctx.desired.deploy != DeployMechanism::ContainerBuild {
            return Ok(false);
        }
        if ctx.jobs.is_none() {
            return Err(DeployError::Validation(
                "container deploys need a build backend".to_string(),
            ));
        }
        Ok(true)
    }

    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let jobs = ctx.jobs.ok_or_else(|| {
            DeployError::Validation("container deploys need a build backend".to_string())
        })?;
        let record = run_build(jobs, &Self::request(ctx), &ctx.polling).await?;
        self.finished = Some(record);
        Ok(())
    }
}
