//! Steps that shape the app itself: existence, pipeline membership, stack and
//! dyno size.

use tracing::{info, warn};

use super::RunContext;
use crate::error::DeployError;
use crate::jobs::JobProvider;
use crate::platform::ResourceProvider;
use crate::push::SourcePusher;
use crate::types::{DEFAULT_DYNO_SIZE, DeployMechanism};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateApp;

impl CreateApp {
    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let exists = ctx
            .cache
            .exists(&ctx.desired.app_name)
            .await
            .map_err(DeployError::lookup(format!("app {}", ctx.desired.app_name)))?;
        Ok(!exists)
    }

    /// Creates the app. An app that turns out to exist already is adopted
    /// rather than treated as a failure.
    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let name = &ctx.desired.app_name;
        match ctx.platform.create_app(name).await {
            Ok(app) => {
                ctx.cache.record(app).await;
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                warn!(app = %name, error = %e, "app already exists, reconciling it instead");
                ctx.cache.invalidate(name).await;
                match ctx.current_app().await? {
                    Some(_) => Ok(()),
                    None => Err(DeployError::AlreadyExists(name.clone())),
                }
            }
            Err(e) => {
                ctx.cache.invalidate(name).await;
                Err(DeployError::mutation(format!("create app {}", name))(e))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoupleToPipeline;

impl CoupleToPipeline {
    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let Some(app) = ctx.current_app().await? else {
            return Ok(true);
        };
        let members = ctx
            .platform
            .get_pipeline_apps(&ctx.desired.pipeline_id)
            .await
            .map_err(DeployError::lookup(format!(
                "apps in pipeline {}",
                ctx.desired.pipeline_name
            )))?;
        Ok(!members.contains(&app.id))
    }

    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let app = ctx.require_app().await?;
        ctx.platform
            .couple_app(&app.id, &ctx.desired.pipeline_id)
            .await
            .map_err(DeployError::mutation(format!(
                "couple {} to pipeline {}",
                app.name, ctx.desired.pipeline_name
            )))
    }
}

/// Only relevant to direct pushes; a container carries its own base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetStack;

impl SetStack {
    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        if ctx.desired.deploy == DeployMechanism::ContainerBuild {
            return Ok(false);
        }
        Ok(match ctx.current_app().await? {
            None => true,
            Some(app) => app.build_stack.as_deref() != Some(ctx.desired.stack.as_str()),
        })
    }

    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let app = ctx.require_app().await?;
        ctx.platform
            .set_stack(&app.id, &ctx.desired.stack)
            .await
            .map_err(DeployError::mutation(format!("set stack of {}", app.name)))?;
        ctx.cache.invalidate(&app.name).await;
        Ok(())
    }
}

/// Runs after the deploy, since an app that was never deployed has no `web`
/// formation to resize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSize;

impl SetSize {
    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let desired = &ctx.desired.size;
        if ctx.current_app().await?.is_none() {
            return Ok(!DEFAULT_DYNO_SIZE.eq_ignore_ascii_case(desired));
        }
        let current = ctx
            .platform
            .get_size(&ctx.desired.app_name)
            .await
            .map_err(DeployError::lookup(format!(
                "dyno size of {}",
                ctx.desired.app_name
            )))?;
        // Unknown size (formation not found) must not be mistaken for "already right".
        Ok(match current {
            Some(current) => !current.eq_ignore_ascii_case(desired),
            None => true,
        })
    }

    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let name = &ctx.desired.app_name;
        ctx.platform
            .set_size(name, &ctx.desired.size)
            .await
            .map_err(DeployError::mutation(format!("set dyno size of {}", name)))?;
        info!("  - Dyno size set to {}.", ctx.desired.size);
        Ok(())
    }
}
