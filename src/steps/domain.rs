use tracing::info;

use super::RunContext;
use crate::error::DeployError;
use crate::jobs::JobProvider;
use crate::platform::ResourceProvider;
use crate::push::SourcePusher;

/// Registers the custom domain for apps in the designated pipelines.
///
/// The platform gives no way to see whether a previous run already did this,
/// so it runs on every deploy; the setup command itself must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureDomain;

impl ConfigureDomain {
    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        Ok(ctx.desired.uses_custom_domain())
    }

    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let app = ctx.require_app().await?;
        let command = &ctx.desired.domain.setup_command;
        ctx.platform
            .run_command(&app.id, command)
            .await
            .map_err(DeployError::mutation(format!("configure domain for {}", app.name)))?;
        info!("  - Started `{}` on {}.", command, app.name);
        Ok(())
    }
}
