//! Steps that configure a running app: labs features, config vars, log drain.

use futures::future::try_join_all;
use tracing::info;

use super::RunContext;
use crate::error::DeployError;
use crate::jobs::JobProvider;
use crate::platform::ResourceProvider;
use crate::push::SourcePusher;

/// Enables every required labs feature that is currently off.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnableFeatures {
    /// Features found disabled (or all of them, for a new app).
    missing: Vec<String>,
}

impl EnableFeatures {
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let features = &ctx.desired.features;
        self.missing = match ctx.current_app().await? {
            None => features.clone(),
            Some(app) => {
                let enabled = try_join_all(
                    features
                        .iter()
                        .map(|feature| ctx.platform.get_feature(&app.id, feature)),
                )
                .await
                .map_err(DeployError::lookup(format!("features of {}", app.name)))?;
                features
                    .iter()
                    .zip(enabled)
                    .filter(|(_, on)| !on)
                    .map(|(feature, _)| feature.clone())
                    .collect()
            }
        };
        Ok(!self.missing.is_empty())
    }

    /// Flags are independent sub-resources, so they are flipped concurrently.
    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let app = ctx.require_app().await?;
        try_join_all(
            self.missing
                .iter()
                .map(|feature| ctx.platform.set_feature(&app.id, feature, true)),
        )
        .await
        .map_err(DeployError::mutation(format!("enable features on {}", app.name)))?;
        for feature in &self.missing {
            info!("  - Enabled {}.", feature);
        }
        Ok(())
    }
}

/// Applies the review-stage config vars when any of them is missing or stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyConfigVars;

impl ApplyConfigVars {
    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let desired = &ctx.desired.config_vars;
        if desired.is_empty() {
            return Ok(false);
        }
        let Some(app) = ctx.current_app().await? else {
            return Ok(true);
        };
        let current = ctx
            .platform
            .get_config_vars(&app.id)
            .await
            .map_err(DeployError::lookup(format!("config vars of {}", app.name)))?;
        Ok(desired.iter().any(|(k, v)| current.get(k) != Some(v)))
    }

    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let app = ctx.require_app().await?;
        ctx.platform
            .set_config_vars(&app.id, &ctx.desired.config_vars)
            .await
            .map_err(DeployError::mutation(format!("set config vars on {}", app.name)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachLogDrain;

impl AttachLogDrain {
    pub(super) async fn check<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let Some(url) = &ctx.desired.log_drain_url else {
            return Ok(false);
        };
        let Some(app) = ctx.current_app().await? else {
            return Ok(true);
        };
        let drains = ctx
            .platform
            .get_log_drains(&app.id)
            .await
            .map_err(DeployError::lookup(format!("log drains of {}", app.name)))?;
        Ok(!drains.contains(url))
    }

    pub(super) async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let Some(url) = &ctx.desired.log_drain_url else {
            return Ok(());
        };
        let app = ctx.require_app().await?;
        ctx.platform
            .add_log_drain(&app.id, url)
            .await
            .map_err(DeployError::mutation(format!("add log drain to {}", app.name)))
    }
}
