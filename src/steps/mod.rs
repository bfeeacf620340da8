//! Reconciliation steps.
//!
//! A [`Step`] is one idempotent unit of remote mutation. Each step has two
//! phases:
//!
//! 1. [`Step::check_prereqs`] reads live state through the run's
//!    [`RemoteStateCache`] and decides whether the step must run. It never
//!    mutates the platform, so all steps are checked concurrently.
//! 2. [`Step::run`] applies the mutation. Steps run one at a time, in pipeline
//!    order, because later steps read what earlier steps wrote.
//!
//! Whatever a step learns during its check and needs again in `run` is kept
//! in its own [`StepKind`] payload. Nothing is shared between steps except the
//! cache.

mod app;
mod deploy;
mod domain;
mod settings;

use std::fmt;

use tracing::debug;

use crate::api::ApiError;
use crate::error::DeployError;
use crate::jobs::{JobProvider, PollSettings};
use crate::platform::{App, RemoteStateCache, ResourceProvider};
use crate::push::SourcePusher;
use crate::types::DesiredConfiguration;

pub use app::{CoupleToPipeline, CreateApp, SetSize, SetStack};
pub use deploy::{ContainerDeploy, DirectDeploy};
pub use domain::ConfigureDomain;
pub use settings::{ApplyConfigVars, AttachLogDrain, EnableFeatures};

/// Which step this is. Declared in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepName {
    CreateApp,
    CoupleToPipeline,
    EnableFeatures,
    ApplyConfigVars,
    AttachLogDrain,
    SetStack,
    DirectDeploy,
    ContainerDeploy,
    SetSize,
    ConfigureDomain,
}

impl StepName {
    /// Every step, in the order the pipeline runs them.
    pub const PIPELINE: [StepName; 10] = [
        StepName::CreateApp,
        StepName::CoupleToPipeline,
        StepName::EnableFeatures,
        StepName::ApplyConfigVars,
        StepName::AttachLogDrain,
        StepName::SetStack,
        StepName::DirectDeploy,
        StepName::ContainerDeploy,
        StepName::SetSize,
        StepName::ConfigureDomain,
    ];

    pub fn title(self) -> &'static str {
        match self {
            StepName::CreateApp => "Creating app",
            StepName::CoupleToPipeline => "Coupling app to pipeline",
            StepName::EnableFeatures => "Enabling features",
            StepName::ApplyConfigVars => "Setting config vars",
            StepName::AttachLogDrain => "Adding log drain",
            StepName::SetStack => "Setting stack",
            StepName::DirectDeploy => "Pushing code",
            StepName::ContainerDeploy => "Building and releasing container",
            StepName::SetSize => "Setting dyno size",
            StepName::ConfigureDomain => "Configuring domain",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Per-kind state, including scratch fields filled in by the prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    CreateApp(CreateApp),
    CoupleToPipeline(CoupleToPipeline),
    EnableFeatures(EnableFeatures),
    ApplyConfigVars(ApplyConfigVars),
    AttachLogDrain(AttachLogDrain),
    SetStack(SetStack),
    DirectDeploy(DirectDeploy),
    ContainerDeploy(ContainerDeploy),
    SetSize(SetSize),
    ConfigureDomain(ConfigureDomain),
}

impl StepKind {
    fn new(name: StepName) -> Self {
        match name {
            StepName::CreateApp => StepKind::CreateApp(CreateApp),
            StepName::CoupleToPipeline => StepKind::CoupleToPipeline(CoupleToPipeline),
            StepName::EnableFeatures => StepKind::EnableFeatures(EnableFeatures::default()),
            StepName::ApplyConfigVars => StepKind::ApplyConfigVars(ApplyConfigVars),
            StepName::AttachLogDrain => StepKind::AttachLogDrain(AttachLogDrain),
            StepName::SetStack => StepKind::SetStack(SetStack),
            StepName::DirectDeploy => StepKind::DirectDeploy(DirectDeploy),
            StepName::ContainerDeploy => StepKind::ContainerDeploy(ContainerDeploy::default()),
            StepName::SetSize => StepKind::SetSize(SetSize),
            StepName::ConfigureDomain => StepKind::ConfigureDomain(ConfigureDomain),
        }
    }

    fn name(&self) -> StepName {
        match self {
            StepKind::CreateApp(_) => StepName::CreateApp,
            StepKind::CoupleToPipeline(_) => StepName::CoupleToPipeline,
            StepKind::EnableFeatures(_) => StepName::EnableFeatures,
            StepKind::ApplyConfigVars(_) => StepName::ApplyConfigVars,
            StepKind::AttachLogDrain(_) => StepName::AttachLogDrain,
            StepKind::SetStack(_) => StepName::SetStack,
            StepKind::DirectDeploy(_) => StepName::DirectDeploy,
            StepKind::ContainerDeploy(_) => StepName::ContainerDeploy,
            StepKind::SetSize(_) => StepName::SetSize,
            StepKind::ConfigureDomain(_) => StepName::ConfigureDomain,
        }
    }
}

/// Everything a step can read or act through during one run.
pub struct RunContext<'a, P, J, G> {
    pub desired: &'a DesiredConfiguration,
    pub platform: &'a P,
    pub cache: RemoteStateCache<'a, P>,
    /// Build backend. Only needed when deploying a container.
    pub jobs: Option<&'a J>,
    pub pusher: &'a G,
    pub polling: PollSettings,
}

impl<'a, P, J, G> RunContext<'a, P, J, G>
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
            desired,
            platform,
            cache: RemoteStateCache::new(platform),
            jobs,
            pusher,
            polling,
        }
    }

    /// The target app as currently cached, `None` if it does not exist yet.
    pub async fn current_app(&self) -> Result<Option<App>, DeployError> {
        self.cache
            .app(&self.desired.app_name)
            .await
            .map_err(DeployError::lookup(format!("app {}", self.desired.app_name)))
    }

    /// The target app, which an earlier step must have created.
    pub async fn require_app(&self) -> Result<App, DeployError> {
        self.current_app().await?.ok_or_else(|| {
            DeployError::lookup(format!("app {}", self.desired.app_name))(ApiError::not_found(
                format!("app {} does not exist", self.desired.app_name),
            ))
        })
    }
}

/// One unit of reconciliation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// `None` until the prerequisite check has run.
    should_run: Option<bool>,
    kind: StepKind,
}

impl Step {
    pub fn new(name: StepName) -> Self {
        Self {
            should_run: None,
            kind: StepKind::new(name),
        }
    }

    pub fn name(&self) -> StepName {
        self.kind.name()
    }

    pub fn title(&self) -> &'static str {
        self.name().title()
    }

    pub fn should_run(&self) -> Option<bool> {
        self.should_run
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    /// Reads live state and decides whether this step must run.
    pub async fn check_prereqs<P, J, G>(
        &mut self,
        ctx: &RunContext<'_, P, J, G>,
    ) -> Result<bool, DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        let should_run = match &mut self.kind {
            StepKind::CreateApp(s) => s.check(ctx).await?,
            StepKind::CoupleToPipeline(s) => s.check(ctx).await?,
            StepKind::EnableFeatures(s) => s.check(ctx).await?,
            StepKind::ApplyConfigVars(s) => s.check(ctx).await?,
            StepKind::AttachLogDrain(s) => s.check(ctx).await?,
            StepKind::SetStack(s) => s.check(ctx).await?,
            StepKind::DirectDeploy(s) => s.check(ctx).await?,
            StepKind::ContainerDeploy(s) => s.check(ctx).await?,
            StepKind::SetSize(s) => s.check(ctx).await?,
            StepKind::ConfigureDomain(s) => s.check(ctx).await?,
        };
        debug!(step = %self.name(), should_run, "checked prerequisites");
        self.should_run = Some(should_run);
        Ok(should_run)
    }

    /// Applies the step. Refuses to run unless the check decided it must.
    pub async fn run<P, J, G>(&mut self, ctx: &RunContext<'_, P, J, G>) -> Result<(), DeployError>
    where
        P: ResourceProvider,
        J: JobProvider,
        G: SourcePusher,
    {
        if self.should_run != Some(true) {
            return Err(DeployError::Validation(format!(
                "step \"{}\" was run without being planned",
                self.title()
            )));
        }
        match &mut self.kind {
            StepKind::CreateApp(s) => s.run(ctx).await,
            StepKind::CoupleToPipeline(s) => s.run(ctx).await,
            StepKind::EnableFeatures(s) => s.run(ctx).await,
            StepKind::ApplyConfigVars(s) => s.run(ctx).await,
            StepKind::AttachLogDrain(s) => s.run(ctx).await,
            StepKind::SetStack(s) => s.run(ctx).await,
            StepKind::DirectDeploy(s) => s.run(ctx).await,
            StepKind::ContainerDeploy(s) => s.run(ctx).await,
            StepKind::SetSize(s) => s.run(ctx).await,
            StepKind::ConfigureDomain(s) => s.run(ctx).await,
        }
    }
}

/// The full pipeline, in execution order.
pub fn pipeline() -> Vec<Step> {
    StepName::PIPELINE.into_iter().map(Step::new).collect()
}
