//! Core domain types for review app provisioning.

pub mod desired;
pub mod ids;

pub use desired::{
    DEFAULT_DYNO_SIZE, DEFAULT_FEATURES, DeployMechanism, DesiredConfiguration, DomainSettings,
    SourceChange,
};
pub use ids::{AppId, AppName, JobId, PipelineId, PrNumber, RepoId, Sha};
