//! The remote platform that hosts review apps.
//!
//! [`ResourceProvider`] is the narrow interface the reconciliation core talks
//! through. Lookups return `Ok(None)` for "does not exist (yet)" so that a 404
//! is data rather than an error; every other failure is an [`ApiError`].
//!
//! [`HerokuClient`] implements the trait against the Heroku Platform API, and
//! [`RemoteStateCache`] memoizes app lookups for the lifetime of one run.

mod cache;
mod heroku;

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::types::{AppId, AppName, PipelineId};

pub use cache::RemoteStateCache;
pub use heroku::{HEROKU_API_URL, HerokuClient};

/// An app as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub name: AppName,
    pub web_url: Option<String>,
    /// The stack the next build will use.
    pub build_stack: Option<String>,
}

/// Remote platform operations used by reconciliation and teardown.
///
/// Implementations are expected to handle transport retries themselves; the
/// callers never retry.
pub trait ResourceProvider: Sync {
    /// Fetches an app by name. `Ok(None)` if it does not exist.
    fn get_app(
        &self,
        name: &AppName,
    ) -> impl Future<Output = Result<Option<App>, ApiError>> + Send;

    /// Checks whether an app exists, without caching.
    fn exists(&self, name: &AppName) -> impl Future<Output = Result<bool, ApiError>> + Send {
        async move { Ok(self.get_app(name).await?.is_some()) }
    }

    /// Creates an app. Fails with a `Conflict` error if the name is taken.
    fn create_app(&self, name: &AppName) -> impl Future<Output = Result<App, ApiError>> + Send;

    fn delete_app(&self, name: &AppName) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Resolves a pipeline name to its id. `Ok(None)` if there is no such pipeline.
    fn get_pipeline_id(
        &self,
        pipeline_name: &str,
    ) -> impl Future<Output = Result<Option<PipelineId>, ApiError>> + Send;

    /// Returns the review-app base name configured on the pipeline, if any.
    fn get_review_app_base_name(
        &self,
        pipeline: &PipelineId,
    ) -> impl Future<Output = Result<Option<String>, ApiError>> + Send;

    /// Config vars of the pipeline's review stage.
    fn get_pipeline_stage_vars(
        &self,
        pipeline: &PipelineId,
    ) -> impl Future<Output = Result<BTreeMap<String, String>, ApiError>> + Send;

    /// Ids of the apps coupled to the pipeline.
    fn get_pipeline_apps(
        &self,
        pipeline: &PipelineId,
    ) -> impl Future<Output = Result<Vec<AppId>, ApiError>> + Send;

    fn couple_app(
        &self,
        app: &AppId,
        pipeline: &PipelineId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn get_feature(
        &self,
        app: &AppId,
        feature: &str,
    ) -> impl Future<Output = Result<bool, ApiError>> + Send;

    fn set_feature(
        &self,
        app: &AppId,
        feature: &str,
        enabled: bool,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn get_config_vars(
        &self,
        app: &AppId,
    ) -> impl Future<Output = Result<BTreeMap<String, String>, ApiError>> + Send;

    /// Sets the given config vars on the app, leaving others untouched.
    fn set_config_vars(
        &self,
        app: &AppId,
        vars: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn get_log_drains(
        &self,
        app: &AppId,
    ) -> impl Future<Output = Result<Vec<String>, ApiError>> + Send;

    fn add_log_drain(
        &self,
        app: &AppId,
        url: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Size of the app's `web` formation. `Ok(None)` if the formation does not
    /// exist, which is the case for an app that has never been deployed.
    fn get_size(
        &self,
        app: &AppName,
    ) -> impl Future<Output = Result<Option<String>, ApiError>> + Send;

    fn set_size(
        &self,
        app: &AppName,
        size: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn set_stack(
        &self,
        app: &AppId,
        stack: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Starts a detached one-off process running `command`.
    fn run_command(
        &self,
        app: &AppId,
        command: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}
