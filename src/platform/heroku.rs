//! Heroku Platform API client.
//!
//! Idempotent requests (GET, PATCH, DELETE) are retried with backoff on
//! transient errors. POSTs are sent once: a retried create or one-off dyno
//! could double-apply.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::json;
use tracing::{debug, trace};

use super::{App, ResourceProvider};
use crate::api::{ApiError, RetryConfig, RetryPolicy, found, retry_with_backoff};
use crate::types::{AppId, AppName, PipelineId};

pub const HEROKU_API_URL: &str = "https://api.heroku.com";

const HEROKU_ACCEPT: &str = "application/vnd.heroku+json; version=3";

/// Region new review apps are created in.
const DEFAULT_REGION: &str = "us";

/// Stage review apps are coupled to. Apps in the `review` stage do not show up
/// on the dashboard unless the pipeline is connected to GitHub.
const COUPLING_STAGE: &str = "development";

#[derive(Debug, Deserialize)]
struct AppPayload {
    id: String,
    name: String,
    web_url: Option<String>,
    build_stack: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

impl From<AppPayload> for App {
    fn from(payload: AppPayload) -> Self {
        App {
            id: AppId(payload.id),
            name: AppName(payload.name),
            web_url: payload.web_url,
            build_stack: payload.build_stack.map(|s| s.name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CouplingPayload {
    app: IdPayload,
}

#[derive(Debug, Deserialize)]
struct ReviewAppConfigPayload {
    base_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeaturePayload {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct DrainPayload {
    url: String,
}

#[derive(Debug, Deserialize)]
struct FormationPayload {
    size: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

/// A Heroku Platform API client authenticated with an API key.
#[derive(Clone)]
pub struct HerokuClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    /// Team that owns new apps. Personal account when absent.
    team: Option<String>,
    retry: RetryConfig,
}

impl HerokuClient {
    pub fn new(api_key: SecretString, team: Option<String>) -> Result<Self, ApiError> {
        Self::with_base_url(HEROKU_API_URL, api_key, team)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: SecretString,
        team: Option<String>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("review-apps/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::from_reqwest)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            team,
            retry: RetryConfig::DEFAULT,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        retry_with_backoff(self.retry, RetryPolicy::for_method(&method), || {
            self.send_once(method.clone(), path, body.as_ref())
        })
        .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        trace!(%method, path, "heroku request");
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header(ACCEPT, HEROKU_ACCEPT)
            .bearer_auth(self.api_key.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(
                status.as_u16(),
                error_message(&text, path),
            ));
        }
        response.json::<T>().await.map_err(ApiError::from_reqwest)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None).await
    }
}

impl std::fmt::Debug for HerokuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HerokuClient")
            .field("base_url", &self.base_url)
            .field("team", &self.team)
            .finish_non_exhaustive()
    }
}

/// Pulls the `message` out of a Heroku error body, falling back to the raw text.
fn error_message(body: &str, path: &str) -> String {
    match serde_json::from_str::<ErrorPayload>(body) {
        Ok(payload) => payload.message,
        Err(_) if body.trim().is_empty() => format!("request to {} failed", path),
        Err(_) => body.trim().to_string(),
    }
}

impl ResourceProvider for HerokuClient {
    async fn get_app(&self, name: &AppName) -> Result<Option<App>, ApiError> {
        let payload = found(self.get::<AppPayload>(&format!("/apps/{}", name)).await)?;
        Ok(payload.map(App::from))
    }

    async fn create_app(&self, name: &AppName) -> Result<App, ApiError> {
        debug!(app = %name, team = ?self.team, "creating app");
        let payload: AppPayload = match &self.team {
            Some(team) => {
                let body = json!({ "name": name, "region": DEFAULT_REGION, "team": team });
                self.request(Method::POST, "/teams/apps", Some(body)).await?
            }
            None => {
                let body = json!({ "name": name, "region": DEFAULT_REGION });
                self.request(Method::POST, "/apps", Some(body)).await?
            }
        };
        Ok(payload.into())
    }

    async fn delete_app(&self, name: &AppName) -> Result<(), ApiError> {
        let _: IgnoredAny = self
            .request(Method::DELETE, &format!("/apps/{}", name), None)
            .await?;
        Ok(())
    }

    async fn get_pipeline_id(&self, pipeline_name: &str) -> Result<Option<PipelineId>, ApiError> {
        let payload = found(
            self.get::<IdPayload>(&format!("/pipelines/{}", pipeline_name))
                .await,
        )?;
        Ok(payload.map(|p| PipelineId(p.id)))
    }

    async fn get_review_app_base_name(
        &self,
        pipeline: &PipelineId,
    ) -> Result<Option<String>, ApiError> {
        let payload = found(
            self.get::<ReviewAppConfigPayload>(&format!("/pipelines/{}/review-app-config", pipeline))
                .await,
        )?;
        Ok(payload.and_then(|p| p.base_name))
    }

    async fn get_pipeline_stage_vars(
        &self,
        pipeline: &PipelineId,
    ) -> Result<BTreeMap<String, String>, ApiError> {
        let vars: BTreeMap<String, Option<String>> = self
            .get(&format!("/pipelines/{}/stage/review/config-vars", pipeline))
            .await?;
        Ok(vars
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    async fn get_pipeline_apps(&self, pipeline: &PipelineId) -> Result<Vec<AppId>, ApiError> {
        let couplings: Vec<CouplingPayload> = self
            .get(&format!("/pipelines/{}/pipeline-couplings", pipeline))
            .await?;
        Ok(couplings.into_iter().map(|c| AppId(c.app.id)).collect())
    }

    async fn couple_app(&self, app: &AppId, pipeline: &PipelineId) -> Result<(), ApiError> {
        let body = json!({ "app": app, "pipeline": pipeline, "stage": COUPLING_STAGE });
        let _: IgnoredAny = self
            .request(Method::POST, "/pipeline-couplings", Some(body))
            .await?;
        Ok(())
    }

    async fn get_feature(&self, app: &AppId, feature: &str) -> Result<bool, ApiError> {
        let payload: FeaturePayload = self
            .get(&format!("/apps/{}/features/{}", app, feature))
            .await?;
        Ok(payload.enabled)
    }

    async fn set_feature(&self, app: &AppId, feature: &str, enabled: bool) -> Result<(), ApiError> {
        let _: IgnoredAny = self
            .request(
                Method::PATCH,
                &format!("/apps/{}/features/{}", app, feature),
                Some(json!({ "enabled": enabled })),
            )
            .await?;
        Ok(())
    }

    async fn get_config_vars(&self, app: &AppId) -> Result<BTreeMap<String, String>, ApiError> {
        let vars: BTreeMap<String, Option<String>> =
            self.get(&format!("/apps/{}/config-vars", app)).await?;
        Ok(vars
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    async fn set_config_vars(
        &self,
        app: &AppId,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let body = serde_json::to_value(vars)
            .map_err(|e| ApiError::permanent(format!("cannot encode config vars: {}", e)))?;
        let _: IgnoredAny = self
            .request(Method::PATCH, &format!("/apps/{}/config-vars", app), Some(body))
            .await?;
        Ok(())
    }

    async fn get_log_drains(&self, app: &AppId) -> Result<Vec<String>, ApiError> {
        let drains: Vec<DrainPayload> = self.get(&format!("/apps/{}/log-drains", app)).await?;
        Ok(drains.into_iter().map(|d| d.url).collect())
    }

    async fn add_log_drain(&self, app: &AppId, url: &str) -> Result<(), ApiError> {
        let _: IgnoredAny = self
            .request(
                Method::POST,
                &format!("/apps/{}/log-drains", app),
                Some(json!({ "url": url })),
            )
            .await?;
        Ok(())
    }

    async fn get_size(&self, app: &AppName) -> Result<Option<String>, ApiError> {
        let payload = found(
            self.get::<FormationPayload>(&format!("/apps/{}/formation/web", app))
                .await,
        )?;
        Ok(payload.map(|p| p.size))
    }

    async fn set_size(&self, app: &AppName, size: &str) -> Result<(), ApiError> {
        let _: IgnoredAny = self
            .request(
                Method::PATCH,
                &format!("/apps/{}/formation/web", app),
                Some(json!({ "size": size })),
            )
            .await?;
        Ok(())
    }

    async fn set_stack(&self, app: &AppId, stack: &str) -> Result<(), ApiError> {
        let _: IgnoredAny = self
            .request(
                Method::PATCH,
                &format!("/apps/{}", app),
                Some(json!({ "build_stack": stack })),
            )
            .await?;
        Ok(())
    }

    async fn run_command(&self, app: &AppId, command: &str) -> Result<(), ApiError> {
        let _: IgnoredAny = self
            .request(
                Method::POST,
                &format!("/apps/{}/dynos", app),
                Some(json!({ "command": command, "attach": false })),
            )
            .await?;
        Ok(())
    }
}
