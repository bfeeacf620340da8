//! Shared test fakes, fixtures, and arbitrary generators for property-based testing.
//!
//! The fakes implement the collaborator traits in memory with per-operation
//! call counters and one-shot failure injection, so tests can assert exactly
//! which remote calls a run made.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use crate::api::ApiError;
use crate::jobs::{BuildRequest, JobOutcome, JobProvider, JobRecord, TriggerReceipt};
use crate::notify::{Notification, Notifier};
use crate::platform::{App, ResourceProvider};
use crate::push::{PushError, SourcePusher};
use crate::types::{
    AppId, AppName, DEFAULT_DYNO_SIZE, DEFAULT_FEATURES, DeployMechanism, DesiredConfiguration,
    DomainSettings, JobId, PipelineId, PrNumber, RepoId, Sha, SourceChange,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

pub const TEST_PIPELINE: &str = "owl-ears";
pub const TEST_DOMAIN_PIPELINE: &str = "readme";

pub fn domain_settings() -> DomainSettings {
    DomainSettings {
        pipelines: vec![TEST_DOMAIN_PIPELINE.to_string()],
        host_suffix: Some("readme.ninja".to_string()),
        setup_command: "node bin/setdomain.js".to_string(),
        teardown_command: "node bin/removedomain.js".to_string(),
    }
}

/// A direct-push configuration for PR 72 of a pipeline without a custom domain.
pub fn desired_config() -> DesiredConfiguration {
    DesiredConfiguration {
        app_name: AppName::for_pull_request(TEST_PIPELINE, PrNumber(72)),
        pipeline_name: TEST_PIPELINE.to_string(),
        pipeline_id: PipelineId::new(format!("pipeline-{}", TEST_PIPELINE)),
        size: DEFAULT_DYNO_SIZE.to_string(),
        stack: "heroku-22".to_string(),
        log_drain_url: Some("syslog+tls://logs.example.com:6514".to_string()),
        config_vars: BTreeMap::from([
            ("API_URL".to_string(), "https://api.example.com".to_string()),
            ("OWL_MODE".to_string(), "nocturnal".to_string()),
        ]),
        features: DEFAULT_FEATURES.iter().map(|f| f.to_string()).collect(),
        deploy: DeployMechanism::DirectPush,
        source: SourceChange {
            repo: RepoId::new("owlbert", "owl-ears"),
            pr: PrNumber(72),
            branch: "feat/droopy-ears".to_string(),
            sha: Sha::new("0000111122223333444455556666777788889999"),
            git_ref: "refs/remotes/pull/72/merge".to_string(),
            message: "Make the ears droop".to_string(),
        },
        node_env: None,
        domain: domain_settings(),
    }
}

/// Like [`desired_config`], but in a pipeline that gets a custom domain.
pub fn domain_config() -> DesiredConfiguration {
    let mut desired = desired_config();
    desired.app_name = AppName::for_pull_request(TEST_DOMAIN_PIPELINE, PrNumber(72));
    desired.pipeline_name = TEST_DOMAIN_PIPELINE.to_string();
    desired.pipeline_id = PipelineId::new(format!("pipeline-{}", TEST_DOMAIN_PIPELINE));
    desired
}

fn injected(op: &str, status: u16) -> ApiError {
    let message = match status {
        409 => format!("injected {} conflict: name is already taken", op),
        _ => format!("injected {} failure", op),
    };
    ApiError::from_status(status, message)
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PlatformState {
    apps: BTreeMap<AppName, App>,
    pipelines: BTreeMap<String, PipelineId>,
    base_names: BTreeMap<PipelineId, String>,
    stage_vars: BTreeMap<PipelineId, BTreeMap<String, String>>,
    couplings: BTreeMap<PipelineId, Vec<AppId>>,
    features: BTreeSet<(AppId, String)>,
    config_vars: BTreeMap<AppId, BTreeMap<String, String>>,
    drains: BTreeMap<AppId, Vec<String>>,
    sizes: BTreeMap<AppName, String>,
    commands: Vec<(AppId, String)>,
    deleted: Vec<AppName>,
    calls: HashMap<&'static str, u32>,
    failures: HashMap<&'static str, u16>,
}

/// In-memory platform.
///
/// Apps created through [`ResourceProvider::create_app`] come up with a
/// `web` formation of the default size, standing in for the deploy that follows
/// in a real run. Apps seeded with [`FakePlatform::add_app`] have no formation
/// until [`FakePlatform::set_app_size`] gives them one.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PlatformState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Counts a call to `op` and fails it if a failure was injected.
    fn begin(&self, op: &'static str) -> Result<(), ApiError> {
        self.with_state(|s| {
            *s.calls.entry(op).or_default() += 1;
            match s.failures.remove(op) {
                Some(status) => Err(injected(op, status)),
                None => Ok(()),
            }
        })
    }

    fn app_record(name: &str) -> App {
        App {
            id: AppId::new(format!("id-{}", name)),
            name: AppName::new(name),
            web_url: Some(format!("https://{}.herokuapp.com/", name)),
            build_stack: Some("heroku-22".to_string()),
        }
    }

    /// Seeds an existing app without counting a call.
    pub fn add_app(&self, name: &str) -> App {
        let app = Self::app_record(name);
        self.with_state(|s| s.apps.insert(app.name.clone(), app.clone()));
        app
    }

    /// Seeds a pipeline with an optional review-app base name and stage vars.
    pub fn add_pipeline(
        &self,
        name: &str,
        base_name: Option<&str>,
        stage_vars: &[(&str, &str)],
    ) -> PipelineId {
        let id = PipelineId::new(format!("pipeline-{}", name));
        self.with_state(|s| {
            s.pipelines.insert(name.to_string(), id.clone());
            if let Some(base) = base_name {
                s.base_names.insert(id.clone(), base.to_string());
            }
            s.stage_vars.insert(
                id.clone(),
                stage_vars
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        });
        id
    }

    pub fn set_app_stack(&self, name: &str, stack: &str) {
        self.with_state(|s| {
            if let Some(app) = s.apps.get_mut(&AppName::new(name)) {
                app.build_stack = Some(stack.to_string());
            }
        });
    }

    pub fn set_app_size(&self, name: &str, size: &str) {
        self.with_state(|s| s.sizes.insert(AppName::new(name), size.to_string()));
    }

    pub fn enable_feature(&self, app: &AppId, feature: &str) {
        self.with_state(|s| s.features.insert((app.clone(), feature.to_string())));
    }

    pub fn set_app_config(&self, app: &AppId, vars: &BTreeMap<String, String>) {
        self.with_state(|s| {
            s.config_vars
                .entry(app.clone())
                .or_default()
                .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())))
        });
    }

    pub fn add_drain(&self, app: &AppId, url: &str) {
        self.with_state(|s| s.drains.entry(app.clone()).or_default().push(url.to_string()));
    }

    pub fn couple(&self, app: &AppId, pipeline: &PipelineId) {
        self.with_state(|s| s.couplings.entry(pipeline.clone()).or_default().push(app.clone()));
    }

    /// Makes the next call to `op` fail with `status`.
    pub fn fail_next(&self, op: &'static str, status: u16) {
        self.with_state(|s| s.failures.insert(op, status));
    }

    pub fn calls(&self, op: &str) -> u32 {
        self.with_state(|s| s.calls.get(op).copied().unwrap_or(0))
    }

    /// Total calls to operations that change remote state.
    pub fn mutations(&self) -> u32 {
        const MUTATIONS: [&str; 9] = [
            "create_app",
            "delete_app",
            "couple_app",
            "set_feature",
            "set_config_vars",
            "add_log_drain",
            "set_size",
            "set_stack",
            "run_command",
        ];
        MUTATIONS.iter().map(|op| self.calls(op)).sum()
    }

    pub fn app(&self, name: &str) -> Option<App> {
        self.with_state(|s| s.apps.get(&AppName::new(name)).cloned())
    }

    pub fn commands(&self) -> Vec<(AppId, String)> {
        self.with_state(|s| s.commands.clone())
    }

    pub fn deleted(&self) -> Vec<AppName> {
        self.with_state(|s| s.deleted.clone())
    }

    fn not_found(what: impl std::fmt::Display) -> ApiError {
        ApiError::not_found(format!("Couldn't find that {}.", what))
    }
}

impl ResourceProvider for FakePlatform {
    async fn get_app(&self, name: &AppName) -> Result<Option<App>, ApiError> {
        self.begin("get_app")?;
        Ok(self.with_state(|s| s.apps.get(name).cloned()))
    }

    async fn create_app(&self, name: &AppName) -> Result<App, ApiError> {
        self.begin("create_app")?;
        self.with_state(|s| {
            if s.apps.contains_key(name) {
                return Err(injected("create_app", 409));
            }
            let app = Self::app_record(name.as_str());
            s.apps.insert(name.clone(), app.clone());
            s.sizes.insert(name.clone(), DEFAULT_DYNO_SIZE.to_string());
            Ok(app)
        })
    }

    async fn delete_app(&self, name: &AppName) -> Result<(), ApiError> {
        self.begin("delete_app")?;
        self.with_state(|s| match s.apps.remove(name) {
            Some(_) => {
                s.deleted.push(name.clone());
                Ok(())
            }
            None => Err(Self::not_found("app")),
        })
    }

    async fn get_pipeline_id(&self, pipeline_name: &str) -> Result<Option<PipelineId>, ApiError> {
        self.begin("get_pipeline_id")?;
        Ok(self.with_state(|s| s.pipelines.get(pipeline_name).cloned()))
    }

    async fn get_review_app_base_name(
        &self,
        pipeline: &PipelineId,
    ) -> Result<Option<String>, ApiError> {
        self.begin("get_review_app_base_name")?;
        Ok(self.with_state(|s| s.base_names.get(pipeline).cloned()))
    }

    async fn get_pipeline_stage_vars(
        &self,
        pipeline: &PipelineId,
    ) -> Result<BTreeMap<String, String>, ApiError> {
        self.begin("get_pipeline_stage_vars")?;
        Ok(self.with_state(|s| s.stage_vars.get(pipeline).cloned().unwrap_or_default()))
    }

    async fn get_pipeline_apps(&self, pipeline: &PipelineId) -> Result<Vec<AppId>, ApiError> {
        self.begin("get_pipeline_apps")?;
        Ok(self.with_state(|s| s.couplings.get(pipeline).cloned().unwrap_or_default()))
    }

    async fn couple_app(&self, app: &AppId, pipeline: &PipelineId) -> Result<(), ApiError> {
        self.begin("couple_app")?;
        self.couple(app, pipeline);
        Ok(())
    }

    async fn get_feature(&self, app: &AppId, feature: &str) -> Result<bool, ApiError> {
        self.begin("get_feature")?;
        Ok(self.with_state(|s| s.features.contains(&(app.clone(), feature.to_string()))))
    }

    async fn set_feature(&self, app: &AppId, feature: &str, enabled: bool) -> Result<(), ApiError> {
        self.begin("set_feature")?;
        self.with_state(|s| {
            let key = (app.clone(), feature.to_string());
            if enabled {
                s.features.insert(key);
            } else {
                s.features.remove(&key);
            }
        });
        Ok(())
    }

    async fn get_config_vars(&self, app: &AppId) -> Result<BTreeMap<String, String>, ApiError> {
        self.begin("get_config_vars")?;
        Ok(self.with_state(|s| s.config_vars.get(app).cloned().unwrap_or_default()))
    }

    async fn set_config_vars(
        &self,
        app: &AppId,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        self.begin("set_config_vars")?;
        self.set_app_config(app, vars);
        Ok(())
    }

    async fn get_log_drains(&self, app: &AppId) -> Result<Vec<String>, ApiError> {
        self.begin("get_log_drains")?;
        Ok(self.with_state(|s| s.drains.get(app).cloned().unwrap_or_default()))
    }

    async fn add_log_drain(&self, app: &AppId, url: &str) -> Result<(), ApiError> {
        self.begin("add_log_drain")?;
        self.add_drain(app, url);
        Ok(())
    }

    async fn get_size(&self, app: &AppName) -> Result<Option<String>, ApiError> {
        self.begin("get_size")?;
        Ok(self.with_state(|s| s.sizes.get(app).cloned()))
    }

    async fn set_size(&self, app: &AppName, size: &str) -> Result<(), ApiError> {
        self.begin("set_size")?;
        self.with_state(|s| {
            if !s.apps.contains_key(app) {
                return Err(Self::not_found("formation"));
            }
            s.sizes.insert(app.clone(), size.to_string());
            Ok(())
        })
    }

    async fn set_stack(&self, app: &AppId, stack: &str) -> Result<(), ApiError> {
        self.begin("set_stack")?;
        self.with_state(|s| {
            let app = s
                .apps
                .values_mut()
                .find(|a| &a.id == app)
                .ok_or_else(|| Self::not_found("app"))?;
            app.build_stack = Some(stack.to_string());
            Ok(())
        })
    }

    async fn run_command(&self, app: &AppId, command: &str) -> Result<(), ApiError> {
        self.begin("run_command")?;
        self.with_state(|s| s.commands.push((app.clone(), command.to_string())));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Build jobs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum JobScript {
    /// The build appears at once and ends with `outcome` after `checks` status reads.
    Finishes { checks: u32, outcome: JobOutcome },
    /// Only a job from before the trigger is ever listed.
    NeverStarts,
}

#[derive(Default)]
struct JobsState {
    triggered: Vec<BuildRequest>,
    triggered_at: Option<DateTime<Utc>>,
    status_checks: u32,
}

/// A CI backend whose build follows a fixed script.
///
/// Every candidate list also contains a finished job created an hour before the
/// trigger, which a correct caller must ignore.
pub struct FakeJobs {
    script: JobScript,
    state: Mutex<JobsState>,
}

pub const FAKE_BUILD_ID: &str = "build-2";
pub const FAKE_STALE_BUILD_ID: &str = "build-1";

impl FakeJobs {
    fn scripted(script: JobScript) -> Self {
        Self {
            script,
            state: Mutex::new(JobsState::default()),
        }
    }

    /// Succeeds on the first status read.
    pub fn new() -> Self {
        Self::succeeding_after(1)
    }

    pub fn succeeding_after(checks: u32) -> Self {
        Self::scripted(JobScript::Finishes {
            checks,
            outcome: JobOutcome::Success,
        })
    }

    pub fn failing_after(checks: u32) -> Self {
        Self::scripted(JobScript::Finishes {
            checks,
            outcome: JobOutcome::Failure,
        })
    }

    pub fn never_starting() -> Self {
        Self::scripted(JobScript::NeverStarts)
    }

    pub fn triggered(&self) -> Vec<BuildRequest> {
        self.state.lock().unwrap().triggered.clone()
    }

    fn record(id: &str, created_at: DateTime<Utc>, status: &str, outcome: JobOutcome) -> JobRecord {
        JobRecord {
            id: JobId::new(id),
            created_at,
            status: status.to_string(),
            terminal: outcome != JobOutcome::Unknown,
            outcome,
            web_url: Some(format!("https://ci.example.com/jobs/{}", id)),
        }
    }
}

impl JobProvider for FakeJobs {
    fn name(&self) -> &'static str {
        "FakeCI"
    }

    async fn trigger(&self, request: &BuildRequest) -> Result<TriggerReceipt, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.triggered.push(request.clone());
        state.triggered_at = Some(Utc::now());
        Ok(TriggerReceipt {
            id: "pipeline-1".to_string(),
            number: Some(state.triggered.len() as u64),
            web_url: None,
        })
    }

    async fn list_candidates(
        &self,
        _receipt: &TriggerReceipt,
        _request: &BuildRequest,
    ) -> Result<Vec<JobRecord>, ApiError> {
        let state = self.state.lock().unwrap();
        let triggered_at = state
            .triggered_at
            .ok_or_else(|| ApiError::permanent("listed before triggering"))?;
        let stale = Self::record(
            FAKE_STALE_BUILD_ID,
            triggered_at - Duration::hours(1),
            "success",
            JobOutcome::Success,
        );
        Ok(match self.script {
            JobScript::NeverStarts => vec![stale],
            JobScript::Finishes { .. } => vec![
                Self::record(FAKE_BUILD_ID, triggered_at, "running", JobOutcome::Unknown),
                stale,
            ],
        })
    }

    async fn get_status(&self, id: &JobId) -> Result<JobRecord, ApiError> {
        let mut state = self.state.lock().unwrap();
        let triggered_at = state
            .triggered_at
            .ok_or_else(|| ApiError::not_found(format!("no job {}", id)))?;
        let JobScript::Finishes { checks, outcome } = self.script else {
            return Err(ApiError::not_found(format!("no job {}", id)));
        };
        if id.as_str() != FAKE_BUILD_ID {
            return Err(ApiError::not_found(format!("no job {}", id)));
        }
        state.status_checks += 1;
        Ok(if state.status_checks >= checks {
            let status = if outcome == JobOutcome::Success { "success" } else { "failed" };
            Self::record(FAKE_BUILD_ID, triggered_at, status, outcome)
        } else {
            Self::record(FAKE_BUILD_ID, triggered_at, "running", JobOutcome::Unknown)
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Git pusher
// ─────────────────────────────────────────────────────────────────────────────

pub struct FakePusher {
    refs_exist: bool,
    failure: Option<String>,
    pushes: Mutex<Vec<(AppName, String)>>,
}

impl FakePusher {
    pub fn new() -> Self {
        Self {
            refs_exist: true,
            failure: None,
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub fn without_refs() -> Self {
        Self {
            refs_exist: false,
            ..Self::new()
        }
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            failure: Some(stderr.to_string()),
            ..Self::new()
        }
    }

    pub fn pushes(&self) -> Vec<(AppName, String)> {
        self.pushes.lock().unwrap().clone()
    }
}

impl SourcePusher for FakePusher {
    async fn ref_exists(&self, _git_ref: &str) -> Result<bool, PushError> {
        Ok(self.refs_exist)
    }

    async fn push(&self, app: &AppName, git_ref: &str) -> Result<(), PushError> {
        if let Some(stderr) = &self.failure {
            return Err(PushError::CommandFailed {
                command: "git push --force *** ".to_string() + git_ref,
                stderr: stderr.clone(),
            });
        }
        self.pushes
            .lock()
            .unwrap()
            .push((app.clone(), git_ref.to_string()));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifier
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(PrNumber, Notification)>>,
}

impl RecordingNotifier {
    /// Records every attempt, then fails it.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(PrNumber, Notification)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, pr: PrNumber, notification: &Notification) -> Result<(), ApiError> {
        self.sent.lock().unwrap().push((pr, notification.clone()));
        if self.fail {
            return Err(ApiError::from_status(502, "bad gateway"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generators
// ─────────────────────────────────────────────────────────────────────────────

pub fn arb_pr_number() -> impl Strategy<Value = PrNumber> {
    (1u64..100_000).prop_map(PrNumber)
}

pub fn arb_pipeline_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,30}".prop_map(String::from)
}

pub fn arb_deploy_mechanism() -> impl Strategy<Value = DeployMechanism> {
    prop_oneof![
        Just(DeployMechanism::DirectPush),
        Just(DeployMechanism::ContainerBuild),
    ]
}
