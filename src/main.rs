use std::process::ExitCode;

use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use review_apps::api::ApiError;
use review_apps::config::{BuildBackendSettings, PullRequestAction, Settings};
use review_apps::error::DeployError;
use review_apps::github::{GitHubActionsClient, OctocrabClient, PullRequestCommenter};
use review_apps::jobs::{CircleCiClient, JobBackend};
use review_apps::notify::{
    LogNotifier, Notification, NotifierBackend, announce, report_failure,
};
use review_apps::orchestrator::{OrchestrationError, Orchestrator};
use review_apps::platform::HerokuClient;
use review_apps::push::GitPusher;
use review_apps::steps::StepName;
use review_apps::teardown::{TeardownOutcome, teardown};
use review_apps::types::AppName;

/// Why an invocation failed.
#[derive(Debug, Error)]
enum RunError {
    #[error("could not set up a client: {0}")]
    Setup(#[from] ApiError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "review_apps=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn job_backend(settings: &Settings) -> Result<Option<JobBackend>, RunError> {
    match &settings.build_backend {
        None => Ok(None),
        Some(BuildBackendSettings::CircleCi { token }) => {
            let client = CircleCiClient::new(token.clone(), settings.repo.clone())?;
            Ok(Some(JobBackend::CircleCi(client)))
        }
        Some(BuildBackendSettings::GitHubActions) => {
            let token = settings.github_token.as_ref().ok_or_else(|| {
                DeployError::Validation("a GitHub token is required for GitHub Actions".into())
            })?;
            let client = OctocrabClient::from_token(token, settings.repo.clone())?;
            Ok(Some(JobBackend::GitHubActions(GitHubActionsClient::new(client))))
        }
    }
}

fn notifier(settings: &Settings) -> NotifierBackend {
    let Some(token) = &settings.github_token else {
        return NotifierBackend::Log(LogNotifier);
    };
    match OctocrabClient::from_token(token, settings.repo.clone()) {
        Ok(client) => NotifierBackend::PullRequestComment(PullRequestCommenter::new(client)),
        Err(e) => {
            warn!(error = %e, "falling back to log notifications");
            NotifierBackend::Log(LogNotifier)
        }
    }
}

async fn run(settings: &Settings) -> Result<(), RunError> {
    let upsert = match &settings.action {
        PullRequestAction::Opened | PullRequestAction::Reopened | PullRequestAction::Synchronize => {
            true
        }
        PullRequestAction::Closed => false,
        PullRequestAction::Other(action) => {
            warn!("Nothing to do for pull request action \"{}\".", action);
            return Ok(());
        }
    };

    let notifier = notifier(settings);
    let pr = settings.pr;
    // Until the pipeline's base name is known, failures name the app after the pipeline.
    let provisional = AppName::for_pull_request(&settings.pipeline, pr);

    let platform = report_failure(
        &notifier,
        pr,
        &provisional,
        HerokuClient::new(
            settings.heroku_api_key.clone(),
            settings.heroku_team.clone(),
        ),
    )
    .await?;
    let pusher = GitPusher::new(
        ".",
        settings.heroku_email.clone(),
        settings.heroku_api_key.clone(),
    );

    let message = match &settings.change_message {
        Some(message) => message.clone(),
        None if !upsert => String::new(),
        None => pusher
            .commit_subject(&settings.git_ref)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not read the commit subject");
                String::new()
            }),
    };
    let desired = report_failure(
        &notifier,
        pr,
        &provisional,
        settings.resolve(&platform, message).await,
    )
    .await?;
    let app = &desired.app_name;

    if !upsert {
        let outcome = report_failure(
            &notifier,
            pr,
            app,
            teardown(&platform, &desired, settings.settle_delay).await,
        )
        .await?;
        if let TeardownOutcome::Deleted(_) = outcome {
            announce(&notifier, pr, Notification::TornDown { app: app.clone() }).await;
        }
        return Ok(());
    }

    let jobs = report_failure(&notifier, pr, app, job_backend(settings)).await?;
    info!(
        app = %app,
        deploy = %desired.deploy,
        "Reconciling review app for {}",
        pr
    );
    let orchestrator = Orchestrator::new(
        &desired,
        &platform,
        jobs.as_ref(),
        &pusher,
        settings.polling,
    );
    let report = report_failure(&notifier, pr, app, orchestrator.run().await).await?;

    info!(steps = report.executed.len(), url = ?report.url, "Review app is up to date.");
    let notification = if report.executed.contains(&StepName::CreateApp) {
        Notification::Created {
            app: app.clone(),
            url: report.url,
        }
    } else {
        Notification::Updated {
            app: app.clone(),
            url: report.url,
            sha: desired.source.sha.clone(),
            message: desired.source.message.clone(),
        }
    };
    announce(&notifier, pr, notification).await;
    Ok(())
}
