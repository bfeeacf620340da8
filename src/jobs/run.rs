//! Trigger a build and wait for it.

use chrono::Utc;
use tracing::{info, instrument};

use super::{
    BuildRequest, JobOutcome, JobProvider, JobRecord, PollError, PollSettings, poll_until,
    select_run,
};
use crate::api::ApiError;
use crate::error::DeployError;

fn poll_failure(waiting_for: &str, what: &str) -> impl FnOnce(PollError<ApiError>) -> DeployError {
    let waiting_for = waiting_for.to_string();
    let what = what.to_string();
    move |err| match err {
        PollError::TimedOut { elapsed, .. } => DeployError::PollTimeout {
            waiting_for,
            elapsed,
        },
        PollError::Check(source) => DeployError::RemoteLookup { what, source },
    }
}

/// Triggers a build and waits for it to finish successfully.
///
/// The disambiguation instant is taken just before the trigger request is
/// sent, so a job created while the request is in flight is still eligible.
/// Returns the finished job record; a job that ends in anything but success is
/// a [`DeployError::DeploymentFailed`].
#[instrument(skip_all, fields(backend = jobs.name(), app = %request.app_name))]
pub async fn run_build<J: JobProvider>(
    jobs: &J,
    request: &BuildRequest,
    polling: &PollSettings,
) -> Result<JobRecord, DeployError> {
    let requested_at = Utc::now();
    let receipt = jobs
        .trigger(request)
        .await
        .map_err(DeployError::mutation(format!("trigger {} build", jobs.name())))?;

    match receipt.number {
        Some(number) => info!("  - Kicked off {} build #{}.", jobs.name(), number),
        None => info!("  - Kicked off {} build.", jobs.name()),
    }

    let started = poll_until(polling.start, || async {
        let candidates = jobs.list_candidates(&receipt, request).await?;
        Ok(select_run(&candidates, requested_at).cloned())
    })
    .await
    .map_err(poll_failure(
        &format!("{} build to start", jobs.name()),
        &format!("{} build list", jobs.name()),
    ))?;

    info!("    Waiting for the build to finish; this may take some time.");
    if let Some(url) = started.web_url.as_ref().or(receipt.web_url.as_ref()) {
        info!("    Watch the build progress here: {}", url);
    }

    let finished = if started.terminal {
        started
    } else {
        poll_until(polling.finish, || async {
            let job = jobs.get_status(&started.id).await?;
            Ok(job.terminal.then_some(job))
        })
        .await
        .map_err(poll_failure(
            &format!("{} build {} to finish", jobs.name(), started.id),
            &format!("{} build status", jobs.name()),
        ))?
    };

    match finished.outcome {
        JobOutcome::Success => {
            info!("    Build and deploy finished successfully!");
            Ok(finished)
        }
        JobOutcome::Failure | JobOutcome::Unknown => Err(DeployError::DeploymentFailed {
            job: format!("{} build {}", jobs.name(), finished.id),
            status: finished.status,
        }),
    }
}
