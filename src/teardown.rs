//! Deleting a review app when its pull request is closed.

use std::time::Duration;

use tracing::{info, instrument};

use crate::error::DeployError;
use crate::platform::{App, ResourceProvider};
use crate::types::DesiredConfiguration;

/// Default wait after removing a custom domain, so the DNS cleanup the
/// teardown command starts can finish before the app disappears.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    Deleted(App),
    /// There was no app to delete.
    NotFound,
}

/// Deletes the review app for `desired`, removing its custom domain first
/// when its pipeline has one.
///
/// Only names containing `-pr-` are ever deleted.
#[instrument(skip_all, fields(app = %desired.app_name))]
pub async fn teardown<P: ResourceProvider>(
    platform: &P,
    desired: &DesiredConfiguration,
    settle_delay: Duration,
) -> Result<TeardownOutcome, DeployError> {
    let name = &desired.app_name;
    if !name.is_review_app() {
        return Err(DeployError::Validation(format!(
            "refusing to delete \"{}\": only pull request review apps can be deleted",
            name
        )));
    }

    let Some(app) = platform
        .get_app(name)
        .await
        .map_err(DeployError::lookup(format!("app {}", name)))?
    else {
        info!("Nothing to do: there is no app named \"{}\".", name);
        return Ok(TeardownOutcome::NotFound);
    };

    if desired.uses_custom_domain() {
        info!("Removing the custom domain of {}...", name);
        platform
            .run_command(&app.id, &desired.domain.teardown_command)
            .await
            .map_err(DeployError::mutation(format!("remove domain of {}", name)))?;
        info!(
            "Waiting {} seconds for DNS entries to be deleted...",
            settle_delay.as_secs()
        );
        tokio::time::sleep(settle_delay).await;
    }

    info!("Deleting app \"{}\"...", name);
    match platform.delete_app(name).await {
        Ok(()) => {}
        // Deleted by someone else in the meantime.
        Err(e) if e.is_not_found() => return Ok(TeardownOutcome::NotFound),
        Err(e) => return Err(DeployError::mutation(format!("delete app {}", name))(e)),
    }
    info!("Successfully deleted app \"{}\".", name);
    Ok(TeardownOutcome::Deleted(app))
}
