//! Outcome notifications.
//!
//! The orchestrator never notifies from inside a step. `main` reports the end of
//! an upsert or a teardown, and a failed notification is logged rather than
//! turning a successful deploy into a failed one.

use std::fmt;
use std::future::Future;

use tracing::{info, warn};

use crate::api::ApiError;
use crate::github::PullRequestCommenter;
use crate::types::{AppName, PrNumber, Sha};

/// What happened to a pull request's review app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The app did not exist before this run.
    Created {
        app: AppName,
        url: Option<String>,
    },
    /// An existing app was redeployed at `sha`.
    Updated {
        app: AppName,
        url: Option<String>,
        sha: Sha,
        message: String,
    },
    Failed {
        app: AppName,
        error: String,
    },
    TornDown {
        app: AppName,
    },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Created { app, url } => {
                write!(f, "Review app {} created", app)?;
                match url {
                    Some(url) => write!(f, ": {}", url),
                    None => write!(f, "."),
                }
            }
            Notification::Updated {
                app,
                url,
                sha,
                message,
            } => {
                write!(f, "Review app {} updated to {} ({})", app, sha.short(), message)?;
                match url {
                    Some(url) => write!(f, ": {}", url),
                    None => write!(f, "."),
                }
            }
            Notification::Failed { app, error } => {
                write!(f, "Review app {} failed to deploy: {}", app, error)
            }
            Notification::TornDown { app } => write!(f, "Review app {} deleted.", app),
        }
    }
}

/// A sink for outcome messages about one pull request.
pub trait Notifier: Sync {
    fn notify(
        &self,
        pr: PrNumber,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, pr: PrNumber, notification: &Notification) -> Result<(), ApiError> {
        info!(%pr, "{}", notification);
        Ok(())
    }
}

/// The notifier selected for this invocation.
#[derive(Debug, Clone)]
pub enum NotifierBackend {
    Log(LogNotifier),
    PullRequestComment(PullRequestCommenter),
}

impl Notifier for NotifierBackend {
    async fn notify(&self, pr: PrNumber, notification: &Notification) -> Result<(), ApiError> {
        match self {
            NotifierBackend::Log(n) => n.notify(pr, notification).await,
            NotifierBackend::PullRequestComment(n) => n.notify(pr, notification).await,
        }
    }
}

/// Sends `notification`, logging instead of propagating any failure.
pub async fn announce<N: Notifier>(notifier: &N, pr: PrNumber, notification: Notification) {
    if let Err(e) = notifier.notify(pr, &notification).await {
        warn!(%pr, error = %e, "failed to send notification");
    }
}

/// Passes `result` through, first announcing [`Notification::Failed`] for
/// `app` if it is an error.
pub async fn report_failure<N: Notifier, T, E: fmt::Display>(
    notifier: &N,
    pr: PrNumber,
    app: &AppName,
    result: Result<T, E>,
) -> Result<T, E> {
    if let Err(e) = &result {
        announce(
            notifier,
            pr,
            Notification::Failed {
                app: app.clone(),
                error: e.to_string(),
            },
        )
        .await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingNotifier;

    #[test]
    fn created_message_includes_the_url() {
        let n = Notification::Created {
            app: AppName::new("owl-ears-pr-72"),
            url: Some("https://owl-ears-pr-72.herokuapp.com/".to_string()),
        };
        assert_eq!(
            n.to_string(),
            "Review app owl-ears-pr-72 created: https://owl-ears-pr-72.herokuapp.com/"
        );
    }

    #[test]
    fn updated_message_names_the_commit() {
        let n = Notification::Updated {
            app: AppName::new("owl-ears-pr-72"),
            url: None,
            sha: Sha::new("0000111122223333444455556666777788889999"),
            message: "Make the ears droop".to_string(),
        };
        assert_eq!(
            n.to_string(),
            "Review app owl-ears-pr-72 updated to 0000111 (Make the ears droop)."
        );
    }

    #[test]
    fn failed_message_carries_the_error() {
        let n = Notification::Failed {
            app: AppName::new("owl-ears-pr-72"),
            error: "[Step 3/7] Enabling features failed: HTTP 500".to_string(),
        };
        assert!(n.to_string().contains("[Step 3/7]"));
    }

    #[tokio::test]
    async fn announce_swallows_notifier_errors() {
        let notifier = RecordingNotifier::failing();
        announce(
            &notifier,
            PrNumber(72),
            Notification::TornDown {
                app: AppName::new("owl-ears-pr-72"),
            },
        )
        .await;
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn failures_are_reported_and_passed_through() {
        let notifier = RecordingNotifier::default();
        let app = AppName::new("owl-ears-pr-72");

        let missing = "the pipeline \"owl-ears\" does not exist";

        let result: Result<(), &str> =
            report_failure(&notifier, PrNumber(72), &app, Err(missing)).await;

        assert_eq!(result, Err(missing));
        assert_eq!(
            notifier.sent(),
            vec![(
                PrNumber(72),
                Notification::Failed {
                    app,
                    error: missing.to_string(),
                }
            )]
        );
    }

    #[tokio::test]
    async fn successes_are_not_announced() {
        let notifier = RecordingNotifier::default();
        let result: Result<u8, &str> =
            report_failure(&notifier, PrNumber(72), &AppName::new("owl-ears-pr-72"), Ok(7)).await;
        assert_eq!(result, Ok(7));
        assert!(notifier.sent().is_empty());
    }
}
