//! Pull request comments as a [`Notifier`].

use tracing::debug;

use super::OctocrabClient;
use crate::api::ApiError;
use crate::notify::{Notification, Notifier};
use crate::types::PrNumber;

/// Posts each notification as a new plain-text comment on the pull request.
#[derive(Debug, Clone)]
pub struct PullRequestCommenter {
    client: OctocrabClient,
}

impl PullRequestCommenter {
    pub fn new(client: OctocrabClient) -> Self {
        Self { client }
    }
}

impl Notifier for PullRequestCommenter {
    async fn notify(&self, pr: PrNumber, notification: &Notification) -> Result<(), ApiError> {
        let comment = self
            .client
            .inner()
            .issues(self.client.owner(), self.client.repo_name())
            .create_comment(pr.0, notification.to_string())
            .await
            .map_err(ApiError::from_octocrab)?;
        debug!(%pr, comment_id = comment.id.into_inner(), "posted comment");
        Ok(())
    }
}
