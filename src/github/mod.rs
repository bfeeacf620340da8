//! GitHub integration via octocrab.
//!
//! - [`GitHubActionsClient`]: container builds through a `workflow_dispatch`
//!   of the repository's `Deploy` workflow
//! - [`PullRequestCommenter`]: outcome notifications as PR comments

mod actions;
mod client;
mod comments;

pub use actions::{DEPLOY_WORKFLOW_NAME, GitHubActionsClient};
pub use client::OctocrabClient;
pub use comments::PullRequestCommenter;
