//! Octocrab client scoped to the repository whose pull request is being
//! deployed.

use octocrab::Octocrab;
use secrecy::{ExposeSecret, SecretString};

use crate::api::ApiError;
use crate::types::RepoId;

/// A GitHub API client bound to one repository.
///
/// Both GitHub consumers (the Actions build backend and the PR commenter)
/// only ever touch the repository the pull request belongs to.
#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,
    repo: RepoId,
}

impl OctocrabClient {
    pub fn new(client: Octocrab, repo: RepoId) -> Self {
        Self { client, repo }
    }

    /// Creates a client authenticated with a personal or workflow token.
    pub fn from_token(token: &SecretString, repo: RepoId) -> Result<Self, ApiError> {
        let client = Octocrab::builder()
            .personal_token(token.expose_secret().to_string())
            .build()
            .map_err(ApiError::from_octocrab)?;
        Ok(Self::new(client, repo))
    }

    pub fn inner(&self) -> &Octocrab {
        &self.client
    }

    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    pub fn owner(&self) -> &str {
        &self.repo.owner
    }

    pub fn repo_name(&self) -> &str {
        &self.repo.repo
    }

    /// `/repos/{owner}/{repo}` followed by `suffix`.
    pub fn repo_route(&self, suffix: &str) -> String {
        format!("/repos/{}/{}{}", self.owner(), self.repo_name(), suffix)
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient")
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}
