//! Direct source deploys: pushing a git ref to the platform's git endpoint.
//!
//! Commands run with the system and user git config disabled and terminal
//! prompts off, so a missing credential fails instead of hanging.

use std::future::Future;
use std::path::{Path, PathBuf};

use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::types::AppName;

pub const HEROKU_GIT_URL: &str = "https://git.heroku.com";

/// The branch the platform builds from.
const DEPLOY_REFSPEC_TARGET: &str = "refs/heads/master";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("invalid git remote for {app}: {details}")]
    InvalidRemote { app: AppName, details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pushes source to an app's git remote.
pub trait SourcePusher: Sync {
    /// Whether `git_ref` resolves in the local repository.
    fn ref_exists(&self, git_ref: &str) -> impl Future<Output = Result<bool, PushError>> + Send;

    /// Force-pushes `git_ref` to the app's deploy branch.
    fn push(
        &self,
        app: &AppName,
        git_ref: &str,
    ) -> impl Future<Output = Result<(), PushError>> + Send;
}

/// Runs the system `git` in a local checkout.
#[derive(Clone)]
pub struct GitPusher {
    workdir: PathBuf,
    git_url: String,
    email: String,
    api_key: SecretString,
}

impl GitPusher {
    pub fn new(workdir: impl Into<PathBuf>, email: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            workdir: workdir.into(),
            git_url: HEROKU_GIT_URL.to_string(),
            email: email.into(),
            api_key,
        }
    }

    pub fn with_git_url(mut self, git_url: impl Into<String>) -> Self {
        self.git_url = git_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Authenticated remote URL for `app`.
    fn remote_url(&self, app: &AppName) -> Result<Url, PushError> {
        let invalid = |details: String| PushError::InvalidRemote {
            app: app.clone(),
            details,
        };
        let mut url = Url::parse(&format!("{}/{}.git", self.git_url, app))
            .map_err(|e| invalid(e.to_string()))?;
        url.set_username(&self.email)
            .map_err(|()| invalid("URL cannot carry a username".to_string()))?;
        url.set_password(Some(self.api_key.expose_secret()))
            .map_err(|()| invalid("URL cannot carry a password".to_string()))?;
        Ok(url)
    }

    /// Subject line of the commit `rev` points at.
    pub async fn commit_subject(&self, rev: &str) -> Result<String, PushError> {
        let output = run_git(&self.workdir, &["log", "-1", "--format=%s", rev], None).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl std::fmt::Debug for GitPusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitPusher")
            .field("workdir", &self.workdir)
            .field("git_url", &self.git_url)
            .finish_non_exhaustive()
    }
}

fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.kill_on_drop(true);
    cmd
}

/// Runs git, failing on a non-zero exit. `secret` is scrubbed from the
/// reported command line and stderr.
async fn run_git(
    workdir: &Path,
    args: &[&str],
    secret: Option<&str>,
) -> Result<std::process::Output, PushError> {
    let output = git_command(workdir).args(args).output().await?;
    if output.status.success() {
        return Ok(output);
    }
    let redact = |s: String| match secret {
        Some(secret) if !secret.is_empty() => s.replace(secret, "***"),
        _ => s,
    };
    Err(PushError::CommandFailed {
        command: redact(format!("git {}", args.join(" "))),
        stderr: redact(String::from_utf8_lossy(&output.stderr).trim().to_string()),
    })
}

impl SourcePusher for GitPusher {
    async fn ref_exists(&self, git_ref: &str) -> Result<bool, PushError> {
        let output = git_command(&self.workdir)
            .args(["rev-parse", "--verify", "--quiet", git_ref])
            .output()
            .await?;
        Ok(output.status.success())
    }

    #[instrument(skip(self), fields(app = %app))]
    async fn push(&self, app: &AppName, git_ref: &str) -> Result<(), PushError> {
        let url = self.remote_url(app)?;
        let refspec = format!("{}:{}", git_ref, DEPLOY_REFSPEC_TARGET);
        debug!(%refspec, "pushing to platform git remote");
        run_git(
            &self.workdir,
            &["push", "--force", url.as_str(), &refspec],
            Some(self.api_key.expose_secret()),
        )
        .await?;
        Ok(())
    }
}
