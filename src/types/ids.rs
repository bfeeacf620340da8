//! Identifier newtypes.
//!
//! The platform addresses apps both by name and by UUID, and pipelines and CI
//! jobs by opaque strings. Keeping each in its own type stops a pipeline id
//! from being passed where an app id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares a transparent string newtype with `new`, `as_str` and `Display`.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                $name(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// The human-readable name of a platform app, e.g. `owl-ears-pr-72`.
    ///
    /// Names key the per-run app cache. The platform accepts a name anywhere
    /// it accepts an [`AppId`].
    AppName
);

string_id!(
    /// The platform's UUID for an app.
    AppId
);

string_id!(
    /// The platform's UUID for a pipeline, the group review apps are coupled to.
    PipelineId
);

string_id!(
    /// A CI job: a CircleCI workflow UUID or a GitHub Actions run number.
    JobId
);

string_id!(
    /// A git commit SHA. Not validated.
    Sha
);

impl AppName {
    /// `<base>-pr-<n>`, the only shape of name this tool creates or deletes.
    pub fn for_pull_request(base_name: &str, pr: PrNumber) -> Self {
        AppName(format!("{}-pr-{}", base_name, pr.0))
    }

    pub fn is_review_app(&self) -> bool {
        self.0.contains("-pr-")
    }
}

impl Sha {
    /// First seven characters, for messages.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        JobId(n.to_string())
    }
}

/// The pull request a run is acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// `owner/repo` on GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepoId {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parses `owner/repo`; both halves must be non-empty and there must be
    /// exactly one slash.
    pub fn parse(s: &str) -> Option<Self> {
        match s.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Some(RepoId::new(owner, repo))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}
