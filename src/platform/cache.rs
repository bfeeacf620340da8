//! Per-run memoization of app lookups.
//!
//! Several steps independently ask "does the app exist" and "what is its id"
//! while checking prerequisites concurrently. The cache answers those from a
//! single remote read per app, and is discarded when the run ends.
//!
//! Each app name is in exactly one of three states:
//! - never queried (no entry in either map)
//! - known absent (`existence[name] == false`, no detail)
//! - known present (`existence[name] == true`, detail cached)
//!
//! Any write that creates or deletes an app must call [`RemoteStateCache::invalidate`]
//! before the next read. A successful create may additionally [`RemoteStateCache::record`]
//! the returned app so that later steps see it without another read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::trace;

use super::{App, ResourceProvider};
use crate::api::ApiError;
use crate::types::AppName;

pub struct RemoteStateCache<'a, P> {
    provider: &'a P,
    details: Mutex<HashMap<AppName, App>>,
    existence: Mutex<HashMap<AppName, bool>>,
    remote_reads: AtomicU64,
}

impl<'a, P: ResourceProvider> RemoteStateCache<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        RemoteStateCache {
            provider,
            details: Mutex::new(HashMap::new()),
            existence: Mutex::new(HashMap::new()),
            remote_reads: AtomicU64::new(0),
        }
    }

    /// Returns the app's remote representation, reading through on a miss.
    ///
    /// `Ok(None)` means the app does not exist. Errors other than not-found are
    /// returned as-is and leave the cache untouched.
    pub async fn app(&self, name: &AppName) -> Result<Option<App>, ApiError> {
        // Held across the remote read so concurrent callers share one lookup.
        let mut details = self.details.lock().await;
        if let Some(app) = details.get(name) {
            trace!(app = %name, "app cache hit");
            return Ok(Some(app.clone()));
        }

        let mut existence = self.existence.lock().await;
        if existence.get(name) == Some(&false) {
            trace!(app = %name, "app known absent");
            return Ok(None);
        }

        self.remote_reads.fetch_add(1, Ordering::Relaxed);
        let fetched = self.provider.get_app(name).await?;
        match &fetched {
            Some(app) => {
                details.insert(name.clone(), app.clone());
                existence.insert(name.clone(), true);
            }
            None => {
                existence.insert(name.clone(), false);
            }
        }
        Ok(fetched)
    }

    /// Whether the app exists, from the existence memo when possible.
    pub async fn exists(&self, name: &AppName) -> Result<bool, ApiError> {
        let known = self.existence.lock().await.get(name).copied();
        match known {
            Some(exists) => Ok(exists),
            None => Ok(self.app(name).await?.is_some()),
        }
    }

    /// Forgets everything known about `name`.
    pub async fn invalidate(&self, name: &AppName) {
        let mut details = self.details.lock().await;
        let mut existence = self.existence.lock().await;
        details.remove(name);
        existence.remove(name);
        trace!(app = %name, "app cache invalidated");
    }

    /// Stores an app the caller has just observed, e.g. the response to a create.
    pub async fn record(&self, app: App) {
        let mut details = self.details.lock().await;
        let mut existence = self.existence.lock().await;
        existence.insert(app.name.clone(), true);
        details.insert(app.name.clone(), app);
    }

    /// Number of reads that went to the provider.
    pub fn remote_reads(&self) -> u64 {
        self.remote_reads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakePlatform;

    #[tokio::test]
    async fn repeated_lookups_hit_the_remote_once() {
        let platform = FakePlatform::new();
        platform.add_app("owlbert-pr-1");
        let cache = RemoteStateCache::new(&platform);
        let name = AppName::new("owlbert-pr-1");

        assert!(cache.exists(&name).await.unwrap());
        assert!(cache.app(&name).await.unwrap().is_some());
        assert!(cache.exists(&name).await.unwrap());

        assert_eq!(cache.remote_reads(), 1);
        assert_eq!(platform.calls("get_app"), 1);
    }

    #[tokio::test]
    async fn known_absent_is_not_requeried() {
        let platform = FakePlatform::new();
        let cache = RemoteStateCache::new(&platform);
        let name = AppName::new("owlbert-pr-2");

        assert!(!cache.exists(&name).await.unwrap());
        assert!(cache.app(&name).await.unwrap().is_none());
        assert_eq!(platform.calls("get_app"), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_read() {
        let platform = FakePlatform::new();
        let cache = RemoteStateCache::new(&platform);
        let name = AppName::new("owlbert-pr-3");

        assert!(!cache.exists(&name).await.unwrap());
        platform.add_app("owlbert-pr-3");
        assert!(!cache.exists(&name).await.unwrap(), "still memoized");

        cache.invalidate(&name).await;
        assert!(cache.exists(&name).await.unwrap());
        assert_eq!(platform.calls("get_app"), 2);
    }

    #[tokio::test]
    async fn recorded_app_is_served_without_a_read() {
        let platform = FakePlatform::new();
        let cache = RemoteStateCache::new(&platform);
        let name = AppName::new("owlbert-pr-4");

        assert!(!cache.exists(&name).await.unwrap());
        let created = platform.create_app(&name).await.unwrap();
        cache.invalidate(&name).await;
        cache.record(created).await;

        assert!(cache.exists(&name).await.unwrap());
        assert_eq!(platform.calls("get_app"), 1);
    }

    #[tokio::test]
    async fn lookup_errors_are_not_cached() {
        let platform = FakePlatform::new();
        platform.fail_next("get_app", 500);
        let cache = RemoteStateCache::new(&platform);
        let name = AppName::new("owlbert-pr-5");

        assert!(cache.exists(&name).await.is_err());
        assert!(!cache.exists(&name).await.unwrap());
        assert_eq!(platform.calls("get_app"), 2);
    }
}
