//! Change detection
//!
//! A ref is new when no ref already known for the repository carries its
//! hash, whatever its name. This means a branch that moves back to a commit
//! seen earlier (under any name) is not reported again.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::domain::{GitRef, Repository, RepositoryChange};
use crate::git::{GitError, RemoteRefSource};
use crate::registry::{RepositoryHandle, RepositoryRegistry};

/// Computes newly observed refs for repositories
pub struct ChangeDetector {
    source: Arc<dyn RemoteRefSource>,
}

impl ChangeDetector {
    pub fn new(source: Arc<dyn RemoteRefSource>) -> Self {
        Self { source }
    }

    /// Detect and record new refs for one repository
    ///
    /// The remote listing is fetched without holding the repository lock;
    /// the diff and append then run under it, so concurrent detections of
    /// the same repository report each new ref exactly once. Fetch failures
    /// are logged and count as no changes.
    pub async fn detect(&self, handle: &RepositoryHandle) -> Vec<GitRef> {
        let url = handle.lock().await.url.clone();
        info!(repo = %handle.name(), "Checking for updates");

        let listing = match self.source.list_refs(&url).await {
            Ok(listing) => listing,
            Err(e) => {
                log_fetch_error(handle.name(), &e);
                return Vec::new();
            }
        };

        let mut repository = handle.lock().await;
        let fresh = novel_refs(&repository, listing);
        if !fresh.is_empty() {
            info!(repo = %handle.name(), count = fresh.len(), "New refs detected");
            repository.record(&fresh);
        }
        fresh
    }

    /// Run one detection pass over every repository
    ///
    /// Repositories are checked sequentially; one failing repository never
    /// blocks the others.
    pub async fn check_all(&self, registry: &RepositoryRegistry) -> Vec<RepositoryChange> {
        debug!(count = registry.len(), "ChangeDetector::check_all: called");
        let mut changes = Vec::new();

        for handle in registry.handles() {
            let fresh = self.detect(handle).await;
            if fresh.is_empty() {
                continue;
            }
            let url = handle.lock().await.url.clone();
            changes.push(RepositoryChange {
                name: handle.name().to_string(),
                url,
                changes: fresh,
            });
        }

        debug!(changed = changes.len(), "ChangeDetector::check_all: done");
        changes
    }
}

/// Filter a remote listing down to refs worth reporting
///
/// Excluded prefixes are dropped first; the rest are kept when their hash is
/// unknown to the repository. Refs sharing a new hash within one listing are
/// all reported.
pub fn novel_refs(repository: &Repository, listing: Vec<GitRef>) -> Vec<GitRef> {
    let known: HashSet<&str> = repository.refs.iter().map(|r| r.hash.as_str()).collect();

    listing
        .into_iter()
        .filter(|r| {
            if repository.is_excluded(&r.name) {
                debug!(repo = %repository.name, ref_name = %r.name, "Excluded ref");
                return false;
            }
            !known.contains(r.hash.as_str())
        })
        .collect()
}

fn log_fetch_error(repo: &str, err: &GitError) {
    if err.is_remote_unavailable() {
        error!(
            %repo,
            error = "Could not read from remote repository. Please make sure you have the correct access rights and the repository exists",
            "Error checking for updates"
        );
    } else {
        error!(%repo, error = %err, "Error checking for updates");
    }
}
