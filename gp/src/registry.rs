//! Repository registry
//!
//! Holds every monitored repository of the current configuration generation.
//! Each repository sits behind its own mutex so the scheduled and on-demand
//! detection paths never interleave their updates to the same record.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::config::RepoConfig;
use crate::domain::{GitRef, Repository};
use crate::git::RemoteRefSource;

/// Shared handle to one monitored repository
#[derive(Clone)]
pub struct RepositoryHandle {
    name: String,
    state: Arc<Mutex<Repository>>,
}

impl RepositoryHandle {
    fn new(repository: Repository) -> Self {
        Self {
            name: repository.name.clone(),
            state: Arc::new(Mutex::new(repository)),
        }
    }

    /// Repository name (immutable for the handle's lifetime)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exclusive access to the repository record
    pub async fn lock(&self) -> MutexGuard<'_, Repository> {
        self.state.lock().await
    }

    /// Point-in-time copy of the repository record
    pub async fn snapshot(&self) -> Repository {
        self.state.lock().await.clone()
    }
}

/// In-memory store of monitored repositories
#[derive(Clone, Default)]
pub struct RepositoryRegistry {
    repos: Vec<RepositoryHandle>,
}

impl RepositoryRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a registry from config, seeding each repository with a full listing
    ///
    /// Repositories are seeded one at a time. Exclusions are not applied to
    /// the initial snapshot. A repository whose listing fails is kept with no
    /// refs and stays eligible for later detection.
    pub async fn seed(configs: &[RepoConfig], source: &dyn RemoteRefSource) -> Self {
        debug!(count = configs.len(), "RepositoryRegistry::seed: called");
        let mut repos = Vec::with_capacity(configs.len());

        for config in configs {
            let mut repository = Repository::new(&config.name, &config.url, config.excluded_refs.clone());
            repository.refs = initial_refs(config, source).await;
            repository.last_updated = chrono::Utc::now();
            repos.push(RepositoryHandle::new(repository));
        }

        info!(count = repos.len(), "Repository registry seeded");
        Self { repos }
    }

    /// Handles for every repository, in configuration order
    pub fn handles(&self) -> &[RepositoryHandle] {
        &self.repos
    }

    /// Handle for a repository by name
    pub fn handle(&self, name: &str) -> Option<&RepositoryHandle> {
        self.repos.iter().find(|r| r.name() == name)
    }

    /// Snapshot of every repository, in configuration order
    pub async fn all(&self) -> Vec<Repository> {
        let mut snapshot = Vec::with_capacity(self.repos.len());
        for handle in &self.repos {
            snapshot.push(handle.snapshot().await);
        }
        snapshot
    }

    /// Snapshot of one repository
    pub async fn find(&self, name: &str) -> Option<Repository> {
        match self.handle(name) {
            Some(handle) => Some(handle.snapshot().await),
            None => None,
        }
    }

    /// Known refs of one repository; empty for unknown names
    pub async fn refs(&self, name: &str) -> Vec<GitRef> {
        self.find(name).await.map(|r| r.refs).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

async fn initial_refs(config: &RepoConfig, source: &dyn RemoteRefSource) -> Vec<GitRef> {
    info!(repo = %config.name, "Loading initial refs");
    match source.list_refs(&config.url).await {
        Ok(refs) => {
            info!(repo = %config.name, count = refs.len(), "Repo refs");
            refs
        }
        Err(e) => {
            error!(repo = %config.name, error = %e, "Error loading initial refs");
            Vec::new()
        }
    }
}
