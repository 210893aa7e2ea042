//! In-memory ref source with scripted listings

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::error::GitError;
use super::remote::RemoteRefSource;
use crate::domain::GitRef;

#[derive(Debug, Clone)]
enum Listing {
    Refs(Vec<GitRef>),
    Unavailable,
    Failure(String),
}

/// Ref source answering from a per-URL script
///
/// URLs that were never scripted behave like an unreachable remote.
#[derive(Debug, Default)]
pub struct InMemoryRefSource {
    remotes: Mutex<HashMap<String, Listing>>,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl InMemoryRefSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the listing for a URL as `(name, hash)` pairs
    pub fn set_refs<'a>(&self, url: &str, refs: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let refs = refs.into_iter().map(|(name, hash)| GitRef::new(name, hash)).collect();
        self.script(url, Listing::Refs(refs));
    }

    /// Make the URL fail as an unreachable remote
    pub fn set_unavailable(&self, url: &str) {
        self.script(url, Listing::Unavailable);
    }

    /// Make the URL fail with a generic command error
    pub fn set_failure(&self, url: &str, stderr: impl Into<String>) {
        self.script(url, Listing::Failure(stderr.into()));
    }

    /// Delay every listing by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Number of listings served so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script(&self, url: &str, listing: Listing) {
        self.remotes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), listing);
    }
}

#[async_trait]
impl RemoteRefSource for InMemoryRefSource {
    async fn list_refs(&self, url: &str) -> Result<Vec<GitRef>, GitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let listing = self
            .remotes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .unwrap_or(Listing::Unavailable);

        match listing {
            Listing::Refs(refs) => Ok(refs),
            Listing::Unavailable => Err(GitError::RemoteUnavailable { url: url.to_string() }),
            Listing::Failure(stderr) => Err(GitError::CommandFailed {
                url: url.to_string(),
                status: "exit status: 128".to_string(),
                stderr,
            }),
        }
    }
}
