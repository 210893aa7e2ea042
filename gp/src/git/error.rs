//! Git error types

use thiserror::Error;

/// Marker git prints when a remote is unreachable or access is denied
pub(crate) const UNREADABLE_REMOTE: &str = "Could not read from remote repository";

/// Errors that can occur while listing remote refs
#[derive(Debug, Error)]
pub enum GitError {
    #[error(
        "Could not read from remote repository {url}. Please make sure you have the correct access rights and the repository exists"
    )]
    RemoteUnavailable { url: String },

    #[error("git ls-remote {url} failed ({status}): {stderr}")]
    CommandFailed { url: String, status: String, stderr: String },

    #[error("Failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git process pool closed")]
    PoolClosed,
}

impl GitError {
    /// Check if the remote could not be reached or read
    pub fn is_remote_unavailable(&self) -> bool {
        matches!(self, GitError::RemoteUnavailable { .. })
    }

    /// Classify a failed ls-remote by its stderr
    pub(crate) fn from_stderr(url: &str, status: String, stderr: &str) -> Self {
        if stderr.contains(UNREADABLE_REMOTE) {
            GitError::RemoteUnavailable { url: url.to_string() }
        } else {
            GitError::CommandFailed {
                url: url.to_string(),
                status,
                stderr: stderr.trim().to_string(),
            }
        }
    }
}
