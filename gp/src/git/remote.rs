//! RemoteRefSource trait and the git command-line implementation

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::debug;

use super::error::GitError;
use crate::config::GitConfig;
use crate::domain::GitRef;

/// Lists every ref of a remote repository
#[async_trait]
pub trait RemoteRefSource: Send + Sync {
    /// Return the remote's refs in listing order
    async fn list_refs(&self, url: &str) -> Result<Vec<GitRef>, GitError>;
}

/// Parse `git ls-remote` output (`<hash>\t<name>` per line)
///
/// Blank and malformed lines are skipped.
pub fn parse_ls_remote(output: &str) -> Vec<GitRef> {
    output
        .lines()
        .filter_map(|line| {
            let (hash, name) = line.split_once('\t')?;
            let (hash, name) = (hash.trim(), name.trim());
            if hash.is_empty() || name.is_empty() {
                return None;
            }
            Some(GitRef::new(name, hash))
        })
        .collect()
}

/// Lists refs by running `git ls-remote --heads --tags`
///
/// Concurrent git processes are capped by a semaphore sized from
/// `git.maxConcurrentProcesses`.
pub struct GitCli {
    binary: String,
    overrides: Vec<String>,
    permits: Arc<Semaphore>,
}

impl GitCli {
    /// Create a client from the `git` config section
    pub fn from_config(config: &GitConfig) -> Self {
        debug!(binary = %config.binary, max = config.max_concurrent_processes, "GitCli::from_config: called");
        Self {
            binary: config.binary.clone(),
            overrides: config.overrides(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_processes.max(1))),
        }
    }

    fn command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        for setting in &self.overrides {
            cmd.arg("-c").arg(setting);
        }
        cmd.arg("ls-remote")
            .arg("--heads")
            .arg("--tags")
            .arg(url)
            // Never block on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteRefSource for GitCli {
    async fn list_refs(&self, url: &str) -> Result<Vec<GitRef>, GitError> {
        let _permit = self.permits.acquire().await.map_err(|_| GitError::PoolClosed)?;
        debug!(%url, "GitCli::list_refs: running ls-remote");

        let output = self.command(url).output().await.map_err(|source| GitError::Spawn {
            binary: self.binary.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::from_stderr(url, output.status.to_string(), &stderr));
        }

        let refs = parse_ls_remote(&String::from_utf8_lossy(&output.stdout));
        debug!(%url, count = refs.len(), "GitCli::list_refs: parsed refs");
        Ok(refs)
    }
}
