//! gitpoller configuration types and loading
//!
//! Configuration is read from one or more YAML files, merged in order, and
//! turned into an immutable [`Config`] snapshot. The [`ConfigWatcher`] follows
//! filesystem events for those files and signals when their contents change so
//! the service can rebuild itself from a fresh snapshot.

mod error;
mod source;
mod watcher;

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::ConfigError;
pub use source::{ConfigProvider, ConfigSource, StaticConfig};
pub use watcher::ConfigWatcher;

/// Main gitpoller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// HTTP listen port
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,

    /// Polling interval in milliseconds; absent or zero disables polling
    pub poll_interval: Option<u64>,

    /// Default webhook target
    pub webhook: WebhookConfig,

    /// Settings passed through to git
    pub git: GitConfig,

    /// Monitored repositories
    pub repos: Vec<RepoConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            log_level: None,
            poll_interval: None,
            webhook: WebhookConfig::default(),
            git: GitConfig::default(),
            repos: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a single YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Polling interval as a Duration, `None` when polling is disabled
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// Reject configurations the registry cannot represent
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for repo in &self.repos {
            if repo.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("repository with url '{}' has no name", repo.url)));
            }
            if repo.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("repository '{}' has no url", repo.name)));
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate repository name '{}'", repo.name)));
            }
        }
        if self.git.max_concurrent_processes == 0 {
            return Err(ConfigError::Invalid("git.maxConcurrentProcesses must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Webhook target and credential
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Endpoint receiving POSTed changes
    pub url: Option<String>,

    /// Static bearer token
    pub token: Option<String>,

    /// File holding the bearer token; wins over `token`
    pub token_path: Option<PathBuf>,
}

/// Git binary configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitConfig {
    /// Path or name of the git executable
    pub binary: String,

    /// Maximum concurrent git processes
    pub max_concurrent_processes: usize,

    /// Settings passed as `git -c key=value`
    pub config: BTreeMap<String, serde_yaml::Value>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: "git".to_string(),
            max_concurrent_processes: 4,
            config: BTreeMap::new(),
        }
    }
}

impl GitConfig {
    /// Render `config` as `key=value` pairs for `git -c`
    ///
    /// Scalars are rendered as git expects them; nested values are skipped.
    pub fn overrides(&self) -> Vec<String> {
        self.config
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    _ => {
                        tracing::warn!(%key, "Ignoring non-scalar git config value");
                        return None;
                    }
                };
                Some(format!("{}={}", key, rendered))
            })
            .collect()
    }
}

/// One monitored repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    /// Unique repository name
    pub name: String,

    /// Remote URL handed to git
    pub url: String,

    /// Ref name prefixes never reported as changes
    #[serde(default)]
    pub excluded_refs: Vec<String>,

    /// Per-repository webhook overriding the default
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}
