//! Config provider backed by layered YAML files

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use super::{Config, ConfigError};

/// Source of configuration snapshots
///
/// `get` answers from the most recently loaded document; `reload` re-reads
/// the backing store and produces a fresh typed snapshot.
pub trait ConfigProvider: Send + Sync {
    /// Look up a dotted key (`webhook.url`) in the last loaded document
    fn get(&self, key: &str) -> Option<Value>;

    /// Re-read the backing store and return a new snapshot
    fn reload(&self) -> Result<Config, ConfigError>;
}

/// Ordered set of YAML files merged into one document
///
/// Later files override earlier ones key by key; sequences and scalars are
/// replaced wholesale.
pub struct ConfigSource {
    paths: Vec<PathBuf>,
    document: RwLock<Value>,
}

impl ConfigSource {
    /// Create a source over explicit paths (all must exist at load time)
    pub fn new(paths: Vec<PathBuf>) -> Self {
        debug!(?paths, "ConfigSource::new: called");
        Self {
            paths,
            document: RwLock::new(Value::Mapping(Mapping::new())),
        }
    }

    /// Resolve config files with fallback chain
    ///
    /// Explicit paths win. Otherwise every existing file among the user
    /// config directory, `./config/default.yml`, `./config/local.yml` and
    /// `./.gitpoller.yml` is merged in that order, so project files override
    /// the user's and `local.yml` overrides `default.yml`. With nothing
    /// found, defaults apply.
    pub fn discover(explicit: &[PathBuf]) -> Self {
        Self::discover_in(explicit, Path::new("."), dirs::config_dir().as_deref())
    }

    fn discover_in(explicit: &[PathBuf], root: &Path, user_config_dir: Option<&Path>) -> Self {
        debug!(?explicit, ?root, "ConfigSource::discover: called");
        if !explicit.is_empty() {
            return Self::new(explicit.to_vec());
        }

        let mut candidates = Vec::new();
        if let Some(config_dir) = user_config_dir {
            candidates.push(config_dir.join("gitpoller").join("gitpoller.yml"));
        }
        candidates.push(root.join("config").join("default.yml"));
        candidates.push(root.join("config").join("local.yml"));
        candidates.push(root.join(".gitpoller.yml"));

        let found: Vec<PathBuf> = candidates.into_iter().filter(|p| p.exists()).collect();
        if found.is_empty() {
            info!("No config file found, using defaults");
        }
        Self::new(found)
    }

    /// Files backing this source, in merge order
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn load_document(&self) -> Result<Value, ConfigError> {
        let mut merged = Value::Mapping(Mapping::new());
        for path in &self.paths {
            let layer = read_yaml(path)?;
            merge(&mut merged, layer);
            info!("Loaded config from: {}", path.display());
        }
        Ok(merged)
    }
}

impl ConfigProvider for ConfigSource {
    fn get(&self, key: &str) -> Option<Value> {
        let document = self.document.read().unwrap_or_else(PoisonError::into_inner);
        lookup(&document, key).cloned()
    }

    fn reload(&self) -> Result<Config, ConfigError> {
        debug!(paths = ?self.paths, "ConfigSource::reload: called");
        let document = self.load_document()?;
        let config: Config = serde_yaml::from_value(document.clone()).map_err(|source| ConfigError::Parse {
            path: self.paths.last().cloned().unwrap_or_default(),
            source,
        })?;
        config.validate()?;

        *self.document.write().unwrap_or_else(PoisonError::into_inner) = document;
        Ok(config)
    }
}

/// In-memory provider holding a replaceable snapshot
///
/// Useful for embedding and tests; `set` stages the next snapshot that
/// `reload` will hand out.
pub struct StaticConfig {
    current: RwLock<Result<Config, String>>,
}

impl StaticConfig {
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Ok(config)),
        }
    }

    /// Replace the snapshot returned by the next `reload`
    pub fn set(&self, config: Config) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Ok(config);
    }

    /// Make the next `reload` fail with this message
    pub fn fail(&self, message: impl Into<String>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Err(message.into());
    }
}

impl ConfigProvider for StaticConfig {
    fn get(&self, key: &str) -> Option<Value> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        let config = current.as_ref().ok()?;
        let document = serde_yaml::to_value(config).ok()?;
        lookup(&document, key).cloned()
    }

    fn reload(&self) -> Result<Config, ConfigError> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        match &*current {
            Ok(config) => {
                config.validate()?;
                Ok(config.clone())
            }
            Err(message) => Err(ConfigError::Invalid(message.clone())),
        }
    }
}

fn read_yaml(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    let value: Value = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Deep-merge `overlay` into `base`
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Resolve a dotted key, preferring literal keys that contain dots
fn lookup<'a>(document: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(value) = document.get(key) {
        return Some(value);
    }
    let (head, rest) = key.split_once('.')?;
    lookup(document.get(head)?, rest)
}
