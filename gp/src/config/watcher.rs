//! Config file watcher
//!
//! Subscribes to filesystem events for the directories holding the config
//! files and signals when a file's contents change. Size and contents are
//! cached per path so editors that rewrite a file without changing it (temp
//! file + rename) do not trigger a reload. Watching the directory rather
//! than the file keeps working across renames and symlink swaps.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Result, eyre};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ConfigError;

/// Quiet period used to coalesce a burst of events into one rescan
const DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSnapshot {
    size: u64,
    contents: String,
}

/// Watches config files and sends the changed paths on each detected change
pub struct ConfigWatcher {
    paths: Vec<PathBuf>,
    cache: HashMap<PathBuf, FileSnapshot>,
    tx: mpsc::Sender<Vec<PathBuf>>,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    // Dropping the watcher stops event delivery
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `paths` and cache their current contents
    ///
    /// Changes made after this returns are reported; the initial contents
    /// never are. A file that does not exist yet is picked up once created,
    /// but its directory must exist.
    pub async fn new(paths: Vec<PathBuf>, tx: mpsc::Sender<Vec<PathBuf>>) -> Result<Self, ConfigError> {
        debug!(?paths, "ConfigWatcher::new: called");
        let (event_tx, events) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.send(res);
            },
            notify::Config::default(),
        )?;

        let mut dirs = HashSet::new();
        for path in &paths {
            let dir = parent_dir(path);
            if dirs.insert(dir.clone()) {
                watcher
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(|source| ConfigError::Watch { path: dir.clone(), source })?;
            }
        }

        let mut this = Self {
            paths,
            cache: HashMap::new(),
            tx,
            events,
            _watcher: watcher,
        };
        // First observation only fills the cache
        this.scan().await;
        Ok(this)
    }

    async fn snapshot(path: &Path) -> std::io::Result<FileSnapshot> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(FileSnapshot {
            size: contents.len() as u64,
            contents,
        })
    }

    /// Re-read every path and return the ones whose contents changed
    async fn scan(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();

        for path in &self.paths {
            let snapshot = match Self::snapshot(path).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(?path, error = %e, "Unable to read config file");
                    continue;
                }
            };

            match self.cache.get(path) {
                None => {
                    info!(?path, size = snapshot.size, "Config file added to cache");
                    self.cache.insert(path.clone(), snapshot);
                }
                Some(prev) if prev.size == snapshot.size && prev.contents == snapshot.contents => {
                    debug!(?path, "Config file rewritten without changes");
                }
                Some(_) => {
                    info!(?path, size = snapshot.size, "Config file updated in cache");
                    self.cache.insert(path.clone(), snapshot);
                    changed.push(path.clone());
                }
            }
        }

        changed
    }

    /// Rescan now, sending a notification if anything changed
    pub async fn check_once(&mut self) -> Result<Vec<PathBuf>> {
        let changed = self.scan().await;
        if !changed.is_empty() {
            info!(paths = ?changed, "Config file changed");
            self.tx
                .send(changed.clone())
                .await
                .map_err(|_| eyre!("Config change channel closed"))?;
        }
        Ok(changed)
    }

    /// Run the watcher loop
    ///
    /// This runs until the receiving side of the channel is dropped.
    pub async fn run(mut self) -> Result<()> {
        info!(paths = ?self.paths, "Watching config files");

        loop {
            tokio::select! {
                _ = self.tx.closed() => {
                    debug!("ConfigWatcher::run: receiver dropped, stopping");
                    return Ok(());
                }
                event = self.events.recv() => match event {
                    None => return Err(eyre!("File watcher stopped delivering events")),
                    Some(Err(e)) => {
                        warn!(error = %e, "File watch error");
                        continue;
                    }
                    Some(Ok(event)) if !is_relevant(&event.kind) => continue,
                    Some(Ok(event)) => debug!(kind = ?event.kind, paths = ?event.paths, "ConfigWatcher::run: event"),
                },
            }

            tokio::time::sleep(DEBOUNCE).await;
            while self.events.try_recv().is_ok() {}

            if let Err(e) = self.check_once().await {
                debug!(error = %e, "ConfigWatcher::run: stopping");
                return Ok(());
            }
        }
    }
}

/// Directory to watch for a config path
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Reads (including our own rescans) are not changes
fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}
