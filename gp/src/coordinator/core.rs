//! ReloadCoordinator - lifecycle of configuration generations
//!
//! Every entry point (HTTP handlers, the config watcher, shutdown) goes
//! through the coordinator. Reads of the live generation share a read lock;
//! reload and shutdown take the write lock, so nothing observes a
//! half-built generation and no on-demand check overlaps a reload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::error::ReloadError;
use crate::config::{Config, ConfigProvider, GitConfig};
use crate::detector::ChangeDetector;
use crate::domain::{GitRef, Repository, RepositoryChange};
use crate::events::EventBus;
use crate::git::{GitCli, RemoteRefSource};
use crate::registry::RepositoryRegistry;
use crate::scheduler::{PollingScheduler, SchedulerState};
use crate::webhook::WebhookDispatcher;

/// Builds the ref source for a generation from its git settings
pub type SourceFactory = Arc<dyn Fn(&GitConfig) -> Arc<dyn RemoteRefSource> + Send + Sync>;

type ReloadHook = Arc<dyn Fn(&Config) + Send + Sync>;

/// Live component instances between one reload and the next
pub struct Generation {
    pub number: u64,
    pub config: Config,
    pub registry: RepositoryRegistry,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub scheduler: PollingScheduler,
}

/// Owns the current generation and rebuilds it on reload
pub struct ReloadCoordinator {
    bus: Arc<EventBus>,
    provider: Arc<dyn ConfigProvider>,
    source_factory: SourceFactory,
    current: RwLock<Option<Generation>>,
    generations: AtomicU64,
    hooks: Mutex<Vec<ReloadHook>>,
}

impl ReloadCoordinator {
    pub fn new(bus: Arc<EventBus>, provider: Arc<dyn ConfigProvider>, source_factory: SourceFactory) -> Self {
        debug!("ReloadCoordinator::new: called");
        Self {
            bus,
            provider,
            source_factory,
            current: RwLock::new(None),
            generations: AtomicU64::new(0),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Coordinator that lists refs with the git CLI
    pub fn with_git_cli(bus: Arc<EventBus>, provider: Arc<dyn ConfigProvider>) -> Self {
        let factory: SourceFactory = Arc::new(|git: &GitConfig| Arc::new(GitCli::from_config(git)) as Arc<dyn RemoteRefSource>);
        Self::new(bus, provider, factory)
    }

    /// Load the first generation
    pub async fn start(&self) -> Result<Config, ReloadError> {
        debug!("ReloadCoordinator::start: called");
        self.reload().await
    }

    /// Replace the live generation with one built from freshly loaded config
    ///
    /// Steps run strictly in order: stop the scheduler (awaiting any pass in
    /// flight), clear the bus, reload config, attach a new dispatcher, seed a
    /// new registry, start a new scheduler. If config or credentials fail to
    /// load, the previous generation is put back in service and the error is
    /// returned.
    pub async fn reload(&self) -> Result<Config, ReloadError> {
        debug!("ReloadCoordinator::reload: called");
        let mut current = self.current.write().await;

        if let Some(previous) = current.as_ref() {
            info!(generation = previous.number, "Stopping scheduler for reload");
            previous.scheduler.stop().await;
        }
        self.bus.clear_all();

        let config = match self.provider.reload() {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Failed to reload configuration");
                self.restore(current.as_ref());
                return Err(e.into());
            }
        };

        let dispatcher = match WebhookDispatcher::attach(&config, &self.bus) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                error!(error = %e, "Failed to build webhook dispatcher");
                self.bus.clear_all();
                self.restore(current.as_ref());
                return Err(e.into());
            }
        };

        if let Some(previous) = current.as_ref() {
            if previous.config.port != config.port {
                warn!(
                    old = previous.config.port,
                    new = config.port,
                    "Port change requires a restart; keeping the current listener"
                );
            }
        }

        let next = self.build(config, dispatcher).await;
        info!(
            generation = next.number,
            repos = next.registry.len(),
            polling = %next.scheduler.state(),
            "Configuration loaded"
        );
        let config = next.config.clone();
        *current = Some(next);
        drop(current);

        let hooks: Vec<ReloadHook> = self.hooks.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for hook in hooks {
            hook(&config);
        }
        Ok(config)
    }

    async fn build(&self, config: Config, dispatcher: Arc<WebhookDispatcher>) -> Generation {
        debug!(repos = config.repos.len(), "ReloadCoordinator::build: called");
        let source = (self.source_factory)(&config.git);
        let registry = RepositoryRegistry::seed(&config.repos, source.as_ref()).await;
        let detector = Arc::new(ChangeDetector::new(source));
        let scheduler = PollingScheduler::new(registry.clone(), detector, self.bus.clone());
        scheduler.start(config.poll_interval());

        Generation {
            number: self.generations.fetch_add(1, Ordering::SeqCst) + 1,
            config,
            registry,
            dispatcher,
            scheduler,
        }
    }

    /// Put a stopped generation back in service
    fn restore(&self, previous: Option<&Generation>) {
        let Some(previous) = previous else {
            return;
        };
        warn!(generation = previous.number, "Restoring previous configuration");
        previous.dispatcher.subscribe(&self.bus);
        previous.scheduler.start(previous.config.poll_interval());
    }

    /// Register a callback run with the new config after each successful reload
    pub fn on_reload<F>(&self, hook: F)
    where
        F: Fn(&Config) + Send + Sync + 'static,
    {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).push(Arc::new(hook));
    }

    /// Snapshot of every monitored repository
    pub async fn repositories(&self) -> Vec<Repository> {
        let current = self.current.read().await;
        match current.as_ref() {
            Some(generation) => generation.registry.all().await,
            None => Vec::new(),
        }
    }

    /// Known refs of one repository; empty for unknown names
    pub async fn repository_refs(&self, name: &str) -> Vec<GitRef> {
        let current = self.current.read().await;
        match current.as_ref() {
            Some(generation) => generation.registry.refs(name).await,
            None => Vec::new(),
        }
    }

    /// On-demand detection pass
    ///
    /// With `trigger_webhook` set, each repository change is dispatched on
    /// the bus exactly as a scheduled tick would.
    pub async fn check_for_changes(&self, trigger_webhook: bool) -> Vec<RepositoryChange> {
        debug!(trigger_webhook, "ReloadCoordinator::check_for_changes: called");
        let current = self.current.read().await;
        let Some(generation) = current.as_ref() else {
            return Vec::new();
        };

        let changes = generation.scheduler.check_now().await;
        if trigger_webhook && !changes.is_empty() {
            info!(count = changes.len(), "Dispatching on-demand changes");
            generation.scheduler.publish(&changes);
        }
        changes
    }

    /// Stop polling and drop the live generation
    pub async fn shutdown(&self) {
        debug!("ReloadCoordinator::shutdown: called");
        let mut current = self.current.write().await;
        if let Some(generation) = current.take() {
            generation.scheduler.stop().await;
        }
        self.bus.clear_all();
        info!("Coordinator shut down");
    }

    /// Number of the live generation; 0 before the first load
    pub async fn generation(&self) -> u64 {
        self.current.read().await.as_ref().map_or(0, |g| g.number)
    }

    /// Config of the live generation
    pub async fn config(&self) -> Option<Config> {
        self.current.read().await.as_ref().map(|g| g.config.clone())
    }

    pub async fn scheduler_state(&self) -> SchedulerState {
        match self.current.read().await.as_ref() {
            Some(generation) => generation.scheduler.state(),
            None => SchedulerState::Stopped,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}
