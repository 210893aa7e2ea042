//! gitpoller - change detection for remote git repositories
//!
//! Polls remote repositories for their ref listings, works out which refs are
//! new since the last look, and announces them to webhook endpoints.
//!
//! # Core Concepts
//!
//! - **Hash-based novelty**: a ref is new when its commit hash has never been
//!   seen for the repository, whatever its name
//! - **Cumulative history**: known refs only grow until the next reload
//! - **Decoupled delivery**: detection publishes on an event bus; the webhook
//!   dispatcher subscribes and delivers in the background
//! - **Generations**: a reload stops polling, clears the bus and rebuilds every
//!   component from a fresh configuration snapshot
//!
//! # Modules
//!
//! - [`config`] - Configuration types, layered YAML loading and file watching
//! - [`git`] - Remote ref listing (git CLI and in-memory)
//! - [`registry`] - Monitored repositories and their known refs
//! - [`detector`] - Ref diffing
//! - [`events`] - Publish/subscribe bus
//! - [`scheduler`] - Periodic and on-demand detection passes
//! - [`webhook`] - HTTP delivery of changes
//! - [`coordinator`] - Startup, reload and shutdown
//! - [`server`] - HTTP API
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod domain;
pub mod events;
pub mod git;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod webhook;

// Re-export commonly used types
pub use config::{Config, ConfigError, ConfigProvider, ConfigSource, ConfigWatcher, StaticConfig};
pub use coordinator::{ReloadCoordinator, ReloadError};
pub use detector::ChangeDetector;
pub use domain::{GitRef, Repository, RepositoryChange, WebhookPayload};
pub use events::{Event, EventBus, EventKind};
pub use git::{GitCli, GitError, InMemoryRefSource, RemoteRefSource};
pub use registry::{RepositoryHandle, RepositoryRegistry};
pub use scheduler::{PollingScheduler, SchedulerState};
pub use webhook::{WebhookDispatcher, WebhookError};
