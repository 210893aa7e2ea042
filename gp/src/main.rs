//! gp - git ref poller
//!
//! CLI entry point: runs the poller with its HTTP API, or prints one remote
//! listing for diagnostics.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use gitpoller::cli::{Cli, Command, parse_log_level, resolve_log_level};
use gitpoller::config::{Config, ConfigProvider, ConfigSource, ConfigWatcher};
use gitpoller::coordinator::ReloadCoordinator;
use gitpoller::events::create_event_bus;
use gitpoller::git::{GitCli, RemoteRefSource};
use gitpoller::server::{self, AppState};

type LogHandle = reload::Handle<EnvFilter, Registry>;

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.into())
}

fn setup_logging(level: Level) -> Result<LogHandle> {
    // Note: Can't log before the subscriber is installed
    let (filter, handle) = reload::Layer::new(env_filter(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!("Logging initialized (level: {:?})", level);
    Ok(handle)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early so its log level can take part in logging setup
    let source = Arc::new(ConfigSource::discover(&cli.config));
    let early = source.reload();
    let config_log_level = early.as_ref().ok().and_then(|c| c.log_level.clone());

    let level = resolve_log_level(cli.log_level.as_deref(), config_log_level.as_deref());
    let log_handle = setup_logging(level)?;
    let level_sources = [
        ("--log-level", cli.log_level.as_deref()),
        ("config logLevel", config_log_level.as_deref()),
    ];
    for (origin, name) in level_sources {
        if let Some(name) = name.filter(|n| parse_log_level(n).is_none()) {
            warn!(%origin, value = %name, "Ignoring unknown log level");
        }
    }
    debug!(paths = ?source.paths(), "main: config paths");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::ListRefs { ref url }) => {
            let config = early.context("Failed to load configuration")?;
            cmd_list_refs(&config, url).await
        }
        Some(Command::Serve) | None => cmd_serve(&cli, source, log_handle).await,
    }
}

async fn cmd_list_refs(config: &Config, url: &str) -> Result<()> {
    debug!(%url, "cmd_list_refs: called");
    let git = GitCli::from_config(&config.git);
    let refs = git
        .list_refs(url)
        .await
        .with_context(|| format!("Failed to list refs for {}", url))?;
    println!("{}", serde_json::to_string_pretty(&refs)?);
    Ok(())
}

async fn cmd_serve(cli: &Cli, source: Arc<ConfigSource>, log_handle: LogHandle) -> Result<()> {
    debug!("cmd_serve: called");
    let bus = create_event_bus();
    let provider: Arc<dyn ConfigProvider> = source.clone();
    let coordinator = Arc::new(ReloadCoordinator::with_git_cli(bus, provider));

    let cli_log_level = cli.log_level.clone();
    coordinator.on_reload(move |config| {
        let level = resolve_log_level(cli_log_level.as_deref(), config.log_level.as_deref());
        if let Err(e) = log_handle.reload(env_filter(level)) {
            warn!(error = %e, "Failed to apply log level");
        }
    });

    let config = coordinator.start().await.context("Failed to load configuration")?;
    let port = cli.port.unwrap_or(config.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = Arc::new(Notify::new());

    // Config file watcher feeds the reload loop
    let (tx, mut rx) = mpsc::channel::<Vec<std::path::PathBuf>>(8);
    let watcher_handle = match ConfigWatcher::new(source.paths().to_vec(), tx).await {
        Ok(watcher) => Some(tokio::spawn(async move {
            if let Err(e) = watcher.run().await {
                warn!(error = %e, "Config watcher ended");
            }
        })),
        Err(e) => {
            warn!(error = %e, "Config files will not be watched; use SIGHUP or POST /reload");
            None
        }
    };

    let reload_coordinator = coordinator.clone();
    let reload_handle = tokio::spawn(async move {
        while let Some(changed) = rx.recv().await {
            info!(files = ?changed, "Config change detected - reloading");
            if let Err(e) = reload_coordinator.reload().await {
                error!(error = %e, "Reload failed; previous configuration kept");
            }
        }
    });

    let signal_handle = tokio::spawn(wait_for_signals(coordinator.clone(), shutdown.clone()));

    info!(%port, "gp running. Press Ctrl+C to stop, SIGHUP to reload config.");
    server::serve(listener, AppState::new(coordinator.clone(), shutdown)).await?;

    info!("gp shutting down...");
    coordinator.shutdown().await;

    debug!("cmd_serve: aborting background tasks");
    if let Some(handle) = watcher_handle {
        handle.abort();
    }
    reload_handle.abort();
    signal_handle.abort();

    debug!("cmd_serve: shutdown complete");
    Ok(())
}

/// Translate process signals into shutdown and reload requests
async fn wait_for_signals(coordinator: Arc<ReloadCoordinator>, shutdown: Arc<Notify>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sighup, mut sigint, mut sigterm) = match (
            signal(SignalKind::hangup()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(hup), Ok(int), Ok(term)) => (hup, int, term),
            _ => {
                error!("Failed to install signal handlers");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("SIGHUP received - reloading configuration");
                    if let Err(e) = coordinator.reload().await {
                        error!(error = %e, "Reload failed; previous configuration kept");
                    }
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = &coordinator;
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to wait for ctrl_c");
            return;
        }
        warn!("ctrl_c received");
    }

    shutdown.notify_one();
}
