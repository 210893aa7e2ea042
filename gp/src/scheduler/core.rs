//! PollingScheduler - periodic detection task with awaited cancellation

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::detector::ChangeDetector;
use crate::domain::RepositoryChange;
use crate::events::{Event, EventBus};
use crate::registry::RepositoryRegistry;

/// Lifecycle state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Running => write!(f, "running"),
        }
    }
}

/// Handle to the running tick task
struct Ticker {
    interval: Duration,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic and on-demand detection over one registry
///
/// A scheduler is bound to one configuration generation: its registry,
/// detector and bus never change. Reload builds a new one.
pub struct PollingScheduler {
    registry: RepositoryRegistry,
    detector: Arc<ChangeDetector>,
    bus: Arc<EventBus>,
    ticker: Mutex<Option<Ticker>>,
}

impl PollingScheduler {
    pub fn new(registry: RepositoryRegistry, detector: Arc<ChangeDetector>, bus: Arc<EventBus>) -> Self {
        debug!(repos = registry.len(), "PollingScheduler::new: called");
        Self {
            registry,
            detector,
            bus,
            ticker: Mutex::new(None),
        }
    }

    /// Start ticking every `interval`
    ///
    /// An absent or zero interval leaves the scheduler stopped. The first tick
    /// fires one full interval after start. Starting a running scheduler is a
    /// no-op. Must be called from within a tokio runtime.
    pub fn start(&self, interval: Option<Duration>) -> SchedulerState {
        debug!(?interval, "PollingScheduler::start: called");
        let period = match interval {
            Some(period) if !period.is_zero() => period,
            _ => {
                info!("Polling disabled");
                return self.state();
            }
        };

        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = ticker.as_ref() {
            warn!(interval_ms = running.interval.as_millis() as u64, "Scheduler already running");
            return SchedulerState::Running;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_ticks(
            period,
            shutdown_rx,
            self.registry.clone(),
            self.detector.clone(),
            self.bus.clone(),
        ));

        info!(interval_ms = period.as_millis() as u64, "Polling started");
        *ticker = Some(Ticker {
            interval: period,
            shutdown_tx,
            handle,
        });
        SchedulerState::Running
    }

    /// Stop ticking and wait for the tick task to exit
    ///
    /// A pass already in flight runs to completion before this returns; no
    /// tick starts afterwards. Safe to call when already stopped.
    pub async fn stop(&self) {
        debug!("PollingScheduler::stop: called");
        let ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(ticker) = ticker else {
            debug!("PollingScheduler::stop: already stopped");
            return;
        };

        let _ = ticker.shutdown_tx.send(()).await;
        if let Err(e) = ticker.handle.await {
            warn!(error = %e, "Polling task ended abnormally");
        }
        info!("Polling stopped");
    }

    pub fn state(&self) -> SchedulerState {
        let ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Current tick interval, if running
    pub fn interval(&self) -> Option<Duration> {
        let ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        ticker.as_ref().map(|t| t.interval)
    }

    /// Run one detection pass and return the changes without dispatching
    pub async fn check_now(&self) -> Vec<RepositoryChange> {
        debug!("PollingScheduler::check_now: called");
        self.detector.check_all(&self.registry).await
    }

    /// Dispatch one event per repository change
    pub fn publish(&self, changes: &[RepositoryChange]) {
        publish(&self.bus, changes);
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }
}

fn publish(bus: &EventBus, changes: &[RepositoryChange]) {
    for change in changes {
        bus.dispatch(&Event::RepositoryChange(change.clone()));
    }
}

async fn run_ticks(
    period: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
    registry: RepositoryRegistry,
    detector: Arc<ChangeDetector>,
    bus: Arc<EventBus>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                debug!("run_ticks: shutdown signal received");
                break;
            }
            _ = interval.tick() => {}
        }

        // Outside the select so a stop request never cancels a pass midway
        debug!("run_ticks: tick");
        let changes = detector.check_all(&registry).await;
        publish(&bus, &changes);
    }
}
