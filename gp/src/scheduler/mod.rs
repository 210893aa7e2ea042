//! Polling scheduler
//!
//! Drives periodic detection passes over the registry and publishes each
//! repository's changes on the event bus. The same detection pass is exposed
//! for on-demand checks, which return changes to the caller instead.

mod core;

pub use core::{PollingScheduler, SchedulerState};
