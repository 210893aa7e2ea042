//! Reload coordination
//!
//! Owns the live generation (config, registry, dispatcher, scheduler) and
//! swaps it atomically with respect to every other entry point.

mod core;
mod error;

pub use core::{Generation, ReloadCoordinator, SourceFactory};
pub use error::ReloadError;
