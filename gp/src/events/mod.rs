//! In-process event bus
//!
//! Detection publishes, delivery subscribes. The bus is an explicitly
//! constructed object owned by the application root and handed to every
//! component that publishes or registers handlers.
//!
//! ```text
//!   PollingScheduler ──┐
//!                      ├──► EventBus ──► WebhookDispatcher ──► POST webhook.url
//!   GET /repos/changes ┘   (by kind)
//! ```
//!
//! Reload wipes every registration with [`EventBus::clear_all`]; events
//! dispatched before new handlers register are dropped, not queued.

mod bus;
mod types;

pub use bus::{EventBus, Handler, create_event_bus};
pub use types::{Event, EventKind};
