//! Webhook delivery of detected changes

mod dispatcher;
mod error;

pub use dispatcher::{USER_AGENT, WebhookDispatcher, WebhookTarget};
pub use error::WebhookError;
