//! Reload error types

use thiserror::Error;

use crate::config::ConfigError;
use crate::webhook::WebhookError;

/// Errors that abort a reload attempt
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("Configuration reload failed: {0}")]
    Config(#[from] ConfigError),

    #[error("Webhook dispatcher construction failed: {0}")]
    Webhook(#[from] WebhookError),
}
