//! Webhook error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur building or delivering webhooks
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Failed to read webhook token from {path}")]
    CredentialLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Webhook token is not a valid header value")]
    InvalidCredential,

    #[error("No webhook url configured for {repo}")]
    MissingUrl { repo: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Webhook delivery failed: {0}")]
    Delivery(#[from] reqwest::Error),

    #[error("No async runtime available to deliver webhooks")]
    NoRuntime,
}
