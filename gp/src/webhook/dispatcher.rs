//! Webhook dispatcher
//!
//! Subscribes to repository changes on the event bus and POSTs one JSON
//! document per changed ref. Deliveries run on their own tasks: a slow or
//! failing endpoint never holds up detection, and nothing is retried.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::error::WebhookError;
use crate::config::{Config, WebhookConfig};
use crate::domain::{RepositoryChange, WebhookPayload};
use crate::events::{Event, EventBus, EventKind};

/// User agent sent with every delivery
pub const USER_AGENT: &str = concat!("git-poller/", env!("CARGO_PKG_VERSION"));

/// Resolved endpoint and credential
#[derive(Debug, Clone, Default)]
pub struct WebhookTarget {
    url: Option<String>,
    authorization: Option<HeaderValue>,
}

impl WebhookTarget {
    /// Resolve a target, loading the token file if one is configured
    ///
    /// `tokenPath` wins over `token`. An unreadable token file is an error.
    /// Empty values count as unset, so `token: ""` sends no credential.
    pub fn from_config(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let token = match token_path(config) {
            Some(path) => {
                debug!(?path, "WebhookTarget::from_config: reading token file");
                let contents = fs::read_to_string(path).map_err(|source| WebhookError::CredentialLoad {
                    path: path.to_path_buf(),
                    source,
                })?;
                Some(contents.trim().to_string()).filter(|t| !t.is_empty())
            }
            None => inline_token(config).map(str::to_string),
        };

        let authorization = match token {
            Some(token) => {
                let mut value =
                    HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| WebhookError::InvalidCredential)?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self {
            url: config.url.clone(),
            authorization,
        })
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn has_credential(&self) -> bool {
        self.authorization.is_some()
    }
}

fn token_path(config: &WebhookConfig) -> Option<&Path> {
    config.token_path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

fn inline_token(config: &WebhookConfig) -> Option<&str> {
    config.token.as_deref().filter(|t| !t.is_empty())
}

/// Layer a repository's webhook settings over the defaults
///
/// The url falls back independently; a repository that sets either `token`
/// or `tokenPath` replaces the default credential entirely.
fn layered(repo: &WebhookConfig, defaults: &WebhookConfig) -> WebhookConfig {
    let (token, token_path) = if inline_token(repo).is_some() || token_path(repo).is_some() {
        (repo.token.clone(), repo.token_path.clone())
    } else {
        (defaults.token.clone(), defaults.token_path.clone())
    };
    WebhookConfig {
        url: repo.url.clone().or_else(|| defaults.url.clone()),
        token,
        token_path,
    }
}

/// Delivers repository changes to HTTP endpoints
pub struct WebhookDispatcher {
    client: reqwest::Client,
    default_target: WebhookTarget,
    overrides: HashMap<String, WebhookTarget>,
}

impl WebhookDispatcher {
    /// Build a dispatcher from config without registering it
    pub fn new(config: &Config) -> Result<Arc<Self>, WebhookError> {
        debug!(url = ?config.webhook.url, "WebhookDispatcher::new: called");
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(WebhookError::Client)?;

        let default_target = WebhookTarget::from_config(&config.webhook)?;
        let mut overrides = HashMap::new();
        for repo in &config.repos {
            if let Some(webhook) = &repo.webhook {
                debug!(repo = %repo.name, "WebhookDispatcher::new: repository webhook override");
                let target = WebhookTarget::from_config(&layered(webhook, &config.webhook))?;
                debug!(
                    repo = %repo.name,
                    url = ?target.url(),
                    authenticated = target.has_credential(),
                    "WebhookDispatcher::new: resolved override"
                );
                overrides.insert(repo.name.clone(), target);
            }
        }

        if default_target.url().is_none() && overrides.is_empty() {
            warn!("No webhook url configured; changes will not be delivered");
        }

        Ok(Arc::new(Self {
            client,
            default_target,
            overrides,
        }))
    }

    /// Build a dispatcher and register it for repository changes
    pub fn attach(config: &Config, bus: &EventBus) -> Result<Arc<Self>, WebhookError> {
        let dispatcher = Self::new(config)?;
        dispatcher.subscribe(bus);
        Ok(dispatcher)
    }

    /// Register this dispatcher's handler on the bus
    pub fn subscribe(self: &Arc<Self>, bus: &EventBus) {
        let this = Arc::clone(self);
        bus.register(EventKind::RepositoryChange, move |event| this.on_event(event));
    }

    /// Target used for a repository
    pub fn target_for(&self, repo: &str) -> &WebhookTarget {
        self.overrides.get(repo).unwrap_or(&self.default_target)
    }

    fn on_event(self: &Arc<Self>, event: &Event) -> eyre::Result<()> {
        match event {
            Event::RepositoryChange(change) => self.deliver_change(change),
        }
    }

    /// Spawn one delivery per changed ref
    fn deliver_change(self: &Arc<Self>, change: &RepositoryChange) -> eyre::Result<()> {
        debug!(repo = %change.name, count = change.changes.len(), "WebhookDispatcher received repository changes");
        let runtime = Handle::try_current().map_err(|_| WebhookError::NoRuntime)?;

        for payload in change.payloads() {
            let this = Arc::clone(self);
            runtime.spawn(async move {
                if let Err(e) = this.send(EventKind::RepositoryChange, &payload).await {
                    error!(repo = %payload.name, ref_name = %payload.change.name, error = %e, "Webhook delivery failed");
                }
            });
        }
        Ok(())
    }

    /// POST one payload to the repository's target
    ///
    /// Any HTTP status counts as delivered; it is logged, not retried.
    pub async fn send(&self, kind: EventKind, payload: &WebhookPayload) -> Result<StatusCode, WebhookError> {
        let target = self.target_for(&payload.name);
        let url = target.url().ok_or_else(|| WebhookError::MissingUrl {
            repo: payload.name.clone(),
        })?;

        info!(
            event = %kind,
            repo = %payload.name,
            ref_name = %payload.change.name,
            hash = %payload.change.hash,
            "Sending Webhook"
        );

        let mut request = self.client.post(url).json(payload);
        if let Some(authorization) = &target.authorization {
            request = request.header(AUTHORIZATION, authorization.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            info!(status = status.as_u16(), status_text = status.canonical_reason().unwrap_or(""), "Webhook response");
        } else {
            warn!(status = status.as_u16(), status_text = status.canonical_reason().unwrap_or(""), "Webhook response");
        }
        Ok(status)
    }
}
