//! Repository, ref and change records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named pointer (branch or tag) to a revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitRef {
    pub name: String,
    pub hash: String,
}

impl GitRef {
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
        }
    }
}

/// A monitored repository and every ref observed for it so far
///
/// `refs` only ever grows: a ref deleted on the remote stays here, and a
/// moved branch appears once per hash it has pointed at.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded_refs: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub refs: Vec<GitRef>,
}

impl Repository {
    /// Create a repository with no known refs
    pub fn new(name: impl Into<String>, url: impl Into<String>, excluded_refs: Vec<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            excluded_refs,
            last_updated: Utc::now(),
            refs: Vec::new(),
        }
    }

    /// Whether a ref name starts with any excluded prefix
    pub fn is_excluded(&self, ref_name: &str) -> bool {
        self.excluded_refs.iter().any(|prefix| ref_name.starts_with(prefix.as_str()))
    }

    /// Whether any known ref, under any name, carries this hash
    pub fn knows_hash(&self, hash: &str) -> bool {
        self.refs.iter().any(|r| r.hash == hash)
    }

    /// Append newly observed refs and bump `last_updated`
    pub fn record(&mut self, refs: &[GitRef]) {
        if refs.is_empty() {
            return;
        }
        self.refs.extend_from_slice(refs);
        self.last_updated = Utc::now();
    }
}

/// The refs newly observed for one repository in one detection pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryChange {
    pub name: String,
    pub url: String,
    pub changes: Vec<GitRef>,
}

/// Body of one outbound webhook: a single changed ref
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub name: String,
    pub url: String,
    pub change: GitRef,
}

impl RepositoryChange {
    /// Split the change into one webhook payload per ref
    pub fn payloads(&self) -> impl Iterator<Item = WebhookPayload> + '_ {
        self.changes.iter().map(|change| WebhookPayload {
            name: self.name.clone(),
            url: self.url.clone(),
            change: change.clone(),
        })
    }
}
