//! Event vocabulary

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::RepositoryChange;

/// Kinds of event handlers can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "repository:change")]
    RepositoryChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RepositoryChange => "repository:change",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// New refs were observed for one repository
    RepositoryChange(RepositoryChange),
}

impl Event {
    /// The kind handlers register under
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RepositoryChange(_) => EventKind::RepositoryChange,
        }
    }
}

impl From<RepositoryChange> for Event {
    fn from(change: RepositoryChange) -> Self {
        Event::RepositoryChange(change)
    }
}
