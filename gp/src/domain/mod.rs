//! Domain types shared by detection, delivery and the HTTP surface

mod repository;

pub use repository::{GitRef, Repository, RepositoryChange, WebhookPayload};
