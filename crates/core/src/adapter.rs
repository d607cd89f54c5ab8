//! Service adapter contract.
//!
//! Adapters translate between a provider's API and [`DataItem`]s. They are
//! external to the engine; the engine only needs these traits and a typed
//! failure classification to decide what to retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth_data::AuthData;
use crate::export::{ExportInformation, ExportResult};
use crate::id::JobId;
use crate::import::ImportResult;

/// Typed classification attached to every adapter failure.
///
/// Retry routing matches on this, never on message text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network/transport trouble; worth retrying.
    Transport,
    /// Provider asked us to slow down.
    RateLimited,
    /// Credentials were rejected.
    Unauthorized,
    /// The provider will never accept this request.
    Permanent,
    /// The call was interrupted and must not be retried.
    Cancelled,
}

/// Failure raised by an adapter call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct AdapterError {
    pub kind: FailureKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A nameable collection that children reference (album, playlist).
    Container,
    /// A single item (photo, contact, post).
    Leaf,
}

impl ItemKind {
    /// Idempotency key for an item of this kind. Containers and leaves live
    /// in separate keyspaces, so an album and a photo may share an id.
    pub fn import_key(self, id: &str) -> String {
        match self {
            ItemKind::Container => format!("container:{id}"),
            ItemKind::Leaf => format!("item:{id}"),
        }
    }
}

/// One exported item in the common data model.
///
/// `id` is stable across retries of the same export call; together with
/// `kind` it forms the idempotent import key (see [`DataItem::import_key`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DataItem {
    pub fn leaf(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ItemKind::Leaf,
            parent_id: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn container(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Container,
            ..Self::leaf(id, name)
        }
    }

    pub fn in_container(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind == ItemKind::Container
    }

    pub fn import_key(&self) -> String {
        self.kind.import_key(&self.id)
    }
}

/// A page of exported items.
pub type ExportPage = Vec<DataItem>;

/// Reads data from the export service.
///
/// Must be safe to call repeatedly with the same `info`: retries re-issue it.
pub trait Exporter: Send + Sync {
    fn export(
        &self,
        job_id: JobId,
        auth: &AuthData,
        info: &ExportInformation,
    ) -> Result<ExportResult<ExportPage>, AdapterError>;
}

/// Writes data to the import service.
///
/// Need not be idempotent; the engine guarantees at-most-once per item id.
pub trait Importer: Send + Sync {
    fn import(
        &self,
        job_id: JobId,
        auth: &AuthData,
        item: &DataItem,
    ) -> Result<ImportResult, AdapterError>;
}
