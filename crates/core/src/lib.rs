//! `portage-core`: data model shared by every part of the transfer engine.
//!
//! This crate contains **pure data** types and adapter contracts (no IO).

pub mod adapter;
pub mod auth_data;
pub mod encoding;
pub mod error;
pub mod export;
pub mod id;
pub mod import;
pub mod job;

pub use adapter::{AdapterError, DataItem, ExportPage, Exporter, FailureKind, Importer, ItemKind};
pub use auth_data::AuthData;
pub use error::{DomainError, DomainResult};
pub use export::{
    ContainerResource, ContinuationData, ExportInformation, ExportResult, ExportResultType,
    PaginationToken,
};
pub use id::JobId;
pub use import::ImportResult;
pub use job::{Job, JobAuthorization, JobState};
