//! Export cursors and results.
//!
//! An export call answers one [`ExportInformation`] and may hand back a
//! [`ContinuationData`] naming further work: another page of the same
//! container, newly discovered sub-containers, or both.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Opaque cursor for resuming a listing within one container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaginationToken(String);

impl PaginationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PaginationToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-defined sub-collection (an album, a playlist, a calendar).
///
/// Only `id` has meaning to the engine; `attributes` travel back to the
/// exporter untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResource {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl ContainerResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            attributes: serde_json::Value::Null,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// The unit of "work to resume". Both fields empty means the first
/// whole-library export call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExportInformation {
    pub pagination: Option<PaginationToken>,
    pub resource: Option<ContainerResource>,
}

impl ExportInformation {
    pub fn whole_library() -> Self {
        Self::default()
    }

    pub fn next_page(pagination: PaginationToken, resource: Option<ContainerResource>) -> Self {
        Self {
            pagination: Some(pagination),
            resource,
        }
    }

    pub fn container(resource: ContainerResource) -> Self {
        Self {
            pagination: None,
            resource: Some(resource),
        }
    }

    pub fn is_whole_library(&self) -> bool {
        self.pagination.is_none() && self.resource.is_none()
    }
}

#[derive(Deserialize)]
struct RawContinuation {
    #[serde(default)]
    next_pagination: Option<PaginationToken>,
    #[serde(default)]
    sub_resources: Vec<ContainerResource>,
}

/// Further work discovered by an export call. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawContinuation")]
pub struct ContinuationData {
    next_pagination: Option<PaginationToken>,
    sub_resources: Vec<ContainerResource>,
}

impl ContinuationData {
    /// Returns `None` when there is nothing to continue with.
    pub fn new(
        next_pagination: Option<PaginationToken>,
        sub_resources: Vec<ContainerResource>,
    ) -> Option<Self> {
        if next_pagination.is_none() && sub_resources.is_empty() {
            return None;
        }
        Some(Self {
            next_pagination,
            sub_resources,
        })
    }

    pub fn next_page(token: PaginationToken) -> Self {
        Self {
            next_pagination: Some(token),
            sub_resources: Vec::new(),
        }
    }

    pub fn sub_resource(resource: ContainerResource) -> Self {
        Self {
            next_pagination: None,
            sub_resources: vec![resource],
        }
    }

    pub fn and_sub_resource(mut self, resource: ContainerResource) -> Self {
        self.sub_resources.push(resource);
        self
    }

    pub fn and_next_page(mut self, token: PaginationToken) -> Self {
        self.next_pagination = Some(token);
        self
    }

    pub fn next_pagination(&self) -> Option<&PaginationToken> {
        self.next_pagination.as_ref()
    }

    pub fn sub_resources(&self) -> &[ContainerResource] {
        &self.sub_resources
    }
}

impl TryFrom<RawContinuation> for ContinuationData {
    type Error = DomainError;

    fn try_from(raw: RawContinuation) -> Result<Self, Self::Error> {
        ContinuationData::new(raw.next_pagination, raw.sub_resources)
            .ok_or_else(|| DomainError::validation("continuation data carries no work"))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportResultType {
    Continue,
    End,
    Error,
}

/// Outcome of one export call.
///
/// The shape enforces the invariants: `End` has no continuation, `Continue`
/// always has a non-empty one, and `Error` carries neither data nor
/// continuation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportResult<T> {
    Continue { data: T, continuation: ContinuationData },
    End { data: T },
    Error { message: String },
}

impl<T> ExportResult<T> {
    /// `Continue` if there is further work, `End` otherwise.
    pub fn new(data: T, continuation: Option<ContinuationData>) -> Self {
        match continuation {
            Some(continuation) => ExportResult::Continue { data, continuation },
            None => ExportResult::End { data },
        }
    }

    pub fn end(data: T) -> Self {
        ExportResult::End { data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ExportResult::Error {
            message: message.into(),
        }
    }

    pub fn result_type(&self) -> ExportResultType {
        match self {
            ExportResult::Continue { .. } => ExportResultType::Continue,
            ExportResult::End { .. } => ExportResultType::End,
            ExportResult::Error { .. } => ExportResultType::Error,
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ExportResult::Continue { data, .. } | ExportResult::End { data } => Some(data),
            ExportResult::Error { .. } => None,
        }
    }

    pub fn continuation(&self) -> Option<&ContinuationData> {
        match self {
            ExportResult::Continue { continuation, .. } => Some(continuation),
            _ => None,
        }
    }

    pub fn into_parts(self) -> Result<(T, Option<ContinuationData>), String> {
        match self {
            ExportResult::Continue { data, continuation } => Ok((data, Some(continuation))),
            ExportResult::End { data } => Ok((data, None)),
            ExportResult::Error { message } => Err(message),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExportResult<U> {
        match self {
            ExportResult::Continue { data, continuation } => ExportResult::Continue {
                data: f(data),
                continuation,
            },
            ExportResult::End { data } => ExportResult::End { data: f(data) },
            ExportResult::Error { message } => ExportResult::Error { message },
        }
    }
}
