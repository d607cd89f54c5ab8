//! Import results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of one import call, with optional item counts and byte totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportResult {
    Ok {
        #[serde(default)]
        counts: BTreeMap<String, u64>,
        #[serde(default)]
        bytes: Option<u64>,
    },
    Error {
        message: String,
    },
}

impl ImportResult {
    pub fn ok() -> Self {
        ImportResult::Ok {
            counts: BTreeMap::new(),
            bytes: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ImportResult::Error {
            message: message.into(),
        }
    }

    /// Count one imported item of the given kind.
    pub fn with_count(mut self, kind: impl Into<String>, n: u64) -> Self {
        if let ImportResult::Ok { counts, .. } = &mut self {
            *counts.entry(kind.into()).or_default() += n;
        }
        self
    }

    pub fn with_bytes(mut self, n: u64) -> Self {
        if let ImportResult::Ok { bytes, .. } = &mut self {
            *bytes = Some(bytes.unwrap_or(0) + n);
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ImportResult::Ok { .. })
    }

    /// Combine two results. An error on either side wins; otherwise counts
    /// and bytes are summed.
    pub fn merge(self, other: ImportResult) -> ImportResult {
        match (self, other) {
            (err @ ImportResult::Error { .. }, _) | (_, err @ ImportResult::Error { .. }) => err,
            (
                ImportResult::Ok {
                    mut counts,
                    bytes: b1,
                },
                ImportResult::Ok {
                    counts: c2,
                    bytes: b2,
                },
            ) => {
                for (k, v) in c2 {
                    *counts.entry(k).or_default() += v;
                }
                let bytes = match (b1, b2) {
                    (None, None) => None,
                    (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
                };
                ImportResult::Ok { counts, bytes }
            }
        }
    }
}
