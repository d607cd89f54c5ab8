//! At-most-once execution of import work, keyed by a stable resource id.
//!
//! One executor lives for one job run and is dropped with it. The first
//! outcome for an id (value or error) is cached and handed to every later
//! caller without running their work.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// A failed import, kept for end-of-job reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{display_name} ({id}): {cause}")]
pub struct ErrorDetail {
    pub id: String,
    pub display_name: String,
    pub cause: String,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorDetail {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            cause: cause.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdempotentError {
    #[error("no import recorded for id {0}")]
    NotFound(String),
    #[error("import for id {} failed: {}", .0.id, .0.cause)]
    Failed(ErrorDetail),
}

type Slot<V> = Arc<OnceLock<Result<V, ErrorDetail>>>;

/// Per-job idempotent import cache.
///
/// Safe to share between threads: concurrent callers on the same id block
/// until the single execution finishes, then all observe its outcome.
#[derive(Debug)]
pub struct IdempotentImportExecutor<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
    errors: Mutex<Vec<ErrorDetail>>,
}

impl<V: Clone> IdempotentImportExecutor<V> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Run `work` once for `id`. A failure is recorded and `None` returned so
    /// the caller can move on to the next item.
    pub fn execute_and_swallow<E, F>(&self, id: &str, display_name: &str, work: F) -> Option<V>
    where
        E: Display,
        F: FnOnce() -> Result<V, E>,
    {
        self.execute(id, display_name, work).ok()
    }

    /// Run `work` once for `id`, returning the failure to the caller.
    ///
    /// Meant for containers: once a container failed, every later caller for
    /// that id sees the same error.
    pub fn execute_or_throw<E, F>(&self, id: &str, display_name: &str, work: F) -> Result<V, ErrorDetail>
    where
        E: Display,
        F: FnOnce() -> Result<V, E>,
    {
        self.execute(id, display_name, work)
    }

    pub fn get_cached_value(&self, id: &str) -> Result<V, IdempotentError> {
        let slot = lock(&self.slots).get(id).cloned();
        match slot.as_deref().and_then(OnceLock::get) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(detail)) => Err(IdempotentError::Failed(detail.clone())),
            None => Err(IdempotentError::NotFound(id.to_string())),
        }
    }

    /// True once `id` has been imported successfully.
    pub fn is_key_cached(&self, id: &str) -> bool {
        self.get_cached_value(id).is_ok()
    }

    /// The recorded failure for `id`, if its execution failed.
    pub fn cached_error(&self, id: &str) -> Option<ErrorDetail> {
        match self.get_cached_value(id) {
            Err(IdempotentError::Failed(detail)) => Some(detail),
            _ => None,
        }
    }

    /// Every failure recorded so far, in the order they happened.
    pub fn errors(&self) -> Vec<ErrorDetail> {
        lock(&self.errors).clone()
    }

    fn execute<E, F>(&self, id: &str, display_name: &str, work: F) -> Result<V, ErrorDetail>
    where
        E: Display,
        F: FnOnce() -> Result<V, E>,
    {
        let slot = {
            let mut slots = lock(&self.slots);
            slots.entry(id.to_string()).or_default().clone()
        };

        let mut ran = false;
        let outcome = slot.get_or_init(|| {
            ran = true;
            work().map_err(|e| {
                let detail = ErrorDetail::new(id, display_name, e.to_string());
                warn!(id, display_name, cause = %detail.cause, "import failed");
                lock(&self.errors).push(detail.clone());
                detail
            })
        });
        if !ran {
            debug!(id, display_name, "import already executed; using cached outcome");
        }
        outcome.clone()
    }
}

impl<V: Clone> Default for IdempotentImportExecutor<V> {
    fn default() -> Self {
        Self::new()
    }
}

// Nothing panics while these locks are held, so a poisoned guard still
// protects consistent data.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
