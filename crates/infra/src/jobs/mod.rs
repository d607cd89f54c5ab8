//! Job lifecycle on the worker side.
//!
//! ## Components
//!
//! - `JobStore`: job records with conditional (compare-and-set) updates
//! - `JobPoller`: searches for, claims and waits on one job
//! - `StaleClaimReaper`: times out claims whose worker went away
//! - `Worker`: runs the whole flow for one job on a background thread

pub mod claim;
pub mod reaper;
pub mod store;
pub mod worker;

pub use claim::{ClaimOutcome, ClaimedJob, JobPoller, PollOutcome};
pub use reaper::{ReapReport, StaleClaimReaper};
pub use store::{InMemoryJobStore, JobStore, JobStoreError, UpdatePrecondition};
pub use worker::{JobContext, JobOutcome, Worker, WorkerError, WorkerHandle, WorkerStats};
