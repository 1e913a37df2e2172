//! Reconciliation of the index against the bucket.
//!
//! `plan` computes the diff as plain data, `reconciler` enriches and applies
//! it in one transaction, `runner` serialises runs and drives the timer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::{index::IndexError, store::StoreError};

pub mod plan;
pub mod reconciler;
pub mod runner;

pub use plan::SyncPlan;
pub use reconciler::{ReconcileOptions, Reconciler};
pub use runner::SyncRunner;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("listing bucket failed: {0}")]
    Listing(#[source] StoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("sync did not finish within {0:?}")]
    Timeout(Duration),
    #[error("a sync is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Thumbnail,
    Dimensions,
}

/// A per-key problem that did not abort the run.
#[derive(Debug, Clone, Serialize)]
pub struct KeyFailure {
    pub key: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// Outcome of one successful reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Thumbnails newly written (existing ones found by HEAD are not counted).
    pub derived: usize,
    pub dimensions_extracted: usize,
    /// Image keys whose enrichment was left for a later run because the
    /// per-run budget or the enrichment window ran out.
    pub deferred: usize,
    /// Distinct keys with at least one entry in `failures`.
    pub failed: usize,
    pub failures: Vec<KeyFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncStats {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            inserted: 0,
            updated: 0,
            deleted: 0,
            derived: 0,
            dimensions_extracted: 0,
            deferred: 0,
            failed: 0,
            failures: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    /// Keys are enriched one at a time, so a repeat failure for the same key
    /// is always adjacent to the previous one.
    fn record_failure(&mut self, key: &str, stage: FailureStage, reason: impl ToString) {
        if self.failures.last().is_none_or(|last| last.key != key) {
            self.failed += 1;
        }
        self.failures.push(KeyFailure {
            key: key.to_string(),
            stage,
            reason: reason.to_string(),
        });
    }
}
