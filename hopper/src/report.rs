//! Run reporting: transaction tallies and the final status object.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::checkpoint::ResumeCheckpoint;
use crate::types::{Operation, RunMode, RunStatus, TableName};

/// Per-table, per-operation row counts accumulated during a run.
///
/// Counts only ever increase within a run; the plugin reports them through
/// the load context and the executor folds the result into the run report,
/// independent of whatever the plugin logs on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionTally {
    counts: BTreeMap<Operation, BTreeMap<TableName, u64>>,
}

impl TransactionTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds affected rows for a (table, operation) pair.
    pub fn record(&mut self, table: &TableName, operation: Operation, rows: u64) {
        *self
            .counts
            .entry(operation)
            .or_default()
            .entry(table.clone())
            .or_insert(0) += rows;
    }

    /// Returns the recorded count for a (table, operation) pair.
    pub fn count(&self, table: &TableName, operation: Operation) -> u64 {
        self.counts
            .get(&operation)
            .and_then(|tables| tables.get(table))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the total row count across all tables and operations.
    pub fn total(&self) -> u64 {
        self.counts
            .values()
            .flat_map(|tables| tables.values())
            .sum()
    }

    /// Returns `true` if no rows were recorded.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Iterates the recorded counts grouped by operation.
    pub fn entries(&self) -> impl Iterator<Item = (Operation, &TableName, u64)> {
        self.counts.iter().flat_map(|(operation, tables)| {
            tables
                .iter()
                .map(move |(table, count)| (*operation, table, *count))
        })
    }
}

/// Whether a failed run may simply be resumed from its checkpoint.
///
/// Failed delete runs are never retried automatically; everything else can
/// be re-run and will skip already-committed batches via the checkpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDisposition {
    /// Re-running with the same request resumes after the last committed
    /// batch.
    Resumable,
    /// Operator intervention is required before re-running.
    Manual,
}

/// Final status object of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Short identifier tying together all log lines of this run.
    pub run_id: String,
    /// Name of the plugin that ran.
    pub plugin: String,
    /// Execution mode the run was started with.
    pub mode: RunMode,
    /// Terminal status of the run.
    pub status: RunStatus,
    /// Per-table, per-operation row counts reported by the plugin.
    pub tally: TransactionTally,
    /// Last checkpoint returned by `load`. Only advanced durably in commit
    /// mode.
    pub checkpoint: Option<ResumeCheckpoint>,
    /// Number of records yielded by `extract`.
    pub records_extracted: u64,
    /// Number of records skipped by `transform`.
    pub records_skipped: u64,
    /// Number of records whose id was already seen during this run.
    pub duplicate_records: u64,
    /// Number of `load` invocations.
    pub load_calls: u64,
    /// Wall-clock time the run started.
    pub started_at: DateTime<Utc>,
    /// Total run duration.
    pub elapsed: Duration,
    /// Set on successful preprocess runs instead of committing data.
    pub materialized: bool,
    /// Retry guidance, present on failed runs.
    pub retry: Option<RetryDisposition>,
    /// Rendered failure, present on failed runs.
    pub error: Option<String>,
}

impl RunReport {
    /// Returns `true` if the run reached [`RunStatus::Succeeded`].
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}
