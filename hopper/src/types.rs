//! Core value types shared across the engine.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ErrorKind, HopperError};
use crate::hopper_error;

/// A raw unit yielded by a plugin's `extract`.
///
/// The shape is plugin-defined; the engine never persists it directly.
pub type Record = serde_json::Value;

/// A persist-ready unit produced by a plugin's `transform`.
pub type TransformedRecord = serde_json::Value;

/// The store operation a plugin declares for the rows it produces.
///
/// Used for tally labeling and for routing the fatal-vs-recoverable failure
/// policy: failed delete runs are never marked resumable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Insert new records.
    Insert,
    /// Update existing records.
    Update,
    /// Insert new or update existing records (upsert).
    Load,
    /// Partially update existing records.
    Patch,
    /// Delete records.
    Delete,
}

impl Operation {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Load => "load",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

/// Batching policy governing how transformed records are grouped before
/// persistence.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Records are streamed one at a time and buffered; `load` receives
    /// batches of at most `commit_after` records while extraction is still in
    /// progress.
    Chunked,
    /// The whole dataset is drained and transformed, then `load` is called
    /// exactly once with the entire transformed set.
    Bulk,
    /// The whole dataset is drained and transformed first, then partitioned
    /// into `commit_after`-sized chunks loaded sequentially.
    Batch,
}

impl LoadStrategy {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            LoadStrategy::Chunked => "chunked",
            LoadStrategy::Bulk => "bulk",
            LoadStrategy::Batch => "batch",
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

/// Execution mode for a pipeline run, fixed for its duration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Extract and transform only; `load` is never called and tallies are
    /// simulated from transformed record counts.
    DryRun,
    /// Full pipeline with durable commits per the load strategy.
    Commit,
    /// Full pipeline including real `load` calls, but the whole session is
    /// rolled back at run end.
    NonCommit,
    /// Extract and transform only, to let the plugin materialize an
    /// intermediate artifact; requires preprocess support on the plugin.
    Preprocess,
}

impl RunMode {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            RunMode::DryRun => "dry_run",
            RunMode::Commit => "commit",
            RunMode::NonCommit => "non_commit",
            RunMode::Preprocess => "preprocess",
        }
    }

    /// Returns `true` if the mode calls `load` and therefore needs a store
    /// session.
    pub fn needs_session(&self) -> bool {
        matches!(self, RunMode::Commit | RunMode::NonCommit)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

/// State machine over the lifetime of a pipeline run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

/// A schema-qualified table identifier (`schema.table`).
///
/// Every table a plugin declares or touches is schema-qualified; the parser
/// rejects anything else so tally keys and session scoping never carry
/// ambiguous names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Parses a `schema.table` string into a [`TableName`].
    pub fn parse(qualified: &str) -> Result<Self, HopperError> {
        let Some((schema, table)) = qualified.split_once('.') else {
            return Err(hopper_error!(
                ErrorKind::InvalidTableName,
                "Table name must be schema-qualified",
                format!("expected `schema.table`, got `{qualified}`")
            ));
        };

        if schema.is_empty() || table.is_empty() || table.contains('.') {
            return Err(hopper_error!(
                ErrorKind::InvalidTableName,
                "Table name must be schema-qualified",
                format!("expected `schema.table`, got `{qualified}`")
            ));
        }

        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl FromStr for TableName {
    type Err = HopperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::parse(s)
    }
}

impl Serialize for TableName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TableName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        TableName::parse(&raw).map_err(|err| D::Error::custom(format!("{err}")))
    }
}
