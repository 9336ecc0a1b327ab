use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::HopperResult;

/// Identifies the durable resume point of one plugin against one logical
/// target.
///
/// Two concurrent runs only share a resume point when both plugin name and
/// target match, so independent runs of the same plugin against disjoint
/// inputs never clobber each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    /// Registered plugin name.
    pub plugin: String,
    /// Logical target identifier, supplied by the caller per run.
    pub target: String,
}

impl CheckpointKey {
    pub fn new(plugin: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin, self.target)
    }
}

/// Durable marker of the last successfully committed unit of work.
///
/// Produced by every successful `load` call; the last one persisted for a run
/// is the resume point handed back to `extract` on the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeCheckpoint {
    /// Stable identifier of the last row processed, from `get_record_id`.
    pub record_id: String,
    /// Optional source-relative position marker (e.g. a line number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
}

impl ResumeCheckpoint {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            position: None,
        }
    }

    pub fn with_position(record_id: impl Into<String>, position: u64) -> Self {
        Self {
            record_id: record_id.into(),
            position: Some(position),
        }
    }
}

/// Trait for storing and retrieving resume checkpoints.
///
/// Implementations must provide atomic read-then-write behavior per
/// [`CheckpointKey`] so that concurrent runs against distinct keys cannot
/// overwrite each other's resume point.
pub trait CheckpointStore {
    /// Returns the last persisted checkpoint for the given key, if any.
    fn load_checkpoint(
        &self,
        key: &CheckpointKey,
    ) -> impl Future<Output = HopperResult<Option<ResumeCheckpoint>>> + Send;

    /// Persists the checkpoint for the given key, replacing any previous one.
    fn save_checkpoint(
        &self,
        key: &CheckpointKey,
        checkpoint: &ResumeCheckpoint,
    ) -> impl Future<Output = HopperResult<()>> + Send;
}
