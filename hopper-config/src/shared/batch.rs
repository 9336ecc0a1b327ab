use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batch processing configuration for plugin runs.
///
/// Controls how many transformed records are buffered before each `load`
/// call for the chunked and batch load strategies. Bulk runs ignore it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Number of records to buffer per load/commit cycle.
    #[serde(default = "default_commit_after")]
    pub commit_after: usize,
}

impl BatchConfig {
    /// Default number of records buffered per commit cycle.
    pub const DEFAULT_COMMIT_AFTER: usize = 10000;

    /// Creates a batch configuration with an explicit threshold.
    pub fn new(commit_after: usize) -> Self {
        Self { commit_after }
    }

    /// Validates batch configuration settings.
    ///
    /// Ensures `commit_after` is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.commit_after == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.commit_after".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            commit_after: default_commit_after(),
        }
    }
}

fn default_commit_after() -> usize {
    BatchConfig::DEFAULT_COMMIT_AFTER
}
