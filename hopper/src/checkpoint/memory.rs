use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::checkpoint::{CheckpointKey, CheckpointStore, ResumeCheckpoint};
use crate::error::HopperResult;

/// In-memory checkpoint store for testing and development purposes.
///
/// All checkpoints are held in memory and lost when the process terminates,
/// so runs against this store are effectively non-resumable across restarts.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<HashMap<CheckpointKey, ResumeCheckpoint>>>,
}

impl MemoryCheckpointStore {
    /// Creates a new empty checkpoint store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn load_checkpoint(
        &self,
        key: &CheckpointKey,
    ) -> HopperResult<Option<ResumeCheckpoint>> {
        let inner = self.inner.lock().await;

        Ok(inner.get(key).cloned())
    }

    async fn save_checkpoint(
        &self,
        key: &CheckpointKey,
        checkpoint: &ResumeCheckpoint,
    ) -> HopperResult<()> {
        let mut inner = self.inner.lock().await;
        inner.insert(key.clone(), checkpoint.clone());

        Ok(())
    }
}
