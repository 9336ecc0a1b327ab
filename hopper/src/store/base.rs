use std::future::Future;

use async_trait::async_trait;

use crate::error::HopperResult;
use crate::types::{TableName, TransformedRecord};

/// A transactional read/write session against the target store.
///
/// Exactly one session exists per pipeline run. Plugins never see this trait
/// directly: they receive a [`crate::coordinator::ScopedSession`] that
/// forwards the row operations but withholds [`StoreSession::commit`] and
/// [`StoreSession::rollback`], which only the executor may call.
///
/// Rows are JSON objects; keyed operations (`upsert`, `update`, `patch`,
/// `delete`) address rows through a caller-named key column that each row
/// must carry.
#[async_trait]
pub trait StoreSession: Send {
    /// Inserts the given rows. Returns the number of rows written.
    async fn insert(
        &mut self,
        table: &TableName,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64>;

    /// Inserts rows, replacing any existing row with the same key.
    async fn upsert(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64>;

    /// Replaces existing rows matched by key. Returns the number of rows
    /// that matched.
    async fn update(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64>;

    /// Merges the supplied fields into existing rows matched by key, leaving
    /// absent fields untouched.
    async fn patch(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64>;

    /// Deletes rows whose key column matches one of the given keys.
    async fn delete(
        &mut self,
        table: &TableName,
        key_column: &str,
        keys: &[serde_json::Value],
    ) -> HopperResult<u64>;

    /// Returns the rows whose key column equals the given key.
    async fn fetch(
        &mut self,
        table: &TableName,
        key_column: &str,
        key: &serde_json::Value,
    ) -> HopperResult<Vec<TransformedRecord>>;

    /// Durably commits all work since the last commit and leaves the session
    /// inside a fresh transaction.
    async fn commit(&mut self) -> HopperResult<()>;

    /// Discards all uncommitted work and leaves the session inside a fresh
    /// transaction.
    async fn rollback(&mut self) -> HopperResult<()>;
}

/// Trait for stores the engine can load transformed records into.
pub trait TargetStore {
    /// Returns the name of the store backend.
    fn name() -> &'static str;

    /// Opens the single read/write session for a run.
    fn begin_session(&self) -> impl Future<Output = HopperResult<Box<dyn StoreSession>>> + Send;
}
