//! Transaction ownership and the session seam handed to plugins.
//!
//! Exactly one [`TransactionCoordinator`] exists per run. It is the only
//! place that can commit or roll back the run's store session; plugins only
//! ever see a [`ScopedSession`] through their [`LoadContext`], which forwards
//! row operations and enforces the declared-tables contract.

use crate::error::{ErrorKind, HopperResult};
use crate::hopper_error;
use crate::report::TransactionTally;
use crate::store::StoreSession;
use crate::types::{Operation, TableName, TransformedRecord};

/// Owns the single read/write session of a pipeline run.
pub struct TransactionCoordinator {
    session: Box<dyn StoreSession>,
}

impl TransactionCoordinator {
    pub fn new(session: Box<dyn StoreSession>) -> Self {
        Self { session }
    }

    /// Durably commits everything since the last commit.
    pub async fn commit(&mut self) -> HopperResult<()> {
        self.session.commit().await
    }

    /// Discards all uncommitted work.
    pub async fn rollback(&mut self) -> HopperResult<()> {
        self.session.rollback().await
    }

    /// Builds the context handed to one `load` call.
    pub fn load_context<'a>(
        &'a mut self,
        allowed_tables: &'a [TableName],
        tally: &'a mut TransactionTally,
    ) -> LoadContext<'a> {
        LoadContext {
            session: ScopedSession {
                session: self.session.as_mut(),
                allowed_tables,
            },
            tally,
            allowed_tables,
        }
    }
}

fn ensure_declared(table: &TableName, allowed_tables: &[TableName]) -> HopperResult<()> {
    if allowed_tables.contains(table) {
        return Ok(());
    }

    let declared = allowed_tables
        .iter()
        .map(|table| table.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    Err(hopper_error!(
        ErrorKind::ContractViolation,
        "Plugin touched an undeclared table",
        format!("table `{table}` is not among the declared affected tables [{declared}]")
    ))
}

/// The session view a plugin receives inside `load`.
///
/// Forwards the row operations of the underlying [`StoreSession`] but
/// withholds commit/rollback, and rejects any table that is not among the
/// plugin's declared `affected_tables`.
pub struct ScopedSession<'a> {
    session: &'a mut dyn StoreSession,
    allowed_tables: &'a [TableName],
}

impl ScopedSession<'_> {
    pub async fn insert(
        &mut self,
        table: &TableName,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        ensure_declared(table, self.allowed_tables)?;
        self.session.insert(table, rows).await
    }

    pub async fn upsert(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        ensure_declared(table, self.allowed_tables)?;
        self.session.upsert(table, key_column, rows).await
    }

    pub async fn update(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        ensure_declared(table, self.allowed_tables)?;
        self.session.update(table, key_column, rows).await
    }

    pub async fn patch(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        ensure_declared(table, self.allowed_tables)?;
        self.session.patch(table, key_column, rows).await
    }

    pub async fn delete(
        &mut self,
        table: &TableName,
        key_column: &str,
        keys: &[serde_json::Value],
    ) -> HopperResult<u64> {
        ensure_declared(table, self.allowed_tables)?;
        self.session.delete(table, key_column, keys).await
    }

    pub async fn fetch(
        &mut self,
        table: &TableName,
        key_column: &str,
        key: &serde_json::Value,
    ) -> HopperResult<Vec<TransformedRecord>> {
        ensure_declared(table, self.allowed_tables)?;
        self.session.fetch(table, key_column, key).await
    }
}

/// Everything a plugin needs inside one `load` call: the scoped session and
/// the tally-update seam.
pub struct LoadContext<'a> {
    session: ScopedSession<'a>,
    tally: &'a mut TransactionTally,
    allowed_tables: &'a [TableName],
}

impl<'a> LoadContext<'a> {
    /// Returns the session for this batch.
    pub fn session(&mut self) -> &mut ScopedSession<'a> {
        &mut self.session
    }

    /// Records rows affected on a declared table.
    ///
    /// Must be called for every row the plugin affects; the executor
    /// aggregates these counts into the final run report.
    pub fn record_rows(
        &mut self,
        table: &TableName,
        operation: Operation,
        rows: u64,
    ) -> HopperResult<()> {
        ensure_declared(table, self.allowed_tables)?;
        self.tally.record(table, operation, rows);

        Ok(())
    }
}
