use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, HopperResult};
use crate::hopper_error;
use crate::store::{StoreSession, TargetStore};
use crate::types::{TableName, TransformedRecord};

/// Inner state of [`MemoryStore`]: the committed rows per table.
#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableName, Vec<TransformedRecord>>,
}

/// In-memory target store for testing and development purposes.
///
/// [`MemoryStore`] emulates transactional sessions: a session works on a
/// private copy of every table it touches and only folds that copy back into
/// the shared state on commit, so rollbacks and non-committing runs leave the
/// store untouched. All data is lost when the process terminates.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the committed rows of a table.
    ///
    /// Useful for verifying store contents in tests.
    pub async fn table_rows(&self, table: &TableName) -> Vec<TransformedRecord> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).cloned().unwrap_or_default()
    }

    /// Returns the committed row count of a table.
    pub async fn row_count(&self, table: &TableName) -> usize {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    /// Returns the committed row count across all tables.
    pub async fn total_rows(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.tables.values().map(|rows| rows.len()).sum()
    }
}

impl TargetStore for MemoryStore {
    fn name() -> &'static str {
        "memory"
    }

    async fn begin_session(&self) -> HopperResult<Box<dyn StoreSession>> {
        Ok(Box::new(MemorySession {
            store: self.inner.clone(),
            working: HashMap::new(),
        }))
    }
}

/// A session over [`MemoryStore`].
///
/// `working` holds the session-private copies of touched tables; dropping the
/// session without committing discards them.
#[derive(Debug)]
struct MemorySession {
    store: Arc<Mutex<Inner>>,
    working: HashMap<TableName, Vec<TransformedRecord>>,
}

impl MemorySession {
    async fn working_table(&mut self, table: &TableName) -> &mut Vec<TransformedRecord> {
        if !self.working.contains_key(table) {
            let committed = {
                let inner = self.store.lock().await;
                inner.tables.get(table).cloned().unwrap_or_default()
            };
            self.working.insert(table.clone(), committed);
        }

        self.working
            .get_mut(table)
            .expect("working copy was just inserted")
    }
}

fn key_of<'a>(
    row: &'a TransformedRecord,
    key_column: &str,
) -> HopperResult<&'a serde_json::Value> {
    row.get(key_column).ok_or_else(|| {
        hopper_error!(
            ErrorKind::QueryFailed,
            "Row is missing its key column",
            format!("expected key column `{key_column}` in row `{row}`")
        )
    })
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn insert(
        &mut self,
        table: &TableName,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        let working = self.working_table(table).await;
        working.extend(rows.iter().cloned());

        Ok(rows.len() as u64)
    }

    async fn upsert(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        let mut affected = 0;
        for row in rows {
            let key = key_of(row, key_column)?.clone();
            let working = self.working_table(table).await;

            match working
                .iter_mut()
                .find(|existing| existing.get(key_column) == Some(&key))
            {
                Some(existing) => *existing = row.clone(),
                None => working.push(row.clone()),
            }
            affected += 1;
        }

        Ok(affected)
    }

    async fn update(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        let mut affected = 0;
        for row in rows {
            let key = key_of(row, key_column)?.clone();
            let working = self.working_table(table).await;

            for existing in working
                .iter_mut()
                .filter(|existing| existing.get(key_column) == Some(&key))
            {
                *existing = row.clone();
                affected += 1;
            }
        }

        Ok(affected)
    }

    async fn patch(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        let mut affected = 0;
        for row in rows {
            let key = key_of(row, key_column)?.clone();
            let patch = row.as_object().ok_or_else(|| {
                hopper_error!(
                    ErrorKind::QueryFailed,
                    "Patch rows must be JSON objects",
                    row.to_string()
                )
            })?;

            let working = self.working_table(table).await;
            for existing in working
                .iter_mut()
                .filter(|existing| existing.get(key_column) == Some(&key))
            {
                if let Some(fields) = existing.as_object_mut() {
                    for (field, value) in patch {
                        fields.insert(field.clone(), value.clone());
                    }
                    affected += 1;
                }
            }
        }

        Ok(affected)
    }

    async fn delete(
        &mut self,
        table: &TableName,
        key_column: &str,
        keys: &[serde_json::Value],
    ) -> HopperResult<u64> {
        let working = self.working_table(table).await;
        let before = working.len();
        working.retain(|existing| {
            existing
                .get(key_column)
                .map(|key| !keys.contains(key))
                .unwrap_or(true)
        });

        Ok((before - working.len()) as u64)
    }

    async fn fetch(
        &mut self,
        table: &TableName,
        key_column: &str,
        key: &serde_json::Value,
    ) -> HopperResult<Vec<TransformedRecord>> {
        let working = self.working_table(table).await;

        Ok(working
            .iter()
            .filter(|existing| existing.get(key_column) == Some(key))
            .cloned()
            .collect())
    }

    async fn commit(&mut self) -> HopperResult<()> {
        let mut inner = self.store.lock().await;
        for (table, rows) in self.working.drain() {
            inner.tables.insert(table, rows);
        }

        Ok(())
    }

    async fn rollback(&mut self) -> HopperResult<()> {
        self.working.clear();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> TableName {
        TableName::parse("staging.numbers").unwrap()
    }

    #[tokio::test]
    async fn uncommitted_work_is_invisible_and_discardable() {
        let store = MemoryStore::new();
        let mut session = store.begin_session().await.unwrap();

        session
            .insert(&table(), &[json!({"id": 1}), json!({"id": 2})])
            .await
            .unwrap();

        // Nothing visible before commit.
        assert_eq!(store.row_count(&table()).await, 0);

        session.rollback().await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(store.row_count(&table()).await, 0);
    }

    #[tokio::test]
    async fn commit_makes_rows_visible_and_starts_fresh() {
        let store = MemoryStore::new();
        let mut session = store.begin_session().await.unwrap();

        session.insert(&table(), &[json!({"id": 1})]).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(store.row_count(&table()).await, 1);

        // Work after a commit is again invisible until the next commit.
        session.insert(&table(), &[json!({"id": 2})]).await.unwrap();
        assert_eq!(store.row_count(&table()).await, 1);

        session.rollback().await.unwrap();
        assert_eq!(store.row_count(&table()).await, 1);
    }

    #[tokio::test]
    async fn upsert_replaces_matching_rows() {
        let store = MemoryStore::new();
        let mut session = store.begin_session().await.unwrap();

        session
            .insert(&table(), &[json!({"id": 1, "value": "old"})])
            .await
            .unwrap();
        let affected = session
            .upsert(
                &table(),
                "id",
                &[json!({"id": 1, "value": "new"}), json!({"id": 2, "value": "x"})],
            )
            .await
            .unwrap();
        session.commit().await.unwrap();

        assert_eq!(affected, 2);
        let rows = store.table_rows(&table()).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["value"], "new");
    }

    #[tokio::test]
    async fn patch_merges_only_supplied_fields() {
        let store = MemoryStore::new();
        let mut session = store.begin_session().await.unwrap();

        session
            .insert(&table(), &[json!({"id": 1, "kept": true, "value": "old"})])
            .await
            .unwrap();
        let affected = session
            .patch(&table(), "id", &[json!({"id": 1, "value": "new"})])
            .await
            .unwrap();
        session.commit().await.unwrap();

        assert_eq!(affected, 1);
        let rows = store.table_rows(&table()).await;
        assert_eq!(rows[0], json!({"id": 1, "kept": true, "value": "new"}));
    }

    #[tokio::test]
    async fn delete_removes_matching_keys() {
        let store = MemoryStore::new();
        let mut session = store.begin_session().await.unwrap();

        session
            .insert(
                &table(),
                &[json!({"id": 1}), json!({"id": 2}), json!({"id": 3})],
            )
            .await
            .unwrap();
        let affected = session
            .delete(&table(), "id", &[json!(1), json!(3)])
            .await
            .unwrap();
        session.commit().await.unwrap();

        assert_eq!(affected, 2);
        assert_eq!(store.table_rows(&table()).await, vec![json!({"id": 2})]);
    }

    #[tokio::test]
    async fn keyed_operation_rejects_rows_without_key() {
        let store = MemoryStore::new();
        let mut session = store.begin_session().await.unwrap();

        let result = session
            .upsert(&table(), "id", &[json!({"value": "no key"})])
            .await;
        assert!(result.is_err());
    }
}
