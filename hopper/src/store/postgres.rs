use hopper_config::shared::PgConnectionConfig;
use pg_escape::{quote_identifier, quote_literal};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, pool::PoolConnection};

use async_trait::async_trait;

use crate::error::{ErrorKind, HopperResult};
use crate::hopper_error;
use crate::store::{StoreSession, TargetStore};
use crate::types::{TableName, TransformedRecord};

const NUM_POOL_CONNECTIONS: u32 = 1;

/// Target store backed by a Postgres database.
///
/// Sessions run on a dedicated connection with an explicit transaction, so a
/// run's writes become visible only on commit and a rollback discards the
/// whole in-flight batch.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to the configured target database.
    pub async fn connect(config: &PgConnectionConfig) -> HopperResult<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .min_connections(NUM_POOL_CONNECTIONS)
            .connect_with(config.with_db())
            .await?;

        Ok(Self { pool })
    }
}

impl TargetStore for PostgresStore {
    fn name() -> &'static str {
        "postgres"
    }

    async fn begin_session(&self) -> HopperResult<Box<dyn StoreSession>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("begin").execute(&mut *conn).await?;

        Ok(Box::new(PostgresSession { conn }))
    }
}

/// A session over [`PostgresStore`], pinned to one pooled connection.
struct PostgresSession {
    conn: PoolConnection<Postgres>,
}

/// Renders the schema-qualified, identifier-quoted table reference.
fn qualified_table(table: &TableName) -> String {
    format!(
        "{}.{}",
        quote_identifier(table.schema()),
        quote_identifier(table.table())
    )
}

/// Renders a JSON value as a SQL literal.
///
/// Scalars rely on Postgres' implicit casts from text; arrays and objects are
/// passed through as jsonb.
fn sql_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(value) => value.to_string(),
        serde_json::Value::Number(value) => value.to_string(),
        serde_json::Value::String(value) => quote_literal(value).to_string(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            format!("{}::jsonb", quote_literal(&value.to_string()))
        }
    }
}

/// Returns the (column, value) pairs of a row, which must be a JSON object.
fn row_fields(
    row: &TransformedRecord,
) -> HopperResult<Vec<(&String, &serde_json::Value)>> {
    let fields = row.as_object().ok_or_else(|| {
        hopper_error!(
            ErrorKind::QueryFailed,
            "Rows must be JSON objects",
            row.to_string()
        )
    })?;

    Ok(fields.iter().collect())
}

/// Returns the key value of a row for keyed operations.
fn row_key<'a>(
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
impl StoreSession for PostgresSession {
    async fn insert(
        &mut self,
        table: &TableName,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        let mut affected = 0;
        for row in rows {
            let fields = row_fields(row)?;
            let columns = fields
                .iter()
                .map(|(column, _)| quote_identifier(column).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            let values = fields
                .iter()
                .map(|(_, value)| sql_literal(value))
                .collect::<Vec<_>>()
                .join(", ");

            let sql = format!(
                "insert into {} ({columns}) values ({values})",
                qualified_table(table)
            );
            affected += sqlx::query(sql.as_str())
                .execute(&mut *self.conn)
                .await?
                .rows_affected();
        }

        Ok(affected)
    }

    async fn upsert(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        let mut affected = 0;
        for row in rows {
            row_key(row, key_column)?;
            let fields = row_fields(row)?;
            let columns = fields
                .iter()
                .map(|(column, _)| quote_identifier(column).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            let values = fields
                .iter()
                .map(|(_, value)| sql_literal(value))
                .collect::<Vec<_>>()
                .join(", ");
            let updates = fields
                .iter()
                .filter(|(column, _)| column.as_str() != key_column)
                .map(|(column, _)| {
                    let column = quote_identifier(column);
                    format!("{column} = excluded.{column}")
                })
                .collect::<Vec<_>>()
                .join(", ");

            let conflict_action = if updates.is_empty() {
                "do nothing".to_string()
            } else {
                format!("do update set {updates}")
            };
            let sql = format!(
                "insert into {} ({columns}) values ({values}) on conflict ({}) {conflict_action}",
                qualified_table(table),
                quote_identifier(key_column),
            );
            affected += sqlx::query(sql.as_str())
                .execute(&mut *self.conn)
                .await?
                .rows_affected();
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
            let key = row_key(row, key_column)?;
            let assignments = row_fields(row)?
                .iter()
                .filter(|(column, _)| column.as_str() != key_column)
                .map(|(column, value)| {
                    format!("{} = {}", quote_identifier(column), sql_literal(value))
                })
                .collect::<Vec<_>>()
                .join(", ");

            if assignments.is_empty() {
                continue;
            }

            let sql = format!(
                "update {} set {assignments} where {} = {}",
                qualified_table(table),
                quote_identifier(key_column),
                sql_literal(key),
            );
            affected += sqlx::query(sql.as_str())
                .execute(&mut *self.conn)
                .await?
                .rows_affected();
        }

        Ok(affected)
    }

    async fn patch(
        &mut self,
        table: &TableName,
        key_column: &str,
        rows: &[TransformedRecord],
    ) -> HopperResult<u64> {
        // A patch row carries only the fields it changes, which is exactly
        // what `update` renders as assignments.
        self.update(table, key_column, rows).await
    }

    async fn delete(
        &mut self,
        table: &TableName,
        key_column: &str,
        keys: &[serde_json::Value],
    ) -> HopperResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let key_list = keys
            .iter()
            .map(sql_literal)
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "delete from {} where {} in ({key_list})",
            qualified_table(table),
            quote_identifier(key_column),
        );

        Ok(sqlx::query(sql.as_str())
            .execute(&mut *self.conn)
            .await?
            .rows_affected())
    }

    async fn fetch(
        &mut self,
        table: &TableName,
        key_column: &str,
        key: &serde_json::Value,
    ) -> HopperResult<Vec<TransformedRecord>> {
        let sql = format!(
            "select row_to_json(r)::text from {} as r where {} = {}",
            qualified_table(table),
            quote_identifier(key_column),
            sql_literal(key),
        );

        let raw_rows: Vec<String> = sqlx::query_scalar(sql.as_str())
            .fetch_all(&mut *self.conn)
            .await?;

        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            rows.push(serde_json::from_str(&raw)?);
        }

        Ok(rows)
    }

    async fn commit(&mut self) -> HopperResult<()> {
        sqlx::query("commit").execute(&mut *self.conn).await?;
        sqlx::query("begin").execute(&mut *self.conn).await?;

        Ok(())
    }

    async fn rollback(&mut self) -> HopperResult<()> {
        sqlx::query("rollback").execute(&mut *self.conn).await?;
        sqlx::query("begin").execute(&mut *self.conn).await?;

        Ok(())
    }
}
