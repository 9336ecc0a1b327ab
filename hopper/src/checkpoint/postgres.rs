use hopper_config::shared::PgConnectionConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::prelude::FromRow;
use tracing::info;

use crate::checkpoint::{CheckpointKey, CheckpointStore, ResumeCheckpoint};
use crate::error::HopperResult;

const NUM_POOL_CONNECTIONS: u32 = 1;

/// A row from the `hopper.resume_checkpoint` table.
#[derive(Debug, FromRow)]
struct CheckpointRow {
    record_id: String,
    position: Option<i64>,
}

/// Checkpoint store backed by a Postgres table.
///
/// Checkpoints survive process restarts, which is what makes runs resumable
/// across runs of the engine. Upserts are single statements keyed by
/// (plugin name, target), so concurrent runs on distinct keys never observe
/// partial writes.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Connects to the configured database and prepares the checkpoint schema.
    pub async fn connect(config: &PgConnectionConfig) -> HopperResult<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .min_connections(NUM_POOL_CONNECTIONS)
            .connect_with(config.with_db())
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Creates the `hopper` schema and checkpoint table if they do not exist.
    ///
    /// The checkpoint table lives in its own schema to avoid cluttering the
    /// public schema of the target database.
    async fn ensure_schema(&self) -> HopperResult<()> {
        sqlx::query("create schema if not exists hopper")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            create table if not exists hopper.resume_checkpoint (
                plugin_name text not null,
                target text not null,
                record_id text not null,
                position bigint,
                updated_at timestamptz not null default now(),
                primary key (plugin_name, target)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("checkpoint schema is ready");

        Ok(())
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    async fn load_checkpoint(
        &self,
        key: &CheckpointKey,
    ) -> HopperResult<Option<ResumeCheckpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            select record_id, position
            from hopper.resume_checkpoint
            where plugin_name = $1 and target = $2
            "#,
        )
        .bind(&key.plugin)
        .bind(&key.target)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ResumeCheckpoint {
            record_id: row.record_id,
            position: row.position.map(|position| position as u64),
        }))
    }

    async fn save_checkpoint(
        &self,
        key: &CheckpointKey,
        checkpoint: &ResumeCheckpoint,
    ) -> HopperResult<()> {
        sqlx::query(
            r#"
            insert into hopper.resume_checkpoint (plugin_name, target, record_id, position)
            values ($1, $2, $3, $4)
            on conflict (plugin_name, target)
            do update set
                record_id = excluded.record_id,
                position = excluded.position,
                updated_at = now()
            "#,
        )
        .bind(&key.plugin)
        .bind(&key.target)
        .bind(&checkpoint.record_id)
        .bind(checkpoint.position.map(|position| position as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
