//! The pipeline executor.
//!
//! Drives extract → transform → load cycles for one plugin run according to
//! the plugin's declared load strategy and the requested execution mode,
//! enforces the commit policy, aggregates tallies, advances the resume
//! checkpoint and owns the single top-level failure boundary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use hopper_config::shared::BatchConfig;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bail;
use crate::checkpoint::{CheckpointKey, CheckpointStore, ResumeCheckpoint};
use crate::coordinator::TransactionCoordinator;
use crate::error::{ErrorKind, HopperResult};
use crate::hopper_error;
use crate::plugin::{Plugin, PluginDescriptor, PluginRegistry};
use crate::report::{RetryDisposition, RunReport, TransactionTally};
use crate::store::TargetStore;
use crate::types::{
    LoadStrategy, Operation, Record, RunMode, RunStatus, TableName, TransformedRecord,
};

/// The invocation surface for one pipeline run.
///
/// Assembled by a thin CLI/runner: plugin name, execution mode, batching
/// settings, the logical target the checkpoint is keyed by, and the
/// plugin-specific parameters validated when the plugin is instantiated.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Registered name of the plugin to run.
    pub plugin: String,
    /// Execution mode, fixed for the duration of the run.
    pub mode: RunMode,
    /// Batching settings; `commit_after` is ignored for bulk plugins.
    pub batch: BatchConfig,
    /// Logical target identifier used to key the resume checkpoint.
    pub target: String,
    /// Plugin-specific parameters.
    pub params: serde_json::Value,
    /// Caller-provided run identifier; generated when absent.
    pub run_id: Option<String>,
}

impl RunRequest {
    pub fn new(plugin: impl Into<String>, mode: RunMode) -> Self {
        Self {
            plugin: plugin.into(),
            mode,
            batch: BatchConfig::default(),
            target: "default".to_string(),
            params: serde_json::Value::Object(serde_json::Map::new()),
            run_id: None,
        }
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Mutable run state accumulated while a run executes.
///
/// Kept separate from the final report so that a failing run still reports
/// the progress it durably made (committed tallies, advanced checkpoint).
#[derive(Debug, Default)]
struct RunProgress {
    tally: TransactionTally,
    checkpoint: Option<ResumeCheckpoint>,
    records_extracted: u64,
    records_skipped: u64,
    duplicate_records: u64,
    load_calls: u64,
    materialized: bool,
}

/// Run-scoped immutable context threaded through the strategy loops.
struct RunContext<'a> {
    descriptor: &'a PluginDescriptor,
    request: &'a RunRequest,
    run_id: &'a str,
    key: CheckpointKey,
}

/// The pipeline executor.
///
/// Generic over the checkpoint store and the target store, mirroring how the
/// two collaborators are injected rather than reached for globally. One
/// executor can serve many sequential runs; each run gets its own plugin
/// instance and its own store session.
pub struct Pipeline<C, T> {
    registry: Arc<PluginRegistry>,
    checkpoint_store: C,
    target_store: T,
}

impl<C, T> Pipeline<C, T>
where
    C: CheckpointStore + Send + Sync,
    T: TargetStore + Send + Sync,
{
    pub fn new(registry: Arc<PluginRegistry>, checkpoint_store: C, target_store: T) -> Self {
        Self {
            registry,
            checkpoint_store,
            target_store,
        }
    }

    /// Executes one pipeline run to completion.
    ///
    /// This method owns the top-level failure boundary: any error is logged
    /// with full context, the in-flight batch is rolled back, the post-run
    /// hook still fires, and the failure is returned inside the report
    /// instead of being propagated.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(generate_run_id);

        info!(
            run_id = %run_id,
            plugin = %request.plugin,
            mode = %request.mode,
            target = %request.target,
            commit_after = request.batch.commit_after,
            status = %RunStatus::Running,
            "starting pipeline run"
        );

        let mut progress = RunProgress::default();

        let (descriptor, mut plugin) = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(err) => {
                error!(run_id = %run_id, plugin = %request.plugin, "pipeline run failed during configuration: {err}");
                return build_report(
                    &request,
                    run_id,
                    started_at,
                    started,
                    RunStatus::Failed,
                    progress,
                    None,
                    Some(err.to_string()),
                );
            }
        };

        let ctx = RunContext {
            descriptor: &descriptor,
            request: &request,
            run_id: &run_id,
            key: CheckpointKey::new(descriptor.name.clone(), request.target.clone()),
        };

        let result = self.execute(&ctx, plugin.as_mut(), &mut progress).await;

        let (status, retry, error_detail) = match result {
            Ok(()) => (RunStatus::Succeeded, None, None),
            Err(err) => {
                error!(run_id = %run_id, plugin = %request.plugin, "pipeline run failed: {err}");
                let retry = if descriptor.operation == Operation::Delete {
                    RetryDisposition::Manual
                } else {
                    RetryDisposition::Resumable
                };
                (RunStatus::Failed, Some(retry), Some(err.to_string()))
            }
        };

        if status == RunStatus::Succeeded
            && request.mode.needs_session()
            && progress.load_calls > 0
            && progress.tally.is_empty()
        {
            warn!(
                run_id = %run_id,
                "no transaction counts were recorded in load(); implementations must call \
                 record_rows for every affected row"
            );
        }

        let report = build_report(
            &request,
            run_id.clone(),
            started_at,
            started,
            status,
            progress,
            retry,
            error_detail,
        );

        // Cleanup always happens, no matter how the run ended.
        if let Err(hook_err) = plugin.on_run_complete(&report).await {
            warn!(run_id = %run_id, "post-run hook failed: {hook_err}");
        }

        log_outcome(&report);

        report
    }

    /// Resolves the descriptor and builds the plugin instance.
    ///
    /// Everything here surfaces before extraction begins; a failure means no
    /// plugin instance ever existed, so the post-run hook is not invoked.
    fn prepare(
        &self,
        request: &RunRequest,
    ) -> HopperResult<(PluginDescriptor, Box<dyn Plugin>)> {
        let descriptor = self.registry.descriptor(&request.plugin)?.clone();

        if descriptor.load_strategy != LoadStrategy::Bulk {
            request.batch.validate()?;
        }

        if request.mode == RunMode::Preprocess && !descriptor.supports_preprocess {
            bail!(
                ErrorKind::ConfigError,
                "Preprocess mode not supported",
                format!(
                    "plugin `{}` does not declare preprocess support",
                    descriptor.name
                )
            );
        }

        let plugin = self
            .registry
            .instantiate(&request.plugin, request.params.clone())?;

        Ok((descriptor, plugin))
    }

    /// Opens the session (when the mode needs one), dispatches the strategy
    /// loop, and settles the session at run end.
    async fn execute(
        &self,
        ctx: &RunContext<'_>,
        plugin: &mut dyn Plugin,
        progress: &mut RunProgress,
    ) -> HopperResult<()> {
        let resume = self.checkpoint_store.load_checkpoint(&ctx.key).await?;
        if let Some(resume) = &resume {
            info!(
                run_id = ctx.run_id,
                record_id = %resume.record_id,
                "resuming from previous checkpoint"
            );
        }

        let mut coordinator = if ctx.request.mode.needs_session() {
            let session = self.target_store.begin_session().await?;
            Some(TransactionCoordinator::new(session))
        } else {
            None
        };

        let result = self
            .drive(ctx, plugin, resume, &mut coordinator, progress)
            .await;

        if let Some(coordinator) = coordinator.as_mut() {
            match &result {
                Ok(()) if ctx.request.mode == RunMode::NonCommit => {
                    coordinator.rollback().await?;
                    info!(run_id = ctx.run_id, "session rolled back at run end");
                }
                Ok(()) => {}
                Err(_) => {
                    // Committed batches stay; only the in-flight batch is discarded.
                    if let Err(rollback_err) = coordinator.rollback().await {
                        warn!(
                            run_id = ctx.run_id,
                            "failed to roll back in-flight batch: {rollback_err}"
                        );
                    }
                }
            }
        }

        result
    }

    async fn drive(
        &self,
        ctx: &RunContext<'_>,
        plugin: &mut dyn Plugin,
        resume: Option<ResumeCheckpoint>,
        coordinator: &mut Option<TransactionCoordinator>,
        progress: &mut RunProgress,
    ) -> HopperResult<()> {
        if ctx.request.mode == RunMode::Preprocess {
            return self.run_preprocess(ctx, plugin, resume, progress).await;
        }

        match ctx.descriptor.load_strategy {
            LoadStrategy::Chunked => {
                self.run_chunked(ctx, plugin, resume, coordinator, progress)
                    .await
            }
            LoadStrategy::Bulk => {
                self.run_bulk(ctx, plugin, resume, coordinator, progress)
                    .await
            }
            LoadStrategy::Batch => {
                self.run_batch(ctx, plugin, resume, coordinator, progress)
                    .await
            }
        }
    }

    /// Chunked strategy: transform record by record, flush whenever the
    /// buffer reaches `commit_after`, and finish with the partial remainder.
    ///
    /// Peak memory is bounded by one buffer and loads happen while
    /// extraction is still in progress.
    async fn run_chunked(
        &self,
        ctx: &RunContext<'_>,
        plugin: &mut dyn Plugin,
        resume: Option<ResumeCheckpoint>,
        coordinator: &mut Option<TransactionCoordinator>,
        progress: &mut RunProgress,
    ) -> HopperResult<()> {
        let commit_after = ctx.request.batch.commit_after;
        let mut stream = plugin.extract(resume.as_ref()).await?;
        let mut seen_ids = HashSet::new();
        let mut buffer: Vec<TransformedRecord> = Vec::with_capacity(commit_after);

        while let Some(record) = stream.next().await {
            let record = record?;
            observe_record(ctx, plugin, &record, &mut seen_ids, progress);

            if let Some(transformed) = transform_record(ctx, plugin, &record, progress)? {
                buffer.push(transformed);
            }

            if buffer.len() >= commit_after {
                self.flush_batch(ctx, plugin, &buffer, coordinator, progress)
                    .await?;
                buffer.clear();
            }
        }

        self.flush_batch(ctx, plugin, &buffer, coordinator, progress)
            .await
    }

    /// Bulk strategy: drain and transform everything, then issue exactly one
    /// load with the entire transformed set.
    async fn run_bulk(
        &self,
        ctx: &RunContext<'_>,
        plugin: &mut dyn Plugin,
        resume: Option<ResumeCheckpoint>,
        coordinator: &mut Option<TransactionCoordinator>,
        progress: &mut RunProgress,
    ) -> HopperResult<()> {
        let dataset = self.drain_and_transform(ctx, plugin, resume, progress).await?;

        self.flush_batch(ctx, plugin, &dataset, coordinator, progress)
            .await
    }

    /// Batch strategy: extract and transform run to completion first, then
    /// the transformed set is loaded in `commit_after`-sized partitions.
    async fn run_batch(
        &self,
        ctx: &RunContext<'_>,
        plugin: &mut dyn Plugin,
        resume: Option<ResumeCheckpoint>,
        coordinator: &mut Option<TransactionCoordinator>,
        progress: &mut RunProgress,
    ) -> HopperResult<()> {
        let dataset = self.drain_and_transform(ctx, plugin, resume, progress).await?;

        for chunk in dataset.chunks(ctx.request.batch.commit_after) {
            self.flush_batch(ctx, plugin, chunk, coordinator, progress)
                .await?;
        }

        Ok(())
    }

    /// Preprocess mode: extract and transform only, so the plugin can
    /// materialize its intermediate artifact; the store is never touched.
    async fn run_preprocess(
        &self,
        ctx: &RunContext<'_>,
        plugin: &mut dyn Plugin,
        resume: Option<ResumeCheckpoint>,
        progress: &mut RunProgress,
    ) -> HopperResult<()> {
        let dataset = self.drain_and_transform(ctx, plugin, resume, progress).await?;

        progress.materialized = true;
        info!(
            run_id = ctx.run_id,
            records = dataset.len(),
            "preprocess materialization complete"
        );

        Ok(())
    }

    /// Fully drains the extraction stream and transforms every record.
    async fn drain_and_transform(
        &self,
        ctx: &RunContext<'_>,
        plugin: &mut dyn Plugin,
        resume: Option<ResumeCheckpoint>,
        progress: &mut RunProgress,
    ) -> HopperResult<Vec<TransformedRecord>> {
        let mut stream = plugin.extract(resume.as_ref()).await?;
        let mut seen_ids = HashSet::new();
        let mut dataset = Vec::new();

        while let Some(record) = stream.next().await {
            let record = record?;
            observe_record(ctx, plugin, &record, &mut seen_ids, progress);

            if let Some(transformed) = transform_record(ctx, plugin, &record, progress)? {
                dataset.push(transformed);
            }
        }

        Ok(dataset)
    }

    /// Loads one batch according to the mode's commit policy.
    ///
    /// In dry-run mode the batch is counted instead of loaded. In commit
    /// mode the session is committed after the load and only then is the
    /// returned checkpoint made durable.
    async fn flush_batch(
        &self,
        ctx: &RunContext<'_>,
        plugin: &mut dyn Plugin,
        batch: &[TransformedRecord],
        coordinator: &mut Option<TransactionCoordinator>,
        progress: &mut RunProgress,
    ) -> HopperResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        debug!(
            run_id = ctx.run_id,
            batch_size = batch.len(),
            mode = %ctx.request.mode,
            "flushing batch"
        );

        if ctx.request.mode == RunMode::DryRun {
            progress.tally.record(
                &dry_run_table(ctx.descriptor),
                ctx.descriptor.operation,
                batch.len() as u64,
            );
            return Ok(());
        }

        let coordinator = coordinator.as_mut().ok_or_else(|| {
            hopper_error!(
                ErrorKind::InvalidState,
                "No session available for load",
                format!("mode `{}` opened no session", ctx.request.mode)
            )
        })?;

        let checkpoint = {
            let mut load_ctx =
                coordinator.load_context(&ctx.descriptor.affected_tables, &mut progress.tally);
            plugin.load(batch, &mut load_ctx).await?
        };
        progress.load_calls += 1;

        if ctx.request.mode == RunMode::Commit {
            coordinator.commit().await?;
            self.checkpoint_store
                .save_checkpoint(&ctx.key, &checkpoint)
                .await?;
            debug!(
                run_id = ctx.run_id,
                record_id = %checkpoint.record_id,
                "batch committed and checkpoint advanced"
            );
        }
        progress.checkpoint = Some(checkpoint);

        Ok(())
    }
}

/// Tracks duplicate record ids for diagnostics.
fn observe_record(
    ctx: &RunContext<'_>,
    plugin: &dyn Plugin,
    record: &Record,
    seen_ids: &mut HashSet<String>,
    progress: &mut RunProgress,
) {
    progress.records_extracted += 1;

    if let Some(id) = plugin.get_record_id(record) {
        if !seen_ids.insert(id.clone()) {
            progress.duplicate_records += 1;
            warn!(
                run_id = ctx.run_id,
                record_id = %id,
                "duplicate record id encountered"
            );
        }
    }
}

/// Applies `transform` to one record under the skip policy: `Ok(None)`
/// discards only that record, an error aborts the run.
fn transform_record(
    ctx: &RunContext<'_>,
    plugin: &mut dyn Plugin,
    record: &Record,
    progress: &mut RunProgress,
) -> HopperResult<Option<TransformedRecord>> {
    let transformed = plugin.transform(record)?;

    if transformed.is_none() {
        progress.records_skipped += 1;
        let record_id = plugin.get_record_id(record);
        debug!(
            run_id = ctx.run_id,
            record_id = record_id.as_deref().unwrap_or("<unknown>"),
            "record skipped by transform"
        );
    }

    Ok(transformed)
}

/// Table that dry-run tallies are attributed to: the single declared table
/// when there is exactly one, otherwise a synthetic placeholder.
fn dry_run_table(descriptor: &PluginDescriptor) -> TableName {
    if descriptor.affected_tables.len() == 1 {
        descriptor.affected_tables[0].clone()
    } else {
        TableName::parse("dry_run.simulated").expect("placeholder name is schema-qualified")
    }
}

fn generate_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_uppercase()
}

#[allow(clippy::too_many_arguments)]
fn build_report(
    request: &RunRequest,
    run_id: String,
    started_at: chrono::DateTime<Utc>,
    started: Instant,
    status: RunStatus,
    progress: RunProgress,
    retry: Option<RetryDisposition>,
    error: Option<String>,
) -> RunReport {
    RunReport {
        run_id,
        plugin: request.plugin.clone(),
        mode: request.mode,
        status,
        tally: progress.tally,
        checkpoint: progress.checkpoint,
        records_extracted: progress.records_extracted,
        records_skipped: progress.records_skipped,
        duplicate_records: progress.duplicate_records,
        load_calls: progress.load_calls,
        started_at,
        elapsed: started.elapsed(),
        materialized: progress.materialized,
        retry,
        error,
    }
}

/// Emits the final status block of a run.
fn log_outcome(report: &RunReport) {
    for (operation, table, count) in report.tally.entries() {
        info!(
            run_id = %report.run_id,
            "{operation}: {count} row(s) affected in {table}"
        );
    }

    match report.status {
        RunStatus::Succeeded => {
            info!(
                run_id = %report.run_id,
                plugin = %report.plugin,
                mode = %report.mode,
                status = %report.status,
                total_rows = report.tally.total(),
                records_extracted = report.records_extracted,
                records_skipped = report.records_skipped,
                load_calls = report.load_calls,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "pipeline run finished"
            );
        }
        _ => {
            error!(
                run_id = %report.run_id,
                plugin = %report.plugin,
                mode = %report.mode,
                status = %report.status,
                error = report.error.as_deref().unwrap_or("<none>"),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "pipeline run finished"
            );
        }
    }
}
