//! Shared fixtures for pipeline integration tests: instrumented plugins, a
//! counting checkpoint store and registry helpers.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Deserialize;
use serde_json::{Value, json};

use hopper::checkpoint::memory::MemoryCheckpointStore;
use hopper::checkpoint::{CheckpointKey, CheckpointStore, ResumeCheckpoint};
use hopper::coordinator::LoadContext;
use hopper::error::{ErrorKind, HopperResult};
use hopper::hopper_error;
use hopper::plugin::{Plugin, PluginDescriptor, PluginRegistry};
use hopper::report::RunReport;
use hopper::types::{LoadStrategy, Operation, RunStatus, TableName};

/// Observable side effects of a plugin run, in order of occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginEvent {
    Extracted(u64),
    Loaded(usize),
}

#[derive(Debug, Default)]
struct ProbeInner {
    extract_calls: u64,
    resume_hints: Vec<Option<ResumeCheckpoint>>,
    load_batches: Vec<usize>,
    events: Vec<PluginEvent>,
    hook_statuses: Vec<RunStatus>,
}

/// Shared recorder that instrumented plugins report into, so tests can
/// assert on call counts, batch sizes and event ordering after a run.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    inner: Arc<Mutex<ProbeInner>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract_calls(&self) -> u64 {
        self.inner.lock().unwrap().extract_calls
    }

    pub fn resume_hints(&self) -> Vec<Option<ResumeCheckpoint>> {
        self.inner.lock().unwrap().resume_hints.clone()
    }

    pub fn load_batches(&self) -> Vec<usize> {
        self.inner.lock().unwrap().load_batches.clone()
    }

    pub fn events(&self) -> Vec<PluginEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn hook_statuses(&self) -> Vec<RunStatus> {
        self.inner.lock().unwrap().hook_statuses.clone()
    }

    fn note_extract_call(&self, resume: Option<ResumeCheckpoint>) {
        let mut inner = self.inner.lock().unwrap();
        inner.extract_calls += 1;
        inner.resume_hints.push(resume);
    }

    fn note_extracted(&self, id: u64) {
        self.inner
            .lock()
            .unwrap()
            .events
            .push(PluginEvent::Extracted(id));
    }

    fn note_loaded(&self, batch_size: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.load_batches.push(batch_size);
        inner.events.push(PluginEvent::Loaded(batch_size));
    }

    fn note_hook(&self, status: RunStatus) {
        self.inner.lock().unwrap().hook_statuses.push(status);
    }
}

/// Checkpoint store wrapper that counts durable checkpoint advances.
#[derive(Debug, Clone, Default)]
pub struct CountingCheckpointStore {
    inner: MemoryCheckpointStore,
    saves: Arc<AtomicU64>,
}

impl CountingCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for CountingCheckpointStore {
    async fn load_checkpoint(
        &self,
        key: &CheckpointKey,
    ) -> HopperResult<Option<ResumeCheckpoint>> {
        self.inner.load_checkpoint(key).await
    }

    async fn save_checkpoint(
        &self,
        key: &CheckpointKey,
        checkpoint: &ResumeCheckpoint,
    ) -> HopperResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_checkpoint(key, checkpoint).await
    }
}

pub fn numbers_table() -> TableName {
    TableName::parse("staging.numbers").unwrap()
}

pub fn rogue_table() -> TableName {
    TableName::parse("staging.other").unwrap()
}

pub fn artifacts_table() -> TableName {
    TableName::parse("staging.artifacts").unwrap()
}

/// Parameters of [`NumbersPlugin`], with failure injection knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NumbersParams {
    /// Number of records the source yields.
    pub total: u64,
    /// Fail the nth `load` call (1-based).
    pub fail_on_load_call: Option<u64>,
    /// Fail `transform` for this record id.
    pub fail_transform_at: Option<u64>,
    /// Skip this record id in `transform`.
    pub skip_at: Option<u64>,
    /// Emit record id 1 a second time at the end of the stream.
    pub emit_duplicate: bool,
    /// Whether `extract` honors the resume checkpoint.
    pub honor_resume: bool,
}

impl Default for NumbersParams {
    fn default() -> Self {
        Self {
            total: 5,
            fail_on_load_call: None,
            fail_transform_at: None,
            skip_at: None,
            emit_duplicate: false,
            honor_resume: true,
        }
    }
}

/// Insert plugin over a synthetic numeric source, instrumented through a
/// [`Probe`].
pub struct NumbersPlugin {
    params: NumbersParams,
    probe: Probe,
    load_calls_seen: u64,
}

#[async_trait]
impl Plugin for NumbersPlugin {
    async fn extract(
        &mut self,
        resume: Option<&ResumeCheckpoint>,
    ) -> HopperResult<BoxStream<'static, HopperResult<Value>>> {
        self.probe.note_extract_call(resume.cloned());

        let start = if self.params.honor_resume {
            resume
                .and_then(|checkpoint| checkpoint.record_id.parse::<u64>().ok())
                .map(|last| last + 1)
                .unwrap_or(1)
        } else {
            1
        };

        let mut ids: Vec<u64> = (start..=self.params.total).collect();
        if self.params.emit_duplicate {
            ids.push(1);
        }

        let probe = self.probe.clone();
        let stream = stream::iter(ids).map(move |id| {
            probe.note_extracted(id);
            Ok(json!({"id": id, "value": id}))
        });

        Ok(stream.boxed())
    }

    fn transform(&mut self, record: &Value) -> HopperResult<Option<Value>> {
        let id = record["id"].as_u64().unwrap_or(0);

        if Some(id) == self.params.fail_transform_at {
            return Err(hopper_error!(
                ErrorKind::TransformFailed,
                "Transform failed for record",
                id.to_string()
            ));
        }

        if Some(id) == self.params.skip_at {
            return Ok(None);
        }

        Ok(Some(json!({"id": id, "value": id * 10})))
    }

    async fn load(
        &mut self,
        batch: &[Value],
        ctx: &mut LoadContext<'_>,
    ) -> HopperResult<ResumeCheckpoint> {
        self.load_calls_seen += 1;
        self.probe.note_loaded(batch.len());

        if Some(self.load_calls_seen) == self.params.fail_on_load_call {
            return Err(hopper_error!(
                ErrorKind::LoadFailed,
                "Simulated load failure",
                format!("load call {}", self.load_calls_seen)
            ));
        }

        let table = numbers_table();
        let affected = ctx.session().insert(&table, batch).await?;
        ctx.record_rows(&table, Operation::Insert, affected)?;

        let last = batch.last().expect("load is never called with an empty batch");
        let id = last["id"].as_u64().unwrap_or(0);

        Ok(ResumeCheckpoint::with_position(id.to_string(), id))
    }

    fn get_record_id(&self, record: &Value) -> Option<String> {
        record.get("id").and_then(Value::as_u64).map(|id| id.to_string())
    }

    async fn on_run_complete(&mut self, report: &RunReport) -> HopperResult<()> {
        self.probe.note_hook(report.status);
        Ok(())
    }
}

pub fn numbers_descriptor(load_strategy: LoadStrategy) -> PluginDescriptor {
    PluginDescriptor {
        name: "numbers_loader".to_string(),
        description: "Loads a synthetic numeric dataset".to_string(),
        parameter_schema: json!({
            "type": "object",
            "properties": {
                "total": {"type": "integer", "minimum": 0}
            }
        }),
        operation: Operation::Insert,
        affected_tables: vec![numbers_table()],
        load_strategy,
        supports_preprocess: false,
    }
}

/// Builds an instrumented [`NumbersPlugin`] from raw parameter values, for
/// custom registry setups.
pub fn numbers_plugin(params: Value, probe: Probe) -> HopperResult<Box<dyn Plugin>> {
    let params: NumbersParams = serde_json::from_value(params)?;

    Ok(Box::new(NumbersPlugin {
        params,
        probe,
        load_calls_seen: 0,
    }))
}

/// Builds a registry holding one instrumented [`NumbersPlugin`].
pub fn numbers_registry(load_strategy: LoadStrategy, probe: Probe) -> Arc<PluginRegistry> {
    let registry = PluginRegistry::builder()
        .register_with(
            numbers_descriptor(load_strategy),
            Box::new(move |params| numbers_plugin(params, probe.clone())),
        )
        .unwrap()
        .build();

    Arc::new(registry)
}

/// Plugin that writes to a table it never declared; used to exercise the
/// contract-violation boundary.
pub struct RoguePlugin {
    params: NumbersParams,
    probe: Probe,
}

#[async_trait]
impl Plugin for RoguePlugin {
    async fn extract(
        &mut self,
        resume: Option<&ResumeCheckpoint>,
    ) -> HopperResult<BoxStream<'static, HopperResult<Value>>> {
        self.probe.note_extract_call(resume.cloned());
        let total = self.params.total;
        Ok(stream::iter((1..=total).map(|id| Ok(json!({"id": id})))).boxed())
    }

    fn transform(&mut self, record: &Value) -> HopperResult<Option<Value>> {
        Ok(Some(record.clone()))
    }

    async fn load(
        &mut self,
        batch: &[Value],
        ctx: &mut LoadContext<'_>,
    ) -> HopperResult<ResumeCheckpoint> {
        self.probe.note_loaded(batch.len());

        // Writes outside the declared table set.
        let affected = ctx.session().insert(&rogue_table(), batch).await?;
        ctx.record_rows(&rogue_table(), Operation::Insert, affected)?;

        Ok(ResumeCheckpoint::new("unreachable"))
    }

    fn get_record_id(&self, record: &Value) -> Option<String> {
        record.get("id").and_then(Value::as_u64).map(|id| id.to_string())
    }

    async fn on_run_complete(&mut self, report: &RunReport) -> HopperResult<()> {
        self.probe.note_hook(report.status);
        Ok(())
    }
}

pub fn rogue_registry(probe: Probe) -> Arc<PluginRegistry> {
    let descriptor = PluginDescriptor {
        name: "rogue_loader".to_string(),
        description: "Writes to an undeclared table".to_string(),
        parameter_schema: json!({"type": "object"}),
        operation: Operation::Insert,
        affected_tables: vec![numbers_table()],
        load_strategy: LoadStrategy::Chunked,
        supports_preprocess: false,
    };

    let registry = PluginRegistry::builder()
        .register_with(
            descriptor,
            Box::new(move |params| {
                let params: NumbersParams = serde_json::from_value(params)?;
                Ok(Box::new(RoguePlugin {
                    params,
                    probe: probe.clone(),
                }) as Box<dyn Plugin>)
            }),
        )
        .unwrap()
        .build();

    Arc::new(registry)
}

/// Parameters of [`ArtifactPlugin`].
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactParams {
    pub total: u64,
    pub artifact_path: PathBuf,
}

/// Preprocess-capable plugin that materializes a line-per-record artifact
/// file as a side effect of `transform`.
pub struct ArtifactPlugin {
    params: ArtifactParams,
    probe: Probe,
}

#[async_trait]
impl Plugin for ArtifactPlugin {
    async fn extract(
        &mut self,
        resume: Option<&ResumeCheckpoint>,
    ) -> HopperResult<BoxStream<'static, HopperResult<Value>>> {
        self.probe.note_extract_call(resume.cloned());
        let total = self.params.total;
        Ok(stream::iter((1..=total).map(|id| Ok(json!({"id": id})))).boxed())
    }

    fn transform(&mut self, record: &Value) -> HopperResult<Option<Value>> {
        use std::io::Write;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.params.artifact_path)?;
        writeln!(file, "{record}")?;

        Ok(Some(record.clone()))
    }

    async fn load(
        &mut self,
        batch: &[Value],
        ctx: &mut LoadContext<'_>,
    ) -> HopperResult<ResumeCheckpoint> {
        self.probe.note_loaded(batch.len());

        let table = artifacts_table();
        let affected = ctx.session().insert(&table, batch).await?;
        ctx.record_rows(&table, Operation::Insert, affected)?;

        let last = batch.last().expect("load is never called with an empty batch");
        let id = last["id"].as_u64().unwrap_or(0);

        Ok(ResumeCheckpoint::new(id.to_string()))
    }

    fn get_record_id(&self, record: &Value) -> Option<String> {
        record.get("id").and_then(Value::as_u64).map(|id| id.to_string())
    }

    async fn on_run_complete(&mut self, report: &RunReport) -> HopperResult<()> {
        self.probe.note_hook(report.status);
        Ok(())
    }
}

pub fn artifact_registry(probe: Probe) -> Arc<PluginRegistry> {
    let descriptor = PluginDescriptor {
        name: "artifact_loader".to_string(),
        description: "Materializes a cleaned artifact before loading".to_string(),
        parameter_schema: json!({
            "type": "object",
            "properties": {
                "total": {"type": "integer"},
                "artifact_path": {"type": "string"}
            },
            "required": ["total", "artifact_path"]
        }),
        operation: Operation::Insert,
        affected_tables: vec![artifacts_table()],
        load_strategy: LoadStrategy::Chunked,
        supports_preprocess: true,
    };

    let registry = PluginRegistry::builder()
        .register_with(
            descriptor,
            Box::new(move |params| {
                let params: ArtifactParams = serde_json::from_value(params)?;
                Ok(Box::new(ArtifactPlugin {
                    params,
                    probe: probe.clone(),
                }) as Box<dyn Plugin>)
            }),
        )
        .unwrap()
        .build();

    Arc::new(registry)
}
