use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::checkpoint::ResumeCheckpoint;
use crate::coordinator::LoadContext;
use crate::error::HopperResult;
use crate::plugin::PluginDescriptor;
use crate::report::RunReport;
use crate::types::{Record, TransformedRecord};

/// The unit-of-work contract every plugin implements.
///
/// A plugin instance lives for exactly one pipeline run and is owned
/// exclusively by the executor for that run. The executor drives
/// `extract` → `transform` → `load` according to the descriptor's load
/// strategy and the run's execution mode; plugins never commit, roll back,
/// or open their own sessions.
#[async_trait]
pub trait Plugin: Send {
    /// Produces the lazy, finite sequence of records from the source.
    ///
    /// When a previous run left a durable checkpoint, it is passed as a
    /// resume hint. A plugin that cannot resume from an external position
    /// must ignore the hint and restart from the beginning; such plugins are
    /// non-resumable by documentation, not by error.
    async fn extract(
        &mut self,
        resume: Option<&ResumeCheckpoint>,
    ) -> HopperResult<BoxStream<'static, HopperResult<Record>>>;

    /// Maps one extracted record into its persist-ready form.
    ///
    /// Returning `Ok(None)` skips the record: the executor reports it
    /// per-record (with the id from [`Plugin::get_record_id`]) and continues
    /// with the rest of the dataset. Returning an error escalates and fails
    /// the whole run.
    fn transform(&mut self, record: &Record) -> HopperResult<Option<TransformedRecord>>;

    /// Persists one batch of transformed records.
    ///
    /// This is the only place allowed to mutate the store, and it must do so
    /// exclusively through the session in `ctx`. Implementations must call
    /// [`LoadContext::record_rows`] for every row affected, and return a
    /// checkpoint describing the last row processed in the batch.
    async fn load(
        &mut self,
        batch: &[TransformedRecord],
        ctx: &mut LoadContext<'_>,
    ) -> HopperResult<ResumeCheckpoint>;

    /// Returns the stable identifier of a record, used for checkpoint
    /// construction and duplicate-detection diagnostics.
    fn get_record_id(&self, record: &Record) -> Option<String>;

    /// Invoked unconditionally after every run, regardless of outcome, so
    /// plugins can clean up intermediate artifacts.
    ///
    /// The default implementation is a no-op.
    async fn on_run_complete(&mut self, _report: &RunReport) -> HopperResult<()> {
        Ok(())
    }
}

/// A plugin type that can be registered in the
/// [`crate::plugin::PluginRegistry`] by type.
///
/// `from_params` deserializes and validates the run-specific parameters into
/// a configured instance; validation failures surface as configuration
/// errors before any extraction begins.
pub trait RegisteredPlugin: Plugin + Sized + 'static {
    /// Returns the static descriptor for this plugin type.
    fn descriptor() -> PluginDescriptor;

    /// Builds a configured instance from validated parameter values.
    fn from_params(params: serde_json::Value) -> HopperResult<Self>;
}
