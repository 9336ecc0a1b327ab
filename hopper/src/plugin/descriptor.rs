use serde::Serialize;

use crate::types::{LoadStrategy, Operation, TableName};

/// Static catalog entry describing one plugin.
///
/// Created once at registration and immutable for the process lifetime. The
/// executor relies on the descriptor — not on the instance — for everything
/// it must know ahead of execution: the declared operation, the tables the
/// plugin is allowed to touch, the batching strategy and whether preprocess
/// runs are supported.
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    /// Unique plugin name used for registry lookup and checkpoint keys.
    pub name: String,
    /// Human-readable description surfaced by registry introspection.
    pub description: String,
    /// JSON schema of the plugin's parameter model, for CLI/introspection
    /// surfaces. Parameter validation itself happens when the plugin is
    /// instantiated from its typed parameter struct.
    pub parameter_schema: serde_json::Value,
    /// The store operation this plugin performs.
    pub operation: Operation,
    /// Tables the plugin is allowed to touch during `load`.
    pub affected_tables: Vec<TableName>,
    /// Batching policy for this plugin's loads.
    pub load_strategy: LoadStrategy,
    /// Whether the plugin supports preprocess-mode runs.
    pub supports_preprocess: bool,
}
