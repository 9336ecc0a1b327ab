use std::collections::HashMap;

use crate::error::{ErrorKind, HopperResult};
use crate::hopper_error;
use crate::plugin::{Plugin, PluginDescriptor, RegisteredPlugin};

/// Constructor closure producing a configured plugin instance from raw
/// parameter values.
pub type PluginConstructor =
    Box<dyn Fn(serde_json::Value) -> HopperResult<Box<dyn Plugin>> + Send + Sync>;

struct PluginEntry {
    descriptor: PluginDescriptor,
    constructor: PluginConstructor,
}

/// Write-once catalog mapping plugin names to descriptors and constructors.
///
/// Built at process start through [`PluginRegistryBuilder`] and passed by
/// reference into the executor; there is no ambient global registry.
pub struct PluginRegistry {
    entries: HashMap<String, PluginEntry>,
}

impl PluginRegistry {
    /// Starts building a registry.
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder {
            entries: HashMap::new(),
        }
    }

    /// Returns the descriptor of a registered plugin.
    pub fn descriptor(&self, name: &str) -> HopperResult<&PluginDescriptor> {
        self.entries
            .get(name)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| {
                hopper_error!(
                    ErrorKind::PluginNotFound,
                    "Plugin not found",
                    format!("no plugin named `{name}` is registered")
                )
            })
    }

    /// Builds a configured instance of a registered plugin.
    ///
    /// Parameter validation happens inside the plugin's constructor; a
    /// validation failure is reported as a configuration error before any
    /// extraction begins.
    pub fn instantiate(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> HopperResult<Box<dyn Plugin>> {
        let entry = self.entries.get(name).ok_or_else(|| {
            hopper_error!(
                ErrorKind::PluginNotFound,
                "Plugin not found",
                format!("no plugin named `{name}` is registered")
            )
        })?;

        (entry.constructor)(params)
    }

    /// Returns the sorted names of all registered plugins.
    pub fn plugin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Builder for [`PluginRegistry`].
pub struct PluginRegistryBuilder {
    entries: HashMap<String, PluginEntry>,
}

impl PluginRegistryBuilder {
    /// Registers a plugin type via its [`RegisteredPlugin`] implementation.
    pub fn register<P>(self) -> HopperResult<Self>
    where
        P: RegisteredPlugin,
    {
        self.register_with(
            P::descriptor(),
            Box::new(|params| Ok(Box::new(P::from_params(params)?) as Box<dyn Plugin>)),
        )
    }

    /// Registers a plugin with an explicit descriptor and constructor.
    ///
    /// Useful when the constructor needs captured state, e.g. instrumented
    /// plugins in tests.
    pub fn register_with(
        mut self,
        descriptor: PluginDescriptor,
        constructor: PluginConstructor,
    ) -> HopperResult<Self> {
        if self.entries.contains_key(&descriptor.name) {
            return Err(hopper_error!(
                ErrorKind::PluginAlreadyRegistered,
                "Plugin already registered",
                format!("a plugin named `{}` is already registered", descriptor.name)
            ));
        }

        self.entries.insert(
            descriptor.name.clone(),
            PluginEntry {
                descriptor,
                constructor,
            },
        );

        Ok(self)
    }

    /// Finalizes the registry.
    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            entries: self.entries,
        }
    }
}
