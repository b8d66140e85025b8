//! Error types for the simulation node and its plugins.

use std::path::PathBuf;

use simbridge_bus::BusError;
use simbridge_physics::PhysicsError;
use thiserror::Error;

/// Errors that stop the node from starting or running.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A mandatory parameter was not set.
    #[error("Mandatory param {0} not set")]
    MissingParam(&'static str),

    /// A parameter is out of range.
    #[error("Invalid param {name}: {reason}")]
    InvalidParam {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`BridgeConfig`](crate::BridgeConfig).
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// No factory is registered for a configured plugin.
    #[error("No plugin class {class} in module {module}")]
    UnknownPlugin {
        /// Configured module.
        module: String,
        /// Configured class.
        class: String,
    },

    /// A plugin failed to construct or execute.
    #[error("Plugin {module}.{class}: {source}")]
    Plugin {
        /// Plugin module.
        module: String,
        /// Plugin class.
        class: String,
        /// Underlying error.
        source: PluginError,
    },

    /// Physics backend failure.
    #[error("Physics error: {0}")]
    Physics(#[from] PhysicsError),

    /// Messaging failure.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Errors raised by plugins.
#[derive(Error, Debug)]
pub enum PluginError {
    /// Physics backend failure.
    #[error("Physics error: {0}")]
    Physics(#[from] PhysicsError),

    /// Messaging failure.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Anything else.
    #[error("{0}")]
    Failed(String),
}
