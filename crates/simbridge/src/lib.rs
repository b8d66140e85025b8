#![warn(missing_docs)]

//! Bridge between a rigid-body simulator and a message bus.
//!
//! [`SimulationNode`] loads a robot into a [`PhysicsBackend`], then on every
//! tick publishes the state of the robot's revolute joints on `joint_states`,
//! runs the configured plugins and steps the simulation once. The
//! `reset_simulation`, `pause_physics` and `unpause_physics` services control
//! it from the bus.
//!
//! # Example
//!
//! ```ignore
//! use simbridge::{BridgeConfig, PluginRegistry, SimulationNode};
//! use simbridge_bus::Bus;
//! use simbridge_physics::{shared, RapierBackend};
//!
//! let config = BridgeConfig::from_file("simbridge.toml".as_ref())?;
//! let backend = shared(RapierBackend::new());
//! let node = SimulationNode::start(config, backend, Bus::new(), PluginRegistry::builtin())?;
//! node.run(shutdown_rx).await?;
//! ```
//!
//! [`PhysicsBackend`]: simbridge_physics::PhysicsBackend

mod config;
mod error;
mod joint_table;
mod node;
mod pause;
mod plugin;
pub mod plugins;

pub use config::{BridgeConfig, DEFAULT_NODE_NAME};
pub use error::{BridgeError, PluginError};
pub use joint_table::JointTable;
pub use node::{SimulationNode, PAUSE_SERVICE, RESET_SERVICE, UNPAUSE_SERVICE};
pub use pause::PauseFlag;
pub use plugin::{Plugin, PluginContext, PluginFactory, PluginRegistry};
