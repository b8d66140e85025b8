//! Plugins shipped with the node.

pub mod joint_control;

use crate::plugin::PluginRegistry;

/// Register every built-in plugin.
pub fn register_all(registry: &mut PluginRegistry) {
    joint_control::register(registry);
}
