//! Plugin contract and the compile-time plugin registry.
//!
//! A plugin is constructed once per loaded robot and its
//! [`execute`](Plugin::execute) runs once per unpaused tick, between
//! publishing joint state and stepping the physics. Plugins are looked up by
//! `(module, class)` names taken from the configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use simbridge_bus::Bus;
use simbridge_physics::{RobotHandle, SharedBackend};

use crate::error::PluginError;
use crate::joint_table::JointTable;

/// Per-tick extension hook.
pub trait Plugin: Send {
    /// Do this tick's work.
    fn execute(&mut self) -> Result<(), PluginError>;
}

/// What a plugin receives at construction.
#[derive(Clone)]
pub struct PluginContext {
    /// The simulator.
    pub backend: SharedBackend,
    /// The loaded robot.
    pub robot: RobotHandle,
    /// Revolute joints of the robot.
    pub joints: Arc<JointTable>,
    /// Messaging bus for plugin topics.
    pub bus: Bus,
}

/// Builds one plugin instance.
pub type PluginFactory =
    Box<dyn Fn(&PluginContext) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync>;

/// Plugin factories by `(module, class)`.
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<(String, String), PluginFactory>,
}

impl PluginRegistry {
    /// Registry without any plugin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every plugin shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_all(&mut registry);
        registry
    }

    /// Add or replace a factory.
    pub fn register<F>(&mut self, module: &str, class: &str, factory: F)
    where
        F: Fn(&PluginContext) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        self.factories
            .insert((module.to_string(), class.to_string()), Box::new(factory));
    }

    /// Factory registered under `(module, class)`.
    pub fn get(&self, module: &str, class: &str) -> Option<&PluginFactory> {
        self.factories.get(&(module.to_string(), class.to_string()))
    }

    /// Registered `(module, class)` pairs, sorted.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.factories
            .keys()
            .map(|(m, c)| (m.as_str(), c.as_str()))
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_physics::mock::MockBackend;
    use simbridge_physics::shared;

    struct Noop;

    impl Plugin for Noop {
        fn execute(&mut self) -> Result<(), PluginError> {
            Ok(())
        }
    }

    fn context() -> PluginContext {
        PluginContext {
            backend: shared(MockBackend::new(Vec::<(String, _)>::new())),
            robot: RobotHandle::new(0),
            joints: Arc::new(JointTable::default()),
            bus: Bus::new(),
        }
    }

    #[test]
    fn test_register_and_build() {
        let mut registry = PluginRegistry::new();
        registry.register("noop", "Noop", |_| {
            let plugin: Box<dyn Plugin> = Box::new(Noop);
            Ok(plugin)
        });

        let factory = registry.get("noop", "Noop").unwrap();
        let mut plugin = factory(&context()).unwrap();
        plugin.execute().unwrap();

        assert!(registry.get("noop", "Other").is_none());
        assert!(registry.get("other", "Noop").is_none());
    }

    #[test]
    fn test_builtin_contains_joint_control() {
        let registry = PluginRegistry::builtin();
        let entries: Vec<(&str, &str)> = registry.entries().collect();
        assert!(entries.contains(&("joint_control", "JointControl")));
    }
}
