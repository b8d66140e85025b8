//! Forwards joint commands from the bus to the simulator.
//!
//! Listens on `joint_commands`. On every tick the newest unseen command is
//! applied to each named joint that appears in the joint table; a command
//! stays in force until the next one arrives, like a motor setpoint.

use std::sync::Arc;

use simbridge_bus::{CommandMode, JointCommand, Subscriber, JOINT_COMMANDS_TOPIC};
use simbridge_physics::{RobotHandle, SharedBackend};
use tracing::{debug, warn};

use crate::error::PluginError;
use crate::joint_table::JointTable;
use crate::plugin::{Plugin, PluginContext, PluginRegistry};

/// Module name in the plugin configuration.
pub const MODULE: &str = "joint_control";
/// Class name in the plugin configuration.
pub const CLASS: &str = "JointControl";

/// Register under [`MODULE`] / [`CLASS`].
pub fn register(registry: &mut PluginRegistry) {
    registry.register(MODULE, CLASS, |ctx| {
        let plugin: Box<dyn Plugin> = Box::new(JointControl::new(ctx)?);
        Ok(plugin)
    });
}

/// Position, velocity and effort control over the bus.
pub struct JointControl {
    backend: SharedBackend,
    robot: RobotHandle,
    joints: Arc<JointTable>,
    commands: Subscriber<JointCommand>,
}

impl JointControl {
    /// Subscribe to joint commands for the context's robot.
    pub fn new(ctx: &PluginContext) -> Result<Self, PluginError> {
        Ok(Self {
            backend: ctx.backend.clone(),
            robot: ctx.robot,
            joints: ctx.joints.clone(),
            commands: ctx.bus.subscribe(JOINT_COMMANDS_TOPIC)?,
        })
    }

    fn apply(&self, cmd: &JointCommand) -> Result<(), PluginError> {
        if cmd.name.len() != cmd.values.len() {
            warn!(
                "ignoring joint command with {} names and {} values",
                cmd.name.len(),
                cmd.values.len()
            );
            return Ok(());
        }

        let mut backend = self
            .backend
            .lock()
            .map_err(|_| PluginError::Failed("physics backend lock poisoned".into()))?;

        for (name, &value) in cmd.name.iter().zip(&cmd.values) {
            let Some(index) = self.joints.index_of(name) else {
                warn!("joint command for unknown joint {name}, skipping");
                continue;
            };
            match cmd.mode {
                CommandMode::Position => backend.set_joint_position(self.robot, index, value)?,
                CommandMode::Velocity => backend.set_joint_velocity(self.robot, index, value)?,
                CommandMode::Effort => backend.set_joint_effort(self.robot, index, value)?,
            }
        }
        debug!("applied {:?} command to {} joints", cmd.mode, cmd.name.len());
        Ok(())
    }
}

impl Plugin for JointControl {
    fn execute(&mut self) -> Result<(), PluginError> {
        match self.commands.take_new() {
            Some(cmd) => self.apply(&cmd),
            None => Ok(()),
        }
    }
}
