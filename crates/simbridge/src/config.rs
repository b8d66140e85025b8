//! Node configuration.
//!
//! Loaded from TOML; every key is optional except `robot_urdf_path`, whose
//! absence is reported when the robot is loaded.
//!
//! ```toml
//! loop_rate = 80.0
//! gui = false
//! robot_urdf_path = "robots/arm.urdf"
//! robot_pose_z = 0.5
//! fixed_base = true
//!
//! [plugins]
//! joint_control = "JointControl"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simbridge_physics::{quaternion_from_euler, ConnectionMode, LoadOptions, UrdfFlags};

use crate::error::BridgeError;

/// Node name used for the service namespace when none is configured.
pub const DEFAULT_NODE_NAME: &str = "simbridge";

fn default_node_name() -> String {
    DEFAULT_NODE_NAME.to_string()
}

fn default_loop_rate() -> f64 {
    80.0
}

fn default_true() -> bool {
    true
}

fn default_pose_z() -> f64 {
    1.0
}

fn default_gravity() -> f64 {
    -9.81
}

fn default_time_step() -> f64 {
    1.0 / 240.0
}

/// Everything the node reads at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Service namespace.
    #[serde(default = "default_node_name")]
    pub node_name: String,
    /// Tick frequency (Hz).
    #[serde(default = "default_loop_rate")]
    pub loop_rate: f64,
    /// Connect with a viewer.
    #[serde(default = "default_true")]
    pub gui: bool,
    /// Start paused.
    #[serde(default)]
    pub pause_simulation: bool,
    /// Robot description to load.
    #[serde(default)]
    pub robot_urdf_path: Option<PathBuf>,
    /// Spawn position x (m).
    #[serde(default)]
    pub robot_pose_x: f64,
    /// Spawn position y (m).
    #[serde(default)]
    pub robot_pose_y: f64,
    /// Spawn position z (m).
    #[serde(default = "default_pose_z")]
    pub robot_pose_z: f64,
    /// Spawn heading (rad).
    #[serde(default)]
    pub robot_pose_yaw: f64,
    /// Anchor the robot's root link.
    #[serde(default)]
    pub fixed_base: bool,
    /// Take inertia from the description instead of the collision shapes.
    #[serde(default)]
    pub use_inertia_from_file: bool,
    /// Z component of gravity (m/s²).
    #[serde(default = "default_gravity")]
    pub gravity: f64,
    /// Extra asset directory (holds `plane.urdf`).
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    /// Physics step size (s).
    #[serde(default = "default_time_step")]
    pub time_step: f64,
    /// Plugins to load: module name to class name.
    #[serde(default)]
    pub plugins: BTreeMap<String, String>,
    /// Address for the TCP gateway, e.g. `127.0.0.1:11411`.
    #[serde(default)]
    pub gateway: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            loop_rate: default_loop_rate(),
            gui: true,
            pause_simulation: false,
            robot_urdf_path: None,
            robot_pose_x: 0.0,
            robot_pose_y: 0.0,
            robot_pose_z: default_pose_z(),
            robot_pose_yaw: 0.0,
            fixed_base: false,
            use_inertia_from_file: false,
            gravity: default_gravity(),
            data_path: None,
            time_step: default_time_step(),
            plugins: BTreeMap::new(),
            gateway: None,
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, BridgeError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, BridgeError> {
        let s = std::fs::read_to_string(path).map_err(|e| BridgeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&s)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), BridgeError> {
        positive("loop_rate", self.loop_rate)?;
        if self.checked_period().is_none() {
            return Err(BridgeError::InvalidParam {
                name: "loop_rate",
                reason: format!("tick period of 1/{} s is out of range", self.loop_rate),
            });
        }
        positive("time_step", self.time_step)?;
        let dt = self.backend_time_step();
        if !(dt.is_finite() && dt > 0.0) {
            return Err(BridgeError::InvalidParam {
                name: "time_step",
                reason: format!("{} s is not a usable single-precision step", self.time_step),
            });
        }
        if !self.gravity.is_finite() {
            return Err(BridgeError::InvalidParam {
                name: "gravity",
                reason: format!("must be finite, got {}", self.gravity),
            });
        }
        if self.node_name.is_empty() || self.node_name.contains('/') {
            return Err(BridgeError::InvalidParam {
                name: "node_name",
                reason: format!("must be a non-empty name without '/', got {:?}", self.node_name),
            });
        }
        Ok(())
    }

    /// Wall-clock time between ticks.
    ///
    /// Exact for a validated config. Rates [`validate`](Self::validate)
    /// rejects saturate instead of panicking.
    pub fn period(&self) -> Duration {
        self.checked_period().unwrap_or(if self.loop_rate > 1.0 {
            Duration::from_nanos(1)
        } else {
            Duration::MAX
        })
    }

    fn checked_period(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / self.loop_rate)
            .ok()
            .filter(|period| !period.is_zero())
    }

    /// Simulated seconds per physics step, as the backend takes it.
    pub fn backend_time_step(&self) -> f32 {
        self.time_step as f32
    }

    /// Backend connection mode.
    pub fn connection_mode(&self) -> ConnectionMode {
        if self.gui {
            ConnectionMode::Gui
        } else {
            ConnectionMode::Direct
        }
    }

    /// Robot description path, required.
    pub fn urdf_path(&self) -> Result<&Path, BridgeError> {
        self.robot_urdf_path
            .as_deref()
            .ok_or(BridgeError::MissingParam("robot_urdf_path"))
    }

    /// Spawn pose and flags for the robot.
    pub fn load_options(&self) -> LoadOptions {
        let mut flags = UrdfFlags::USE_SELF_COLLISION;
        if self.use_inertia_from_file {
            flags = flags | UrdfFlags::USE_INERTIA_FROM_FILE;
        }
        LoadOptions {
            base_position: [self.robot_pose_x, self.robot_pose_y, self.robot_pose_z],
            base_orientation: quaternion_from_euler([0.0, 0.0, self.robot_pose_yaw]),
            use_fixed_base: self.fixed_base,
            flags,
        }
    }

    /// Gravity vector.
    pub fn gravity_vector(&self) -> [f64; 3] {
        [0.0, 0.0, self.gravity]
    }

    /// Fully qualified name of one of this node's services.
    pub fn service_name(&self, service: &str) -> String {
        format!("/{}/{}", self.node_name, service)
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), BridgeError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(BridgeError::InvalidParam {
            name,
            reason: format!("must be a positive number, got {value}"),
        })
    }
}
