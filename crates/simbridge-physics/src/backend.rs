//! Engine-agnostic physics backend contract.
//!
//! The bridge never talks to a physics engine directly. Everything it needs
//! (loading a scene, stepping, reading joint state, resetting) goes through
//! [`PhysicsBackend`], which mirrors the small client API of a physics server.

use std::ops::BitOr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::error::PhysicsError;

/// Type code reported for revolute (and continuous) joints.
pub const JOINT_REVOLUTE: i32 = 0;
/// Type code reported for prismatic joints.
pub const JOINT_PRISMATIC: i32 = 1;
/// Type code reported for spherical and floating joints.
pub const JOINT_SPHERICAL: i32 = 2;
/// Type code reported for planar joints.
pub const JOINT_PLANAR: i32 = 3;
/// Type code reported for fixed joints.
pub const JOINT_FIXED: i32 = 4;

/// How the backend is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// Interactive session with a visual window.
    Gui,
    /// Headless session.
    Direct,
}

/// Opaque identifier of a robot loaded into the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RobotHandle(usize);

impl RobotHandle {
    /// Wrap a backend-specific body id.
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// The backend-specific body id.
    pub const fn id(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for RobotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "robot#{}", self.0)
    }
}

/// Kinematic type of a joint, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointType {
    /// Rotation about one axis. Continuous joints are reported as revolute.
    Revolute,
    /// Translation along one axis.
    Prismatic,
    /// Free rotation about a point.
    Spherical,
    /// Translation in a plane plus rotation about its normal.
    Planar,
    /// No relative motion.
    Fixed,
}

impl JointType {
    /// Numeric type code of this joint type.
    pub const fn code(self) -> i32 {
        match self {
            Self::Revolute => JOINT_REVOLUTE,
            Self::Prismatic => JOINT_PRISMATIC,
            Self::Spherical => JOINT_SPHERICAL,
            Self::Planar => JOINT_PLANAR,
            Self::Fixed => JOINT_FIXED,
        }
    }

    /// Inverse of [`JointType::code`].
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            JOINT_REVOLUTE => Some(Self::Revolute),
            JOINT_PRISMATIC => Some(Self::Prismatic),
            JOINT_SPHERICAL => Some(Self::Spherical),
            JOINT_PLANAR => Some(Self::Planar),
            JOINT_FIXED => Some(Self::Fixed),
            _ => None,
        }
    }

    /// Whether motor commands can drive this joint.
    pub const fn is_actuated(self) -> bool {
        matches!(self, Self::Revolute | Self::Prismatic)
    }
}

/// Static description of one joint.
#[derive(Debug, Clone, PartialEq)]
pub struct JointInfo {
    /// Joint index on its robot.
    pub index: usize,
    /// Joint name as raw bytes, exactly as the backend stores it.
    pub name: Vec<u8>,
    /// Kinematic type.
    pub joint_type: JointType,
}

impl JointInfo {
    /// Joint name decoded to text (invalid UTF-8 is replaced).
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Dynamic state of one joint after the last step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JointReading {
    /// Position (rad for revolute, m for prismatic).
    pub position: f64,
    /// Velocity (rad/s or m/s).
    pub velocity: f64,
    /// Effort applied during the last step (Nm or N).
    pub applied_effort: f64,
}

/// Bit flags that alter how a robot description is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UrdfFlags(u32);

impl UrdfFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Take mass and inertia from the description instead of the collision shapes.
    pub const USE_INERTIA_FROM_FILE: Self = Self(1 << 1);
    /// Let links of the same robot collide with each other (except parent/child pairs).
    pub const USE_SELF_COLLISION: Self = Self(1 << 3);

    /// Whether every bit in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for UrdfFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Placement and options for [`PhysicsBackend::load_urdf`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Base position in world coordinates (m).
    pub base_position: [f64; 3],
    /// Base orientation as a quaternion `[x, y, z, w]`.
    pub base_orientation: [f64; 4],
    /// Anchor the root link to the world.
    pub use_fixed_base: bool,
    /// Loading flags.
    pub flags: UrdfFlags,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            base_position: [0.0; 3],
            base_orientation: [0.0, 0.0, 0.0, 1.0],
            use_fixed_base: false,
            flags: UrdfFlags::NONE,
        }
    }
}

/// Quaternion `[x, y, z, w]` from roll/pitch/yaw (fixed-axis XYZ) angles in radians.
pub fn quaternion_from_euler(rpy: [f64; 3]) -> [f64; 4] {
    let q = UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]);
    [q.i, q.j, q.k, q.w]
}

/// Client-side contract of a physics server.
///
/// Implementations own the whole simulated world. All fallible calls fail with
/// [`PhysicsError::NotConnected`] when the backend is not connected.
pub trait PhysicsBackend: Send {
    /// Human-readable engine name.
    fn name(&self) -> &str;

    /// Open a session.
    fn connect(&mut self, mode: ConnectionMode) -> Result<(), PhysicsError>;

    /// Close the session. Idempotent.
    fn disconnect(&mut self);

    /// Whether a session is open.
    fn is_connected(&self) -> bool;

    /// Extra directory searched when resolving relative asset paths.
    fn set_additional_search_path(&mut self, path: &Path) -> Result<(), PhysicsError>;

    /// Load a robot description and return its handle.
    fn load_urdf(&mut self, path: &Path, options: &LoadOptions) -> Result<RobotHandle, PhysicsError>;

    /// Add the ground plane to the world.
    fn load_ground_plane(&mut self) -> Result<(), PhysicsError>;

    /// Set the gravity vector (m/s²).
    fn set_gravity(&mut self, gravity: [f64; 3]) -> Result<(), PhysicsError>;

    /// Enable or disable autonomous real-time stepping.
    fn set_real_time_simulation(&mut self, enabled: bool) -> Result<(), PhysicsError>;

    /// Number of joints on a robot, including fixed ones.
    fn num_joints(&self, robot: RobotHandle) -> Result<usize, PhysicsError>;

    /// Static description of a joint.
    fn joint_info(&self, robot: RobotHandle, index: usize) -> Result<JointInfo, PhysicsError>;

    /// Dynamic state of a joint.
    fn joint_state(&self, robot: RobotHandle, index: usize) -> Result<JointReading, PhysicsError>;

    /// Drive a joint towards a position target.
    fn set_joint_position(
        &mut self,
        robot: RobotHandle,
        index: usize,
        target: f64,
    ) -> Result<(), PhysicsError>;

    /// Drive a joint at a velocity target.
    fn set_joint_velocity(
        &mut self,
        robot: RobotHandle,
        index: usize,
        target: f64,
    ) -> Result<(), PhysicsError>;

    /// Apply a raw effort to a joint for the next step.
    fn set_joint_effort(
        &mut self,
        robot: RobotHandle,
        index: usize,
        effort: f64,
    ) -> Result<(), PhysicsError>;

    /// Advance the world by one fixed time step.
    fn step_simulation(&mut self) -> Result<(), PhysicsError>;

    /// Remove every object and restore the empty-world defaults.
    fn reset_simulation(&mut self) -> Result<(), PhysicsError>;
}

/// A backend shared between the tick loop, service handlers and plugins.
pub type SharedBackend = Arc<Mutex<dyn PhysicsBackend>>;

/// Wrap a backend for sharing.
pub fn shared<B: PhysicsBackend + 'static>(backend: B) -> SharedBackend {
    Arc::new(Mutex::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_is_object_safe() {
        fn _accepts_boxed(_: Box<dyn PhysicsBackend>) {}
    }

    #[test]
    fn test_joint_type_codes() {
        assert_eq!(JointType::Revolute.code(), 0);
        assert_eq!(JointType::Fixed.code(), 4);
        for jt in [
            JointType::Revolute,
            JointType::Prismatic,
            JointType::Spherical,
            JointType::Planar,
            JointType::Fixed,
        ] {
            assert_eq!(JointType::from_code(jt.code()), Some(jt));
        }
        assert_eq!(JointType::from_code(42), None);
    }

    #[test]
    fn test_flags_combine() {
        let flags = UrdfFlags::USE_INERTIA_FROM_FILE | UrdfFlags::USE_SELF_COLLISION;
        assert!(flags.contains(UrdfFlags::USE_SELF_COLLISION));
        assert!(flags.contains(UrdfFlags::USE_INERTIA_FROM_FILE));
        assert!(!UrdfFlags::USE_SELF_COLLISION.contains(UrdfFlags::USE_INERTIA_FROM_FILE));
    }

    #[test]
    fn test_quaternion_from_yaw() {
        let q = quaternion_from_euler([0.0, 0.0, 0.0]);
        assert_eq!(q, [0.0, 0.0, 0.0, 1.0]);

        let q = quaternion_from_euler([0.0, 0.0, std::f64::consts::PI]);
        assert!(q[0].abs() < 1e-9 && q[1].abs() < 1e-9);
        assert!((q[2].abs() - 1.0).abs() < 1e-9);
        assert!(q[3].abs() < 1e-9);
    }

    #[test]
    fn test_name_lossy() {
        let info = JointInfo {
            index: 0,
            name: b"elbow\xff".to_vec(),
            joint_type: JointType::Revolute,
        };
        assert_eq!(info.name_lossy(), "elbow\u{fffd}");
    }
}
