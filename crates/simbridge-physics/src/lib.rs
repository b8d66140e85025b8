#![warn(missing_docs)]

//! Physics backends for the simbridge node.
//!
//! The bridge drives its world through the [`PhysicsBackend`] trait, a small
//! physics-server client API: connect, load a URDF, step, read joint state,
//! reset. [`RapierBackend`] implements it on top of Rapier3d.
//!
//! # Example
//!
//! ```ignore
//! use simbridge_physics::{ConnectionMode, LoadOptions, PhysicsBackend, RapierBackend};
//!
//! let mut backend = RapierBackend::new();
//! backend.connect(ConnectionMode::Direct)?;
//! let robot = backend.load_urdf("arm.urdf".as_ref(), &LoadOptions::default())?;
//! backend.set_gravity([0.0, 0.0, -9.81])?;
//! backend.step_simulation()?;
//! let reading = backend.joint_state(robot, 0)?;
//! ```

mod backend;
mod colliders;
mod error;
mod joints;
pub mod urdf;
mod world;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::{
    quaternion_from_euler, shared, ConnectionMode, JointInfo, JointReading, JointType,
    LoadOptions, PhysicsBackend, RobotHandle, SharedBackend, UrdfFlags, JOINT_FIXED,
    JOINT_PLANAR, JOINT_PRISMATIC, JOINT_REVOLUTE, JOINT_SPHERICAL,
};
pub use error::PhysicsError;
pub use world::{RapierBackend, DEFAULT_TIME_STEP, GROUND_PLANE_ASSET};
