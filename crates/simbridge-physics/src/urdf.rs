//! URDF reading and kinematic tree ordering using `urdf-rs`.

// URDF values are f64, rapier works in f32.
#![allow(clippy::cast_possible_truncation)]

use std::collections::{HashMap, HashSet};
use std::path::Path;

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

use crate::backend::JointType;
use crate::error::PhysicsError;

/// A parsed robot with its joints in index order.
///
/// Joints are ordered depth-first from the root link, siblings in declaration
/// order, so a parent link's joint always precedes its children's.
#[derive(Debug)]
pub struct RobotDescription {
    /// Robot name from the `<robot>` tag.
    pub name: String,
    /// Name of the link that is never a child.
    pub root_link: String,
    /// Links by name.
    pub links: HashMap<String, urdf_rs::Link>,
    /// Joints in index order.
    pub joints: Vec<urdf_rs::Joint>,
}

impl RobotDescription {
    /// Read and order a URDF file.
    pub fn from_file(path: &Path) -> Result<Self, PhysicsError> {
        let xml = std::fs::read_to_string(path).map_err(|e| PhysicsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_str(&xml)
    }

    /// Parse and order a URDF document.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(xml: &str) -> Result<Self, PhysicsError> {
        let robot =
            urdf_rs::read_from_string(xml).map_err(|e| PhysicsError::Parse(e.to_string()))?;
        Self::from_robot(robot)
    }

    fn from_robot(robot: urdf_rs::Robot) -> Result<Self, PhysicsError> {
        let links: HashMap<String, urdf_rs::Link> = robot
            .links
            .into_iter()
            .map(|l| (l.name.clone(), l))
            .collect();

        let mut child_links = HashSet::new();
        for joint in &robot.joints {
            for link in [&joint.parent.link, &joint.child.link] {
                if !links.contains_key(link) {
                    return Err(PhysicsError::InvalidModel(format!(
                        "joint {} references missing link {}",
                        joint.name, link
                    )));
                }
            }
            if !child_links.insert(joint.child.link.as_str()) {
                return Err(PhysicsError::InvalidModel(format!(
                    "link {} has more than one parent joint",
                    joint.child.link
                )));
            }
        }

        let mut roots: Vec<&String> = links
            .keys()
            .filter(|name| !child_links.contains(name.as_str()))
            .collect();
        roots.sort();
        let root_link = match roots.as_slice() {
            [root] => (*root).clone(),
            [] => return Err(PhysicsError::InvalidModel("no root link".into())),
            _ => {
                return Err(PhysicsError::InvalidModel(format!(
                    "multiple root links: {roots:?}"
                )))
            }
        };

        let ordered = dfs_order(&robot.joints, &root_link);
        if ordered.len() != robot.joints.len() {
            return Err(PhysicsError::InvalidModel(
                "kinematic graph is not a tree".into(),
            ));
        }

        let mut slots: Vec<Option<urdf_rs::Joint>> = robot.joints.into_iter().map(Some).collect();
        let joints = ordered
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect();

        Ok(Self {
            name: robot.name,
            root_link,
            links,
            joints,
        })
    }
}

/// Depth-first joint order from `root`, siblings in declaration order.
fn dfs_order(joints: &[urdf_rs::Joint], root: &str) -> Vec<usize> {
    let mut out = Vec::with_capacity(joints.len());
    let mut stack: Vec<usize> = joints
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, j)| j.parent.link == root)
        .map(|(i, _)| i)
        .collect();
    while let Some(i) = stack.pop() {
        out.push(i);
        let child = joints[i].child.link.as_str();
        stack.extend(
            joints
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, j)| j.parent.link == child)
                .map(|(k, _)| k),
        );
    }
    out
}

/// Backend joint type for a URDF joint type.
pub fn joint_type(jt: &urdf_rs::JointType) -> JointType {
    match jt {
        urdf_rs::JointType::Revolute | urdf_rs::JointType::Continuous => JointType::Revolute,
        urdf_rs::JointType::Prismatic => JointType::Prismatic,
        urdf_rs::JointType::Spherical | urdf_rs::JointType::Floating => JointType::Spherical,
        urdf_rs::JointType::Planar => JointType::Planar,
        urdf_rs::JointType::Fixed => JointType::Fixed,
    }
}

/// Whether the URDF joint carries position limits.
pub fn has_limits(joint: &urdf_rs::Joint) -> bool {
    !matches!(joint.joint_type, urdf_rs::JointType::Continuous)
        && (joint.limit.lower - joint.limit.upper).abs() > f64::EPSILON
}

/// Rigid transform for a URDF `<origin>`.
pub fn pose_to_isometry(pose: &urdf_rs::Pose) -> Isometry3<f32> {
    let xyz: &[f64; 3] = &pose.xyz;
    let rpy: &[f64; 3] = &pose.rpy;
    Isometry3::from_parts(
        Translation3::new(xyz[0] as f32, xyz[1] as f32, xyz[2] as f32),
        UnitQuaternion::from_euler_angles(rpy[0] as f32, rpy[1] as f32, rpy[2] as f32),
    )
}

/// Joint axis as an f32 vector.
pub fn axis_vector(joint: &urdf_rs::Joint) -> Vector3<f32> {
    let xyz: &[f64; 3] = &joint.axis.xyz;
    Vector3::new(xyz[0] as f32, xyz[1] as f32, xyz[2] as f32)
}
