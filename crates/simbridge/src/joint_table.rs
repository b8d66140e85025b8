//! Revolute joints of the loaded robot.

use std::collections::BTreeMap;

use simbridge_physics::{JointType, PhysicsBackend, PhysicsError, RobotHandle};

/// Joint index to joint name, for the robot's revolute joints only.
///
/// Iterates in ascending joint index, which is also the order joint state is
/// published in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JointTable {
    joints: BTreeMap<usize, String>,
}

impl JointTable {
    /// Enumerate the robot's joints and keep the revolute ones.
    pub fn from_backend(
        backend: &dyn PhysicsBackend,
        robot: RobotHandle,
    ) -> Result<Self, PhysicsError> {
        let mut joints = BTreeMap::new();
        for index in 0..backend.num_joints(robot)? {
            let info = backend.joint_info(robot, index)?;
            if info.joint_type == JointType::Revolute {
                joints.insert(index, info.name_lossy());
            }
        }
        Ok(Self { joints })
    }

    /// Number of revolute joints.
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    /// Whether the robot has no revolute joints.
    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// `(index, name)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.joints.iter().map(|(i, n)| (*i, n.as_str()))
    }

    /// Name of the joint at `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.joints.get(&index).map(String::as_str)
    }

    /// Index of the joint called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.joints
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(i, _)| *i)
    }

    /// Joint names in index order.
    pub fn names(&self) -> Vec<String> {
        self.joints.values().cloned().collect()
    }
}

impl FromIterator<(usize, String)> for JointTable {
    fn from_iter<I: IntoIterator<Item = (usize, String)>>(iter: I) -> Self {
        Self {
            joints: iter.into_iter().collect(),
        }
    }
}
