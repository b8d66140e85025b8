//! Scripted in-memory backend for tests.
//!
//! Every call is appended to a shared [`CallLog`], so a test can hand the
//! backend to the bridge and still inspect what happened to it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{
    ConnectionMode, JointInfo, JointReading, JointType, LoadOptions, PhysicsBackend, RobotHandle,
};
use crate::error::PhysicsError;

/// Seconds advanced per mock step.
pub const MOCK_TIME_STEP: f64 = 0.01;

/// One call received by a [`MockBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    /// `connect`
    Connect(ConnectionMode),
    /// `disconnect`
    Disconnect,
    /// `set_additional_search_path`
    SetSearchPath(PathBuf),
    /// `load_urdf`
    LoadUrdf {
        /// Requested path.
        path: PathBuf,
        /// Requested options.
        options: LoadOptions,
    },
    /// `load_ground_plane`
    LoadGroundPlane,
    /// `set_gravity`
    SetGravity([f64; 3]),
    /// `set_real_time_simulation`
    SetRealTime(bool),
    /// `set_joint_position`
    SetJointPosition(usize, f64),
    /// `set_joint_velocity`
    SetJointVelocity(usize, f64),
    /// `set_joint_effort`
    SetJointEffort(usize, f64),
    /// `step_simulation`
    Step,
    /// `reset_simulation`
    Reset,
}

/// Shared, cloneable view of the calls made on a [`MockBackend`].
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<BackendCall>>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<BackendCall>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, call: BackendCall) {
        self.lock().push(call);
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().clone()
    }

    /// Number of calls equal to `call`.
    pub fn count(&self, call: &BackendCall) -> usize {
        self.lock().iter().filter(|c| *c == call).count()
    }

    /// Number of `step_simulation` calls.
    pub fn steps(&self) -> usize {
        self.count(&BackendCall::Step)
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[derive(Debug, Clone)]
struct MockJoint {
    name: Vec<u8>,
    joint_type: JointType,
    reading: JointReading,
    target: Option<f64>,
    pending_effort: f64,
}

/// Backend that plays back a fixed joint layout.
///
/// Joints move kinematically: a velocity command integrates position each
/// step, a position command snaps to the target on the next step, and an
/// effort command is reported back as the applied effort for one step.
#[derive(Debug)]
pub struct MockBackend {
    layout: Vec<(Vec<u8>, JointType)>,
    log: CallLog,
    connected: bool,
    fail_connect: bool,
    robots: Vec<Vec<MockJoint>>,
}

impl MockBackend {
    /// Mock whose robots all have the given joints, in index order.
    pub fn new<S: AsRef<[u8]>>(joints: impl IntoIterator<Item = (S, JointType)>) -> Self {
        Self {
            layout: joints
                .into_iter()
                .map(|(name, jt)| (name.as_ref().to_vec(), jt))
                .collect(),
            log: CallLog::default(),
            connected: false,
            fail_connect: false,
            robots: Vec::new(),
        }
    }

    /// Make `connect` fail.
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Handle to the call log.
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn ensure_connected(&self) -> Result<(), PhysicsError> {
        if self.connected {
            Ok(())
        } else {
            Err(PhysicsError::NotConnected)
        }
    }

    fn joints(&self, robot: RobotHandle) -> Result<&Vec<MockJoint>, PhysicsError> {
        self.ensure_connected()?;
        self.robots
            .get(robot.id())
            .ok_or(PhysicsError::UnknownRobot(robot.id()))
    }

    fn joint_mut(&mut self, robot: RobotHandle, index: usize) -> Result<&mut MockJoint, PhysicsError> {
        self.ensure_connected()?;
        let joints = self
            .robots
            .get_mut(robot.id())
            .ok_or(PhysicsError::UnknownRobot(robot.id()))?;
        let count = joints.len();
        let joint = joints
            .get_mut(index)
            .ok_or(PhysicsError::JointIndex { index, count })?;
        if !joint.joint_type.is_actuated() {
            return Err(PhysicsError::NotActuated(index));
        }
        Ok(joint)
    }
}

impl PhysicsBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn connect(&mut self, mode: ConnectionMode) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::Connect(mode));
        if self.fail_connect {
            return Err(PhysicsError::Unsupported("mock connect"));
        }
        if self.connected {
            return Err(PhysicsError::AlreadyConnected);
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.log.push(BackendCall::Disconnect);
        self.connected = false;
        self.robots.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn set_additional_search_path(&mut self, path: &Path) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::SetSearchPath(path.to_path_buf()));
        self.ensure_connected()
    }

    fn load_urdf(&mut self, path: &Path, options: &LoadOptions) -> Result<RobotHandle, PhysicsError> {
        self.log.push(BackendCall::LoadUrdf {
            path: path.to_path_buf(),
            options: options.clone(),
        });
        self.ensure_connected()?;
        let joints = self
            .layout
            .iter()
            .map(|(name, joint_type)| MockJoint {
                name: name.clone(),
                joint_type: *joint_type,
                reading: JointReading::default(),
                target: None,
                pending_effort: 0.0,
            })
            .collect();
        self.robots.push(joints);
        Ok(RobotHandle::new(self.robots.len() - 1))
    }

    fn load_ground_plane(&mut self) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::LoadGroundPlane);
        self.ensure_connected()
    }

    fn set_gravity(&mut self, gravity: [f64; 3]) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::SetGravity(gravity));
        self.ensure_connected()
    }

    fn set_real_time_simulation(&mut self, enabled: bool) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::SetRealTime(enabled));
        self.ensure_connected()
    }

    fn num_joints(&self, robot: RobotHandle) -> Result<usize, PhysicsError> {
        Ok(self.joints(robot)?.len())
    }

    fn joint_info(&self, robot: RobotHandle, index: usize) -> Result<JointInfo, PhysicsError> {
        let joints = self.joints(robot)?;
        let joint = joints.get(index).ok_or(PhysicsError::JointIndex {
            index,
            count: joints.len(),
        })?;
        Ok(JointInfo {
            index,
            name: joint.name.clone(),
            joint_type: joint.joint_type,
        })
    }

    fn joint_state(&self, robot: RobotHandle, index: usize) -> Result<JointReading, PhysicsError> {
        let joints = self.joints(robot)?;
        joints
            .get(index)
            .map(|j| j.reading)
            .ok_or(PhysicsError::JointIndex {
                index,
                count: joints.len(),
            })
    }

    fn set_joint_position(
        &mut self,
        robot: RobotHandle,
        index: usize,
        target: f64,
    ) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::SetJointPosition(index, target));
        self.joint_mut(robot, index)?.target = Some(target);
        Ok(())
    }

    fn set_joint_velocity(
        &mut self,
        robot: RobotHandle,
        index: usize,
        target: f64,
    ) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::SetJointVelocity(index, target));
        let joint = self.joint_mut(robot, index)?;
        joint.reading.velocity = target;
        joint.target = None;
        Ok(())
    }

    fn set_joint_effort(
        &mut self,
        robot: RobotHandle,
        index: usize,
        effort: f64,
    ) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::SetJointEffort(index, effort));
        self.joint_mut(robot, index)?.pending_effort = effort;
        Ok(())
    }

    fn step_simulation(&mut self) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::Step);
        self.ensure_connected()?;
        for joints in &mut self.robots {
            for joint in joints.iter_mut() {
                match joint.target.take() {
                    Some(target) => {
                        joint.reading.position = target;
                        joint.reading.velocity = 0.0;
                    }
                    None => joint.reading.position += joint.reading.velocity * MOCK_TIME_STEP,
                }
                joint.reading.applied_effort = std::mem::take(&mut joint.pending_effort);
            }
        }
        Ok(())
    }

    fn reset_simulation(&mut self) -> Result<(), PhysicsError> {
        self.log.push(BackendCall::Reset);
        self.ensure_connected()?;
        self.robots.clear();
        Ok(())
    }
}
