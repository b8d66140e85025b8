//! Rapier3d implementation of [`PhysicsBackend`].

#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};
use rapier3d::dynamics::{
    CCDSolver, ImpulseJointHandle, ImpulseJointSet, IntegrationParameters, IslandManager,
    MassProperties, MultibodyJointSet, RigidBodyBuilder, RigidBodyHandle, RigidBodySet,
};
use rapier3d::geometry::{
    BroadPhaseMultiSap, ColliderBuilder, ColliderSet, InteractionGroups, NarrowPhase,
};
use rapier3d::pipeline::{PhysicsPipeline, QueryPipeline};
use tracing::{debug, info, warn};

use crate::backend::{
    ConnectionMode, JointInfo, JointReading, JointType, LoadOptions, PhysicsBackend, RobotHandle,
    UrdfFlags,
};
use crate::colliders::{collision_to_collider, principal_inertia, robot_collision_groups};
use crate::error::PhysicsError;
use crate::joints::{
    joint_frames, measure, motor_axis, urdf_joint_to_rapier, world_axis, DEFAULT_MAX_FORCE,
    DEFAULT_MOTOR_DAMPING, DEFAULT_MOTOR_STIFFNESS, DEFAULT_VELOCITY_FACTOR,
};
use crate::urdf::{axis_vector, has_limits, joint_type, pose_to_isometry, RobotDescription};

/// Default simulation time step (s).
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 240.0;

/// File looked up in the search path by [`PhysicsBackend::load_ground_plane`].
pub const GROUND_PLANE_ASSET: &str = "plane.urdf";

/// Smallest mass given to a link, so massless links still integrate.
const MIN_LINK_MASS: f32 = 0.001;
const MIN_LINK_INERTIA: f32 = 1e-6;

/// How a joint is being driven.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Drive {
    Free,
    Effort(f32),
    Position(f32),
    Velocity(f32),
}

struct RobotJoint {
    name: String,
    joint_type: JointType,
    parent: RigidBodyHandle,
    child: RigidBodyHandle,
    frame1: Isometry3<f32>,
    frame2: Isometry3<f32>,
    impulse: Option<ImpulseJointHandle>,
    max_force: f32,
    drive: Drive,
    applied_effort: f64,
}

struct LoadedRobot {
    name: String,
    base: RigidBodyHandle,
    joints: Vec<RobotJoint>,
}

/// Physics world driven through the [`PhysicsBackend`] contract.
pub struct RapierBackend {
    mode: Option<ConnectionMode>,
    search_path: Option<PathBuf>,

    // Rapier components
    pipeline: PhysicsPipeline,
    gravity: Vector3<f32>,
    integration_params: IntegrationParameters,
    islands: IslandManager,
    broad_phase: BroadPhaseMultiSap,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    robots: Vec<LoadedRobot>,
    ground: Option<RigidBodyHandle>,
}

impl RapierBackend {
    /// Create a disconnected backend with the default time step.
    pub fn new() -> Self {
        Self::with_time_step(DEFAULT_TIME_STEP)
    }

    /// Create a disconnected backend that advances `dt` seconds per step.
    pub fn with_time_step(dt: f32) -> Self {
        let mut integration_params = IntegrationParameters::default();
        integration_params.dt = dt;

        Self {
            mode: None,
            search_path: None,
            pipeline: PhysicsPipeline::new(),
            gravity: Vector3::zeros(),
            integration_params,
            islands: IslandManager::new(),
            broad_phase: BroadPhaseMultiSap::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            robots: Vec::new(),
            ground: None,
        }
    }

    /// Simulated seconds per step.
    pub fn time_step(&self) -> f32 {
        self.integration_params.dt
    }

    /// Current gravity vector.
    pub fn gravity(&self) -> [f64; 3] {
        [
            f64::from(self.gravity.x),
            f64::from(self.gravity.y),
            f64::from(self.gravity.z),
        ]
    }

    /// Number of loaded robots, the ground plane excluded.
    pub fn robot_count(&self) -> usize {
        self.robots.len()
    }

    /// Whether a ground plane is present.
    pub fn has_ground(&self) -> bool {
        self.ground.is_some()
    }

    /// Name of a loaded robot.
    pub fn robot_name(&self, robot: RobotHandle) -> Result<&str, PhysicsError> {
        Ok(&self.robot(robot)?.name)
    }

    /// World position of a robot's root link.
    pub fn base_position(&self, robot: RobotHandle) -> Result<[f64; 3], PhysicsError> {
        let base = self.robot(robot)?.base;
        let t = self
            .bodies
            .get(base)
            .map(|b| *b.translation())
            .unwrap_or_else(Vector3::zeros);
        Ok([f64::from(t.x), f64::from(t.y), f64::from(t.z)])
    }

    fn ensure_connected(&self) -> Result<(), PhysicsError> {
        if self.mode.is_some() {
            Ok(())
        } else {
            Err(PhysicsError::NotConnected)
        }
    }

    fn robot(&self, robot: RobotHandle) -> Result<&LoadedRobot, PhysicsError> {
        self.ensure_connected()?;
        self.robots
            .get(robot.id())
            .ok_or(PhysicsError::UnknownRobot(robot.id()))
    }

    fn joint(&self, robot: RobotHandle, index: usize) -> Result<&RobotJoint, PhysicsError> {
        let loaded = self.robot(robot)?;
        loaded.joints.get(index).ok_or(PhysicsError::JointIndex {
            index,
            count: loaded.joints.len(),
        })
    }

    fn joint_mut(
        robots: &mut [LoadedRobot],
        robot: RobotHandle,
        index: usize,
    ) -> Result<&mut RobotJoint, PhysicsError> {
        let loaded = robots
            .get_mut(robot.id())
            .ok_or(PhysicsError::UnknownRobot(robot.id()))?;
        let count = loaded.joints.len();
        let joint = loaded
            .joints
            .get_mut(index)
            .ok_or(PhysicsError::JointIndex { index, count })?;
        if !joint.joint_type.is_actuated() {
            return Err(PhysicsError::NotActuated(index));
        }
        Ok(joint)
    }

    /// Resolve a relative asset path against the working directory, then the search path.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() && !path.exists() {
            if let Some(dir) = &self.search_path {
                let candidate = dir.join(path);
                if candidate.exists() {
                    return candidate;
                }
            }
        }
        path.to_path_buf()
    }

    fn clear_world(&mut self) {
        self.islands = IslandManager::new();
        self.broad_phase = BroadPhaseMultiSap::new();
        self.narrow_phase = NarrowPhase::new();
        self.bodies = RigidBodySet::new();
        self.colliders = ColliderSet::new();
        self.impulse_joints = ImpulseJointSet::new();
        self.multibody_joints = MultibodyJointSet::new();
        self.ccd_solver = CCDSolver::new();
        self.query_pipeline = QueryPipeline::new();
        self.robots.clear();
        self.ground = None;
    }

    /// Create the rigid body and colliders of one link.
    fn create_link_body(
        &mut self,
        link: &urdf_rs::Link,
        pose: Isometry3<f32>,
        dynamic: bool,
        inertia_from_file: bool,
        groups: InteractionGroups,
    ) -> RigidBodyHandle {
        let builder = if dynamic {
            RigidBodyBuilder::dynamic()
        } else {
            RigidBodyBuilder::fixed()
        }
        .position(pose);

        let mass = (link.inertial.mass.value as f32).max(MIN_LINK_MASS);
        let colliders: Vec<ColliderBuilder> = link
            .collision
            .iter()
            .filter_map(|c| collision_to_collider(c, &link.name))
            .collect();

        // Mass always comes from the description; inertia comes from the
        // description only on request (or when there is no shape to derive it from).
        let use_file_inertia = inertia_from_file || colliders.is_empty();
        let builder = if use_file_inertia {
            let com = pose_to_isometry(&link.inertial.origin).translation.vector;
            let inertia = principal_inertia(&link.inertial.inertia)
                .map(|v| v.max(MIN_LINK_INERTIA));
            builder.additional_mass_properties(MassProperties::new(Point3::from(com), mass, inertia))
        } else {
            builder
        };

        let handle = self.bodies.insert(builder.build());

        let share = mass / colliders.len().max(1) as f32;
        for collider in colliders {
            let collider = if use_file_inertia {
                collider.density(0.0)
            } else {
                collider.mass(share)
            };
            self.colliders.insert_with_parent(
                collider.collision_groups(groups).build(),
                handle,
                &mut self.bodies,
            );
        }

        handle
    }

    fn build_robot(
        &mut self,
        desc: &RobotDescription,
        options: &LoadOptions,
    ) -> Result<RobotHandle, PhysicsError> {
        let [x, y, z] = options.base_position;
        let [qx, qy, qz, qw] = options.base_orientation;
        let base_pose = Isometry3::from_parts(
            Translation3::new(x as f32, y as f32, z as f32),
            UnitQuaternion::from_quaternion(Quaternion::new(
                qw as f32, qx as f32, qy as f32, qz as f32,
            )),
        );

        let groups = robot_collision_groups(options.flags.contains(UrdfFlags::USE_SELF_COLLISION));
        let inertia_from_file = options.flags.contains(UrdfFlags::USE_INERTIA_FROM_FILE);

        let root = desc
            .links
            .get(&desc.root_link)
            .ok_or_else(|| PhysicsError::InvalidModel(format!("missing root {}", desc.root_link)))?;
        let base = self.create_link_body(
            root,
            base_pose,
            !options.use_fixed_base,
            inertia_from_file,
            groups,
        );

        let mut link_bodies: HashMap<&str, RigidBodyHandle> = HashMap::new();
        link_bodies.insert(desc.root_link.as_str(), base);

        let mut joints = Vec::with_capacity(desc.joints.len());
        for joint in &desc.joints {
            let parent = *link_bodies.get(joint.parent.link.as_str()).ok_or_else(|| {
                PhysicsError::InvalidModel(format!("joint {} has no parent body", joint.name))
            })?;
            let child_link = desc.links.get(&joint.child.link).ok_or_else(|| {
                PhysicsError::InvalidModel(format!("missing link {}", joint.child.link))
            })?;

            let origin = pose_to_isometry(&joint.origin);
            let parent_pose = *self.bodies[parent].position();
            let child = self.create_link_body(
                child_link,
                parent_pose * origin,
                true,
                inertia_from_file,
                groups,
            );
            link_bodies.insert(joint.child.link.as_str(), child);

            let (frame1, frame2) = joint_frames(origin, axis_vector(joint));
            let limits = has_limits(joint)
                .then(|| [joint.limit.lower as f32, joint.limit.upper as f32]);
            let max_force = if joint.limit.effort > 0.0 {
                joint.limit.effort as f32
            } else {
                DEFAULT_MAX_FORCE
            };

            let impulse = urdf_joint_to_rapier(&joint.joint_type, frame1, frame2, limits, max_force)
                .map(|data| self.impulse_joints.insert(parent, child, data, true));

            joints.push(RobotJoint {
                name: joint.name.clone(),
                joint_type: joint_type(&joint.joint_type),
                parent,
                child,
                frame1,
                frame2,
                impulse,
                max_force,
                drive: Drive::Free,
                applied_effort: 0.0,
            });
        }

        let handle = RobotHandle::new(self.robots.len());
        info!(
            "loaded robot {} as {} ({} joints, fixed_base={})",
            desc.name,
            handle,
            joints.len(),
            options.use_fixed_base
        );
        self.robots.push(LoadedRobot {
            name: desc.name.clone(),
            base,
            joints,
        });
        Ok(handle)
    }

    /// Effort each joint exerts during the coming step, and the raw forces for effort drives.
    fn apply_drives(&mut self) {
        for robot in &mut self.robots {
            for joint in &mut robot.joints {
                let (Some(parent), Some(child)) =
                    (self.bodies.get(joint.parent), self.bodies.get(joint.child))
                else {
                    continue;
                };
                let (position, velocity) =
                    measure(joint.joint_type, parent, child, &joint.frame1, &joint.frame2);
                let axis = world_axis(parent, &joint.frame1);
                let limit = f64::from(joint.max_force);

                joint.applied_effort = match joint.drive {
                    Drive::Free => 0.0,
                    Drive::Effort(effort) => {
                        let scaled = axis * effort;
                        let prismatic = joint.joint_type == JointType::Prismatic;
                        if let Some(body) = self.bodies.get_mut(joint.child) {
                            if prismatic {
                                body.add_force(scaled, true);
                            } else {
                                body.add_torque(scaled, true);
                            }
                        }
                        if let Some(body) = self.bodies.get_mut(joint.parent) {
                            if prismatic {
                                body.add_force(-scaled, true);
                            } else {
                                body.add_torque(-scaled, true);
                            }
                        }
                        f64::from(effort)
                    }
                    Drive::Position(target) => {
                        let error = f64::from(target) - position;
                        (f64::from(DEFAULT_MOTOR_STIFFNESS) * error
                            - f64::from(DEFAULT_MOTOR_DAMPING) * velocity)
                            .clamp(-limit, limit)
                    }
                    Drive::Velocity(target) => (f64::from(DEFAULT_VELOCITY_FACTOR)
                        * (f64::from(target) - velocity))
                        .clamp(-limit, limit),
                };
            }
        }
    }

    /// Effort commands last one step.
    fn clear_effort_drives(&mut self) {
        for robot in &mut self.robots {
            for joint in &mut robot.joints {
                if let Drive::Effort(_) = joint.drive {
                    joint.drive = Drive::Free;
                    for handle in [joint.parent, joint.child] {
                        if let Some(body) = self.bodies.get_mut(handle) {
                            body.reset_forces(false);
                            body.reset_torques(false);
                        }
                    }
                }
            }
        }
    }
}

impl Default for RapierBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsBackend for RapierBackend {
    fn name(&self) -> &str {
        "rapier3d"
    }

    fn connect(&mut self, mode: ConnectionMode) -> Result<(), PhysicsError> {
        if self.mode.is_some() {
            return Err(PhysicsError::AlreadyConnected);
        }
        if mode == ConnectionMode::Gui {
            warn!("rapier3d has no viewer, running headless");
        }
        self.mode = Some(mode);
        info!("connected to rapier3d (dt={}s)", self.integration_params.dt);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.mode.take().is_some() {
            self.clear_world();
            info!("disconnected from rapier3d");
        }
    }

    fn is_connected(&self) -> bool {
        self.mode.is_some()
    }

    fn set_additional_search_path(&mut self, path: &Path) -> Result<(), PhysicsError> {
        self.ensure_connected()?;
        self.search_path = Some(path.to_path_buf());
        Ok(())
    }

    fn load_urdf(&mut self, path: &Path, options: &LoadOptions) -> Result<RobotHandle, PhysicsError> {
        self.ensure_connected()?;
        let resolved = self.resolve(path);
        debug!("loading {}", resolved.display());
        let desc = RobotDescription::from_file(&resolved)?;
        self.build_robot(&desc, options)
    }

    fn load_ground_plane(&mut self) -> Result<(), PhysicsError> {
        self.ensure_connected()?;

        let asset = self
            .search_path
            .as_ref()
            .map(|dir| dir.join(GROUND_PLANE_ASSET))
            .filter(|p| p.exists());

        if let Some(path) = asset {
            let desc = RobotDescription::from_file(&path)?;
            let options = LoadOptions {
                use_fixed_base: true,
                ..LoadOptions::default()
            };
            let handle = self.build_robot(&desc, &options)?;
            // The plane is scenery, not a robot.
            if let Some(plane) = self.robots.pop() {
                debug!("ground plane from {} ({})", path.display(), handle);
                self.ground = Some(plane.base);
            }
        } else {
            let body = self.bodies.insert(RigidBodyBuilder::fixed().build());
            self.colliders.insert_with_parent(
                ColliderBuilder::halfspace(Vector3::z_axis())
                    .friction(crate::colliders::DEFAULT_FRICTION)
                    .build(),
                body,
                &mut self.bodies,
            );
            self.ground = Some(body);
        }
        Ok(())
    }

    fn set_gravity(&mut self, gravity: [f64; 3]) -> Result<(), PhysicsError> {
        self.ensure_connected()?;
        self.gravity = Vector3::new(gravity[0] as f32, gravity[1] as f32, gravity[2] as f32);
        Ok(())
    }

    fn set_real_time_simulation(&mut self, enabled: bool) -> Result<(), PhysicsError> {
        self.ensure_connected()?;
        if enabled {
            return Err(PhysicsError::Unsupported("real-time simulation"));
        }
        Ok(())
    }

    fn num_joints(&self, robot: RobotHandle) -> Result<usize, PhysicsError> {
        Ok(self.robot(robot)?.joints.len())
    }

    fn joint_info(&self, robot: RobotHandle, index: usize) -> Result<JointInfo, PhysicsError> {
        let joint = self.joint(robot, index)?;
        Ok(JointInfo {
            index,
            name: joint.name.as_bytes().to_vec(),
            joint_type: joint.joint_type,
        })
    }

    fn joint_state(&self, robot: RobotHandle, index: usize) -> Result<JointReading, PhysicsError> {
        let joint = self.joint(robot, index)?;
        let (position, velocity) = match (self.bodies.get(joint.parent), self.bodies.get(joint.child)) {
            (Some(parent), Some(child)) => {
                measure(joint.joint_type, parent, child, &joint.frame1, &joint.frame2)
            }
            _ => (0.0, 0.0),
        };
        Ok(JointReading {
            position,
            velocity,
            applied_effort: joint.applied_effort,
        })
    }

    fn set_joint_position(
        &mut self,
        robot: RobotHandle,
        index: usize,
        target: f64,
    ) -> Result<(), PhysicsError> {
        self.ensure_connected()?;
        let joint = Self::joint_mut(&mut self.robots, robot, index)?;
        let target = target as f32;
        if let Some(j) = joint
            .impulse
            .and_then(|h| self.impulse_joints.get_mut(h, true))
        {
            j.data.set_motor_position(
                motor_axis(joint.joint_type),
                target,
                DEFAULT_MOTOR_STIFFNESS,
                DEFAULT_MOTOR_DAMPING,
            );
        }
        joint.drive = Drive::Position(target);
        Ok(())
    }

    fn set_joint_velocity(
        &mut self,
        robot: RobotHandle,
        index: usize,
        target: f64,
    ) -> Result<(), PhysicsError> {
        self.ensure_connected()?;
        let joint = Self::joint_mut(&mut self.robots, robot, index)?;
        let target = target as f32;
        if let Some(j) = joint
            .impulse
            .and_then(|h| self.impulse_joints.get_mut(h, true))
        {
            j.data
                .set_motor_velocity(motor_axis(joint.joint_type), target, DEFAULT_VELOCITY_FACTOR);
        }
        joint.drive = Drive::Velocity(target);
        Ok(())
    }

    fn set_joint_effort(
        &mut self,
        robot: RobotHandle,
        index: usize,
        effort: f64,
    ) -> Result<(), PhysicsError> {
        self.ensure_connected()?;
        let joint = Self::joint_mut(&mut self.robots, robot, index)?;
        let effort = (effort as f32).clamp(-joint.max_force, joint.max_force);
        // Switch the motor off so only the raw effort acts.
        if let Some(j) = joint
            .impulse
            .and_then(|h| self.impulse_joints.get_mut(h, true))
        {
            j.data
                .set_motor(motor_axis(joint.joint_type), 0.0, 0.0, 0.0, 0.0);
        }
        joint.drive = Drive::Effort(effort);
        Ok(())
    }

    fn step_simulation(&mut self) -> Result<(), PhysicsError> {
        self.ensure_connected()?;
        self.apply_drives();

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );

        self.clear_effort_drives();
        Ok(())
    }

    fn reset_simulation(&mut self) -> Result<(), PhysicsError> {
        self.ensure_connected()?;
        self.clear_world();
        self.gravity = Vector3::zeros();
        debug!("world cleared");
        Ok(())
    }
}
