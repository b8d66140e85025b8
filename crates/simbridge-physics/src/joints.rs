//! Joint conversion from URDF to Rapier, and joint-space measurement.

use std::f32::consts::PI;

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use rapier3d::dynamics::{
    GenericJoint, GenericJointBuilder, JointAxesMask, JointAxis, MotorModel, RigidBody,
};

use crate::backend::JointType;

/// Position-control stiffness.
pub const DEFAULT_MOTOR_STIFFNESS: f32 = 1000.0;
/// Position-control damping.
pub const DEFAULT_MOTOR_DAMPING: f32 = 100.0;
/// Velocity-control gain.
pub const DEFAULT_VELOCITY_FACTOR: f32 = 100.0;
/// Motor force bound when the description gives no effort limit.
pub const DEFAULT_MAX_FORCE: f32 = 1000.0;

/// Joint frames in parent and child body space.
///
/// Both frames put the joint axis on their local X axis and coincide in world
/// space when the robot is in its loaded configuration, so the joint
/// coordinate is zero there.
pub fn joint_frames(origin: Isometry3<f32>, axis: Vector3<f32>) -> (Isometry3<f32>, Isometry3<f32>) {
    let axis = if axis.norm() > 1e-9 {
        axis.normalize()
    } else {
        Vector3::x()
    };
    let align = UnitQuaternion::rotation_between(&Vector3::x(), &axis)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI));
    let frame2 = Isometry3::from_parts(Translation3::identity(), align);
    let frame1 = origin * frame2;
    (frame1, frame2)
}

/// Create a Rapier joint for a URDF joint.
///
/// Returns `None` for floating joints, which leave the child body free.
pub fn urdf_joint_to_rapier(
    kind: &urdf_rs::JointType,
    frame1: Isometry3<f32>,
    frame2: Isometry3<f32>,
    limits: Option<[f32; 2]>,
    max_force: f32,
) -> Option<GenericJoint> {
    let locked = match kind {
        urdf_rs::JointType::Revolute | urdf_rs::JointType::Continuous => {
            JointAxesMask::LOCKED_REVOLUTE_AXES
        }
        urdf_rs::JointType::Prismatic => JointAxesMask::LOCKED_PRISMATIC_AXES,
        urdf_rs::JointType::Fixed => JointAxesMask::LOCKED_FIXED_AXES,
        urdf_rs::JointType::Spherical => JointAxesMask::LOCKED_SPHERICAL_AXES,
        // Translation in the plane normal to X, rotation about X.
        urdf_rs::JointType::Planar => {
            JointAxesMask::LIN_X | JointAxesMask::ANG_Y | JointAxesMask::ANG_Z
        }
        urdf_rs::JointType::Floating => return None,
    };

    // Parent/child pairs never collide, as in most articulated-body engines.
    let mut builder = GenericJointBuilder::new(locked)
        .local_frame1(frame1)
        .local_frame2(frame2)
        .contacts_enabled(false);

    let motor_axis = match kind {
        urdf_rs::JointType::Revolute | urdf_rs::JointType::Continuous => Some(JointAxis::AngX),
        urdf_rs::JointType::Prismatic => Some(JointAxis::LinX),
        _ => None,
    };

    if let Some(axis) = motor_axis {
        if let Some([lower, upper]) = limits {
            builder = builder.limits(axis, [lower, upper]);
        }
        builder = builder
            .motor_model(axis, MotorModel::ForceBased)
            .motor_max_force(axis, max_force);
    }

    Some(builder.build())
}

/// Get the motor axis for a joint type.
pub fn motor_axis(joint_type: JointType) -> JointAxis {
    match joint_type {
        JointType::Prismatic => JointAxis::LinX,
        _ => JointAxis::AngX,
    }
}

/// Joint coordinate and rate from the two linked bodies.
///
/// Revolute joints report the rotation of the child frame about the joint
/// axis relative to the parent frame; prismatic joints report the offset
/// along it. Other joint types have no scalar coordinate and read zero.
pub fn measure(
    joint_type: JointType,
    parent: &RigidBody,
    child: &RigidBody,
    frame1: &Isometry3<f32>,
    frame2: &Isometry3<f32>,
) -> (f64, f64) {
    let world1 = parent.position() * frame1;
    let world2 = child.position() * frame2;
    let world_axis = world1.rotation * Vector3::x();

    match joint_type {
        JointType::Revolute => {
            let relative = world1.rotation.inverse() * world2.rotation;
            let angle = relative.scaled_axis().x;
            let rate = (child.angvel() - parent.angvel()).dot(&world_axis);
            (f64::from(angle), f64::from(rate))
        }
        JointType::Prismatic => {
            let offset = world2.translation.vector - world1.translation.vector;
            let rate = (child.linvel() - parent.linvel()).dot(&world_axis);
            (f64::from(offset.dot(&world_axis)), f64::from(rate))
        }
        _ => (0.0, 0.0),
    }
}

/// World-space joint axis.
pub fn world_axis(parent: &RigidBody, frame1: &Isometry3<f32>) -> Vector3<f32> {
    (parent.position() * frame1).rotation * Vector3::x()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::dynamics::RigidBodyBuilder;

    #[test]
    fn test_frames_coincide_at_rest() {
        let origin = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.5),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3),
        );
        let (frame1, frame2) = joint_frames(origin, Vector3::new(0.0, 1.0, 0.0));

        // Child body sits at parent * origin.
        let parent = Isometry3::identity();
        let child = parent * origin;
        let w1 = parent * frame1;
        let w2 = child * frame2;
        assert!((w1.translation.vector - w2.translation.vector).norm() < 1e-6);
        assert!(w1.rotation.angle_to(&w2.rotation) < 1e-5);
        // Axis is mapped onto local X.
        let axis = frame2.rotation * Vector3::x();
        assert!((axis - Vector3::y()).norm() < 1e-6);
    }

    #[test]
    fn test_opposite_axis() {
        let (_, frame2) = joint_frames(Isometry3::identity(), Vector3::new(-1.0, 0.0, 0.0));
        let axis = frame2.rotation * Vector3::x();
        assert!((axis + Vector3::x()).norm() < 1e-5);
    }

    #[test]
    fn test_floating_has_no_constraint() {
        let (f1, f2) = joint_frames(Isometry3::identity(), Vector3::z());
        assert!(urdf_joint_to_rapier(&urdf_rs::JointType::Floating, f1, f2, None, 1.0).is_none());
        assert!(urdf_joint_to_rapier(&urdf_rs::JointType::Revolute, f1, f2, Some([-1.0, 1.0]), 1.0).is_some());
    }

    #[test]
    fn test_measure_revolute_angle() {
        let (frame1, frame2) = joint_frames(Isometry3::identity(), Vector3::z());
        let parent = RigidBodyBuilder::fixed().build();
        let child = RigidBodyBuilder::dynamic()
            .position(Isometry3::rotation(Vector3::new(0.0, 0.0, 0.4)))
            .angvel(Vector3::new(0.0, 0.0, 2.0))
            .build();

        let (position, velocity) = measure(JointType::Revolute, &parent, &child, &frame1, &frame2);
        assert!((position - 0.4).abs() < 1e-5);
        assert!((velocity - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_measure_prismatic_offset() {
        let (frame1, frame2) = joint_frames(Isometry3::identity(), Vector3::x());
        let parent = RigidBodyBuilder::fixed().build();
        let child = RigidBodyBuilder::dynamic()
            .translation(Vector3::new(0.25, 0.0, 0.0))
            .build();

        let (position, velocity) = measure(JointType::Prismatic, &parent, &child, &frame1, &frame2);
        assert!((position - 0.25).abs() < 1e-6);
        assert!(velocity.abs() < 1e-9);
    }
}
