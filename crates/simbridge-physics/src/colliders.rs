//! Collision shape generation from URDF geometry.

#![allow(clippy::cast_possible_truncation)]

use std::f32::consts::FRAC_PI_2;

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use rapier3d::geometry::{ColliderBuilder, Group, InteractionGroups};
use tracing::warn;

use crate::urdf::pose_to_isometry;

/// Default surface friction.
pub const DEFAULT_FRICTION: f32 = 0.5;
/// Default restitution.
pub const DEFAULT_RESTITUTION: f32 = 0.0;

/// Build a collider for one `<collision>` element.
///
/// Returns `None` for geometry that cannot be represented without loading
/// external files (meshes); the caller keeps the link massive but shapeless.
pub fn collision_to_collider(collision: &urdf_rs::Collision, link: &str) -> Option<ColliderBuilder> {
    let origin = pose_to_isometry(&collision.origin);
    let (builder, local) = match &collision.geometry {
        urdf_rs::Geometry::Box { size } => {
            let size: &[f64; 3] = size;
            (
                ColliderBuilder::cuboid(
                    size[0] as f32 / 2.0,
                    size[1] as f32 / 2.0,
                    size[2] as f32 / 2.0,
                ),
                origin,
            )
        }
        urdf_rs::Geometry::Sphere { radius } => (ColliderBuilder::ball(*radius as f32), origin),
        // URDF cylinders run along Z, Rapier's along Y.
        urdf_rs::Geometry::Cylinder { radius, length } => (
            ColliderBuilder::cylinder(*length as f32 / 2.0, *radius as f32),
            origin * z_up(),
        ),
        urdf_rs::Geometry::Capsule { radius, length } => (
            ColliderBuilder::capsule_z(*length as f32 / 2.0, *radius as f32),
            origin,
        ),
        urdf_rs::Geometry::Mesh { filename, .. } => {
            warn!("link {link}: mesh collision {filename} not supported, skipping");
            return None;
        }
    };

    Some(
        builder
            .position(local)
            .friction(DEFAULT_FRICTION)
            .restitution(DEFAULT_RESTITUTION),
    )
}

/// Collision groups for the links of one robot.
///
/// Without self collision the links of a robot share a group that filters
/// itself out; they still collide with everything else.
pub fn robot_collision_groups(self_collision: bool) -> InteractionGroups {
    if self_collision {
        InteractionGroups::all()
    } else {
        InteractionGroups::new(Group::GROUP_2, Group::ALL ^ Group::GROUP_2)
    }
}

fn z_up() -> Isometry3<f32> {
    Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2),
    )
}

/// Principal inertia of a URDF `<inertia>` tensor.
///
/// Off-diagonal terms are dropped; most descriptions list diagonal tensors.
pub fn principal_inertia(inertia: &urdf_rs::Inertia) -> Vector3<f32> {
    Vector3::new(inertia.ixx as f32, inertia.iyy as f32, inertia.izz as f32)
}
