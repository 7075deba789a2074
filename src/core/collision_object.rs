use std::sync::Arc;

use glam::Vec3;

use super::shape::CollisionShape;
use super::types::{Aabb, Transform};

/// Behaviour switches of a collision object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionFlags {
    pub is_static: bool,
    pub is_kinematic: bool,
    /// Sensor: contacts are generated, but the object never lowers a hit
    /// fraction in the continuous pass.
    pub no_contact_response: bool,
}

/// Anything that takes part in collision detection.
#[derive(Debug, Clone)]
pub struct CollisionObject {
    pub shape: Arc<CollisionShape>,
    pub world_transform: Transform,
    /// Transform at the start of the current step; CCD sweeps from here.
    pub interpolation_world_transform: Transform,
    pub hit_fraction: f32,
    pub ccd_swept_sphere_radius: f32,
    pub ccd_square_motion_threshold: f32,
    pub flags: CollisionFlags,
}

impl CollisionObject {
    pub fn new(shape: Arc<CollisionShape>, transform: Transform) -> Self {
        Self {
            shape,
            world_transform: transform,
            interpolation_world_transform: transform,
            hit_fraction: 1.0,
            ccd_swept_sphere_radius: 0.0,
            ccd_square_motion_threshold: 0.0,
            flags: CollisionFlags::default(),
        }
    }

    pub fn with_ccd(mut self, swept_sphere_radius: f32, motion_threshold: f32) -> Self {
        self.ccd_swept_sphere_radius = swept_sphere_radius.max(0.0);
        self.ccd_square_motion_threshold = motion_threshold * motion_threshold;
        self
    }

    pub fn is_static(&self) -> bool {
        self.flags.is_static
    }

    pub fn is_kinematic(&self) -> bool {
        self.flags.is_kinematic
    }

    pub fn is_static_or_kinematic(&self) -> bool {
        self.flags.is_static || self.flags.is_kinematic
    }

    pub fn has_contact_response(&self) -> bool {
        !self.flags.no_contact_response
    }

    pub fn aabb(&self) -> Aabb {
        self.shape.aabb(&self.world_transform)
    }

    /// Bounds covering the object at both ends of the step.
    pub fn swept_aabb(&self) -> Aabb {
        self.shape
            .aabb(&self.interpolation_world_transform)
            .merged(&self.aabb())
    }

    /// Squared linear motion over the current step.
    pub fn motion_squared(&self) -> f32 {
        self.linear_motion().length_squared()
    }

    pub fn linear_motion(&self) -> Vec3 {
        self.world_transform.position - self.interpolation_world_transform.position
    }

    /// Lowers the hit fraction; a larger value never raises it.
    pub fn clamp_hit_fraction(&mut self, fraction: f32) {
        if fraction < self.hit_fraction {
            self.hit_fraction = fraction.max(0.0);
        }
    }

    pub fn reset_hit_fraction(&mut self) {
        self.hit_fraction = 1.0;
    }
}

impl AsRef<CollisionObject> for CollisionObject {
    fn as_ref(&self) -> &CollisionObject {
        self
    }
}

impl AsMut<CollisionObject> for CollisionObject {
    fn as_mut(&mut self) -> &mut CollisionObject {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shape::ConvexShape;

    #[test]
    fn hit_fraction_only_decreases() {
        let mut object = CollisionObject::new(
            Arc::new(ConvexShape::sphere(1.0).into()),
            Transform::IDENTITY,
        );
        object.clamp_hit_fraction(0.6);
        object.clamp_hit_fraction(0.9);
        assert_eq!(object.hit_fraction, 0.6);
        object.clamp_hit_fraction(0.2);
        assert_eq!(object.hit_fraction, 0.2);
        object.reset_hit_fraction();
        assert_eq!(object.hit_fraction, 1.0);
    }

    #[test]
    fn motion_is_measured_from_interpolation_transform() {
        let mut object = CollisionObject::new(
            Arc::new(ConvexShape::sphere(1.0).into()),
            Transform::IDENTITY,
        );
        object.world_transform.position = Vec3::new(3.0, 4.0, 0.0);
        assert_eq!(object.motion_squared(), 25.0);
        let swept = object.swept_aabb();
        assert_eq!(swept.min, Vec3::splat(-1.0));
        assert_eq!(swept.max, Vec3::new(4.0, 5.0, 1.0));
    }
}
