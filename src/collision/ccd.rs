//! Continuous collision: conservative advancement on top of GJK.

use glam::Vec3;
use log::trace;

use super::gjk::{ClosestPointInput, GjkPairDetector};
use crate::core::shape::ConvexShape;
use crate::core::types::Transform;

pub const CAST_MAX_ITERATIONS: u32 = 32;
/// Distance at which the cast reports contact.
pub const CAST_CONTACT_TOLERANCE: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CastResult {
    /// Fraction of the motion in `[0, 1]` at which the shapes touch.
    pub fraction: f32,
    /// Contact normal pointing from A toward B.
    pub normal: Vec3,
    /// Point on B at the time of impact.
    pub hit_point: Vec3,
    pub allowed_penetration: f32,
}

/// Sweeps two convex shapes along linear motions and finds the first time
/// they come within [`CAST_CONTACT_TOLERANCE`]. Rotations are held at their
/// start orientation.
#[derive(Debug)]
pub struct GjkConvexCast<'a> {
    shape_a: &'a ConvexShape,
    shape_b: &'a ConvexShape,
    detector: GjkPairDetector,
    pub max_iterations: u32,
    pub contact_tolerance: f32,
}

impl<'a> GjkConvexCast<'a> {
    pub fn new(shape_a: &'a ConvexShape, shape_b: &'a ConvexShape) -> Self {
        Self {
            shape_a,
            shape_b,
            detector: GjkPairDetector::new(None),
            max_iterations: CAST_MAX_ITERATIONS,
            contact_tolerance: CAST_CONTACT_TOLERANCE,
        }
    }

    /// Casts the margin-free cores instead of the inflated shapes.
    pub fn with_ignore_margin(mut self, ignore: bool) -> Self {
        self.detector.ignore_margin = ignore;
        self
    }

    fn closest(&mut self, transform_a: Transform, transform_b: Transform) -> Option<(f32, Vec3, Vec3)> {
        self.detector
            .get_closest_points(
                &ClosestPointInput::new(transform_a, transform_b),
                self.shape_a,
                self.shape_b,
            )
            .map(|result| (result.distance, result.normal, result.point_on_b))
    }

    /// Returns the time of impact, or `None` when the shapes never come into
    /// contact during the motion or approach slower than
    /// `allowed_penetration` along the contact normal.
    pub fn calc_time_of_impact(
        &mut self,
        from_a: &Transform,
        to_a: &Transform,
        from_b: &Transform,
        to_b: &Transform,
        allowed_penetration: f32,
    ) -> Option<CastResult> {
        let motion_a = to_a.position - from_a.position;
        let motion_b = to_b.position - from_b.position;
        let relative = motion_a - motion_b;

        let (mut distance, mut normal, mut hit_point) = self.closest(*from_a, *from_b)?;
        distance += allowed_penetration;

        let mut lambda = 0.0f32;
        let mut last_lambda = lambda;
        let mut iterations = 0;

        while distance > self.contact_tolerance {
            iterations += 1;
            if iterations > self.max_iterations {
                trace!("convex cast exceeded {} iterations", self.max_iterations);
                return None;
            }

            let closing_speed = relative.dot(normal);
            if closing_speed <= f32::EPSILON {
                return None;
            }
            lambda += distance / closing_speed;
            if !(0.0..=1.0).contains(&lambda) || lambda <= last_lambda {
                return None;
            }
            last_lambda = lambda;

            let step_a = Transform {
                position: from_a.position.lerp(to_a.position, lambda),
                ..*from_a
            };
            let step_b = Transform {
                position: from_b.position.lerp(to_b.position, lambda),
                ..*from_b
            };

            let (next_distance, next_normal, next_hit) = self.closest(step_a, step_b)?;
            if next_distance < 0.0 {
                return Some(CastResult {
                    fraction: last_lambda,
                    normal: next_normal,
                    hit_point: next_hit,
                    allowed_penetration,
                });
            }
            distance = next_distance;
            normal = next_normal;
            hit_point = next_hit;
        }

        if relative.dot(normal) <= allowed_penetration {
            return None;
        }

        Some(CastResult {
            fraction: lambda,
            normal,
            hit_point,
            allowed_penetration,
        })
    }
}
