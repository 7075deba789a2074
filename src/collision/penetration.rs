//! Penetration-depth solvers used when GJK finds the cores overlapping.

use std::fmt;
use std::sync::Arc;

use glam::Vec3;

use super::gjk::{ClosestPointInput, GjkPairDetector};
use super::simplex::VoronoiSimplexSolver;
use crate::config::PenetrationStrategy;
use crate::core::shape::{ConvexGeometry, ConvexShape};
use crate::core::types::Transform;

pub use super::epa::EpaPenetrationDepthSolver;

/// Witness points of a penetrating pair.
///
/// `distance = -|point_on_b - point_on_a|` and
/// `normal = normalize(point_on_b - point_on_a)`, which points from B toward
/// A while the shapes overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenetrationDepth {
    pub point_on_a: Vec3,
    pub point_on_b: Vec3,
}

impl PenetrationDepth {
    pub fn distance(&self) -> f32 {
        -(self.point_on_b - self.point_on_a).length()
    }

    /// `None` when the witness points coincide.
    pub fn normal(&self) -> Option<Vec3> {
        let delta = self.point_on_b - self.point_on_a;
        if delta.length_squared() <= f32::EPSILON * f32::EPSILON {
            None
        } else {
            Some(delta.normalize())
        }
    }

    /// Normal in the A-toward-B convention of closest-point results.
    pub fn pair_normal(&self) -> Option<Vec3> {
        self.normal().map(|n| -n)
    }

    pub(crate) fn is_degenerate(&self) -> bool {
        self.normal().is_none()
    }
}

pub trait PenetrationDepthSolver: Send + Sync + fmt::Debug {
    /// Computes witness points for two overlapping shapes. Returns `None`
    /// when the shapes are separated or the result would be degenerate.
    fn calc_pen_depth(
        &self,
        simplex: &mut VoronoiSimplexSolver,
        shape_a: &ConvexShape,
        shape_b: &ConvexShape,
        transform_a: &Transform,
        transform_b: &Transform,
    ) -> Option<PenetrationDepth>;
}

/// Builds the solver selected by a configuration.
pub fn solver_for(strategy: PenetrationStrategy) -> Option<Arc<dyn PenetrationDepthSolver>> {
    match strategy {
        PenetrationStrategy::Epa => Some(Arc::new(EpaPenetrationDepthSolver::default())),
        PenetrationStrategy::Sampled => Some(Arc::new(SampledPenetrationDepthSolver)),
        PenetrationStrategy::Disabled => None,
    }
}

/// Separation added when pulling A out of B before the refining GJK query.
const SEPARATION_PADDING: f32 = 1.0;

/// Finds the direction of least overlap over a fixed set of directions
/// and refines the witness points with a margin-aware GJK query.
#[derive(Debug, Default, Clone, Copy)]
pub struct SampledPenetrationDepthSolver;

impl SampledPenetrationDepthSolver {
    fn candidate_directions(
        shape_a: &ConvexShape,
        transform_a: &Transform,
        shape_b: &ConvexShape,
        transform_b: &Transform,
    ) -> Vec<Vec3> {
        let mut directions = Vec::with_capacity(38);
        for x in -1..=1 {
            for y in -1..=1 {
                for z in -1..=1 {
                    if (x, y, z) != (0, 0, 0) {
                        directions.push(Vec3::new(x as f32, y as f32, z as f32).normalize());
                    }
                }
            }
        }
        for (shape, transform) in [(shape_a, transform_a), (shape_b, transform_b)] {
            if let ConvexGeometry::Box { .. } = shape.geometry {
                let basis = transform.basis();
                for axis in [basis.x_axis, basis.y_axis, basis.z_axis] {
                    directions.push(axis);
                    directions.push(-axis);
                }
            }
        }
        directions
    }
}

impl PenetrationDepthSolver for SampledPenetrationDepthSolver {
    fn calc_pen_depth(
        &self,
        simplex: &mut VoronoiSimplexSolver,
        shape_a: &ConvexShape,
        shape_b: &ConvexShape,
        transform_a: &Transform,
        transform_b: &Transform,
    ) -> Option<PenetrationDepth> {
        let margin = shape_a.margin() + shape_b.margin();

        let mut best: Option<(f32, Vec3)> = None;
        for normal in Self::candidate_directions(shape_a, transform_a, shape_b, transform_b) {
            let on_a = shape_a.support_world_without_margin(normal, transform_a);
            let on_b = shape_b.support_world_without_margin(-normal, transform_b);
            let overlap = normal.dot(on_a - on_b) + margin;
            if best.map_or(true, |(min_overlap, _)| overlap < min_overlap) {
                best = Some((overlap, normal));
            }
        }

        let (overlap, normal) = best?;
        if overlap < 0.0 {
            return None;
        }

        let shift = overlap + SEPARATION_PADDING;
        let displaced_a = Transform {
            position: transform_a.position - normal * shift,
            ..*transform_a
        };

        simplex.reset();
        let mut detector = GjkPairDetector::new(None).with_simplex(std::mem::take(simplex));
        detector.catch_degeneracies = false;
        let refined = detector.get_closest_points(
            &ClosestPointInput::new(displaced_a, *transform_b),
            shape_a,
            shape_b,
        );
        *simplex = detector.into_simplex();

        let refined = refined?;
        let point_on_b = refined.point_on_b;
        let point_on_a = point_on_b + normal * (shift - refined.distance);
        let depth = PenetrationDepth {
            point_on_a,
            point_on_b,
        };
        (!depth.is_degenerate()).then_some(depth)
    }
}
