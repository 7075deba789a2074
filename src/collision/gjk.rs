//! GJK closest-point query between two convex shapes.
//!
//! Results follow one convention throughout the narrow phase: `normal` points
//! from A toward B and `point_on_b = point_on_a + normal * distance`, with a
//! negative distance meaning penetration.

use std::sync::Arc;

use glam::Vec3;
use log::warn;

use super::penetration::{solver_for, PenetrationDepthSolver};
use super::simplex::VoronoiSimplexSolver;
use crate::config::{CollisionConfig, GJK_MAX_ITERATIONS, GJK_RELATIVE_ERROR2};
use crate::core::shape::ConvexShape;
use crate::core::types::Transform;

/// Stand-in for "unbounded" squared distances.
pub const LARGE_DISTANCE_SQUARED: f32 = 1.0e18;

/// Cores closer than this are double-checked by the penetration solver
/// when degeneracy catching is enabled.
const DEGENERATE_PENETRATION_GAP: f32 = 0.01;

/// Which branch produced the last closest-point result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastUsedMethod {
    #[default]
    None,
    GjkExact,
    GjkDegenerate,
    EpaSuccess,
    EpaFailed,
    /// Closed-form sphere-sphere test.
    Analytic,
}

/// Why the GJK loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimplexExit {
    #[default]
    None,
    /// Support point too far along the axis for the distance cutoff.
    Separated,
    /// Support point already in the simplex.
    InSimplex,
    /// Relative improvement below the error bound.
    Converged,
    /// Distance did not shrink between iterations.
    NoProgress,
    ClosestFailed,
    TinyAxis,
    FullSimplex,
    IterationCap,
}

impl SimplexExit {
    fn is_exact(self) -> bool {
        matches!(
            self,
            SimplexExit::Separated
                | SimplexExit::InSimplex
                | SimplexExit::Converged
                | SimplexExit::NoProgress
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClosestPointInput {
    pub transform_a: Transform,
    pub transform_b: Transform,
    /// Separations beyond `sqrt(max_distance_squared)` are not reported.
    pub max_distance_squared: f32,
    /// Pair identifiers, only used for diagnostics.
    pub pair_ids: Option<(usize, usize)>,
}

impl ClosestPointInput {
    pub fn new(transform_a: Transform, transform_b: Transform) -> Self {
        Self {
            transform_a,
            transform_b,
            max_distance_squared: LARGE_DISTANCE_SQUARED,
            pair_ids: None,
        }
    }

    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance_squared = max_distance * max_distance;
        self
    }

    pub fn with_pair_ids(mut self, body0: usize, body1: usize) -> Self {
        self.pair_ids = Some((body0, body1));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPointResult {
    /// Unit vector from A toward B.
    pub normal: Vec3,
    pub point_on_a: Vec3,
    pub point_on_b: Vec3,
    /// Signed separation; negative when penetrating.
    pub distance: f32,
    pub method: LastUsedMethod,
}

impl ClosestPointResult {
    /// Same contact seen from B.
    pub fn swapped(&self) -> Self {
        Self {
            normal: -self.normal,
            point_on_a: self.point_on_b,
            point_on_b: self.point_on_a,
            ..*self
        }
    }
}

/// Whether a penetration-solver result should replace the GJK result.
/// Only a strictly deeper contact wins.
pub fn prefer_penetration_result(
    gjk: Option<&ClosestPointResult>,
    penetration: &ClosestPointResult,
) -> bool {
    match gjk {
        None => true,
        Some(gjk) => penetration.distance < gjk.distance,
    }
}

#[derive(Debug, Clone)]
pub struct GjkPairDetector {
    /// Points from B toward A; kept between queries of the same pair.
    cached_separating_axis: Vec3,
    simplex: VoronoiSimplexSolver,
    penetration: Option<Arc<dyn PenetrationDepthSolver>>,
    pub catch_degeneracies: bool,
    pub ignore_margin: bool,
    max_iterations: u32,
    relative_error2: f32,
    last_used_method: LastUsedMethod,
    exit: SimplexExit,
    cur_iter: u32,
}

impl Default for GjkPairDetector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl GjkPairDetector {
    pub fn new(penetration: Option<Arc<dyn PenetrationDepthSolver>>) -> Self {
        Self {
            cached_separating_axis: Vec3::Y,
            simplex: VoronoiSimplexSolver::new(),
            penetration,
            catch_degeneracies: true,
            ignore_margin: false,
            max_iterations: GJK_MAX_ITERATIONS,
            relative_error2: GJK_RELATIVE_ERROR2,
            last_used_method: LastUsedMethod::None,
            exit: SimplexExit::None,
            cur_iter: 0,
        }
    }

    pub fn from_config(config: &CollisionConfig) -> Self {
        let mut detector = Self::new(None);
        detector.apply_config(config);
        detector
    }

    /// Reuses a simplex solver owned by the caller.
    pub fn with_simplex(mut self, simplex: VoronoiSimplexSolver) -> Self {
        self.simplex = simplex;
        self
    }

    pub fn into_simplex(self) -> VoronoiSimplexSolver {
        self.simplex
    }

    pub fn with_ignore_margin(mut self, ignore: bool) -> Self {
        self.ignore_margin = ignore;
        self
    }

    pub fn apply_config(&mut self, config: &CollisionConfig) {
        self.penetration = solver_for(config.penetration);
        self.catch_degeneracies = config.catch_degeneracies;
        self.max_iterations = config.max_gjk_iterations;
        self.relative_error2 = config.gjk_relative_error2;
    }

    pub fn set_penetration_solver(&mut self, solver: Option<Arc<dyn PenetrationDepthSolver>>) {
        self.penetration = solver;
    }

    pub fn cached_separating_axis(&self) -> Vec3 {
        self.cached_separating_axis
    }

    pub fn set_cached_separating_axis(&mut self, axis: Vec3) {
        self.cached_separating_axis = axis;
    }

    pub fn last_used_method(&self) -> LastUsedMethod {
        self.last_used_method
    }

    pub fn simplex_exit(&self) -> SimplexExit {
        self.exit
    }

    pub fn iterations(&self) -> u32 {
        self.cur_iter
    }

    /// Closest points between `shape_a` and `shape_b`, or `None` when they
    /// are farther apart than the input cutoff or no valid result exists.
    pub fn get_closest_points(
        &mut self,
        input: &ClosestPointInput,
        shape_a: &ConvexShape,
        shape_b: &ConvexShape,
    ) -> Option<ClosestPointResult> {
        let mut local_a = input.transform_a;
        let mut local_b = input.transform_b;
        let offset = (local_a.position + local_b.position) * 0.5;
        local_a.position -= offset;
        local_b.position -= offset;

        let (margin_a, margin_b) = if self.ignore_margin {
            (0.0, 0.0)
        } else {
            (shape_a.margin(), shape_b.margin())
        };
        let margin = margin_a + margin_b;

        if !self.cached_separating_axis.is_finite()
            || self.cached_separating_axis.length_squared() < f32::EPSILON * f32::EPSILON
        {
            self.cached_separating_axis = Vec3::Y;
        }

        self.cur_iter = 0;
        self.exit = SimplexExit::None;
        self.last_used_method = LastUsedMethod::None;
        self.simplex.reset();

        let mut squared_distance = LARGE_DISTANCE_SQUARED;
        let mut check_simplex = false;

        loop {
            let axis = self.cached_separating_axis;
            let p_world = shape_a.support_world_without_margin(-axis, &local_a);
            let q_world = shape_b.support_world_without_margin(axis, &local_b);
            let w = p_world - q_world;
            let delta = axis.dot(w);

            if delta > 0.0 && delta * delta > squared_distance * input.max_distance_squared {
                self.exit = SimplexExit::Separated;
                check_simplex = true;
                break;
            }

            if self.simplex.in_simplex(w) {
                self.exit = SimplexExit::InSimplex;
                check_simplex = true;
                break;
            }

            let f0 = squared_distance - delta;
            let f1 = squared_distance * self.relative_error2;
            if f0 <= f1 {
                self.exit = SimplexExit::Converged;
                check_simplex = true;
                break;
            }

            self.simplex.add_vertex(w, p_world, q_world);

            let Some(new_axis) = self.simplex.closest() else {
                self.exit = SimplexExit::ClosestFailed;
                check_simplex = true;
                break;
            };

            if new_axis.length_squared() < self.relative_error2 {
                self.cached_separating_axis = new_axis;
                self.exit = SimplexExit::TinyAxis;
                check_simplex = true;
                break;
            }

            let previous_squared_distance = squared_distance;
            squared_distance = new_axis.length_squared();
            if previous_squared_distance - squared_distance
                <= f32::EPSILON * previous_squared_distance
            {
                self.exit = SimplexExit::NoProgress;
                check_simplex = true;
                break;
            }

            self.cached_separating_axis = new_axis;

            self.cur_iter += 1;
            if self.cur_iter > self.max_iterations {
                self.exit = SimplexExit::IterationCap;
                warn!(
                    "gjk gave up after {} iterations (pair {:?}, axis {:?}, squared distance {}, shapes {:?}/{:?})",
                    self.cur_iter,
                    input.pair_ids,
                    self.cached_separating_axis,
                    squared_distance,
                    shape_a.shape_type(),
                    shape_b.shape_type(),
                );
                break;
            }

            if self.simplex.full_simplex() {
                self.exit = SimplexExit::FullSimplex;
                break;
            }
        }

        let mut result: Option<ClosestPointResult> = None;
        let mut distance = 0.0;

        if check_simplex && !self.simplex.empty_simplex() {
            let (mut point_on_a, mut point_on_b) = self.simplex.compute_points();
            let axis = self.cached_separating_axis;
            let len_sq = axis.length_squared();
            if len_sq > f32::EPSILON * f32::EPSILON && len_sq.is_finite() {
                let len = len_sq.sqrt();
                let normal = -axis / len;
                point_on_a += normal * margin_a;
                point_on_b -= normal * margin_b;
                distance = len - margin;
                let method = if self.exit.is_exact() {
                    LastUsedMethod::GjkExact
                } else {
                    LastUsedMethod::GjkDegenerate
                };
                self.last_used_method = method;
                result = Some(ClosestPointResult {
                    normal,
                    point_on_a,
                    point_on_b,
                    distance,
                    method,
                });
            } else {
                self.last_used_method = LastUsedMethod::GjkDegenerate;
            }
        }

        let catch_degenerate = self.catch_degeneracies
            && self.exit != SimplexExit::None
            && distance + margin < DEGENERATE_PENETRATION_GAP;

        if result.is_none() || catch_degenerate {
            if let Some(solver) = self.penetration.clone() {
                match solver.calc_pen_depth(&mut self.simplex, shape_a, shape_b, &local_a, &local_b)
                {
                    Some(depth) => {
                        if let Some(normal) = depth.pair_normal() {
                            let candidate = ClosestPointResult {
                                normal,
                                point_on_a: depth.point_on_a,
                                point_on_b: depth.point_on_b,
                                distance: depth.distance(),
                                method: LastUsedMethod::EpaSuccess,
                            };
                            if prefer_penetration_result(result.as_ref(), &candidate) {
                                self.last_used_method = LastUsedMethod::EpaSuccess;
                                result = Some(candidate);
                            }
                        }
                    }
                    None => {
                        if result.is_none() {
                            self.last_used_method = LastUsedMethod::EpaFailed;
                        }
                    }
                }
            }
        }

        let mut result = result?;
        if !(result.distance < 0.0 || result.distance * result.distance < input.max_distance_squared)
        {
            return None;
        }

        self.cached_separating_axis = -result.normal;
        result.point_on_a += offset;
        result.point_on_b += offset;
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::penetration::EpaPenetrationDepthSolver;
    use approx::assert_abs_diff_eq;
    use glam::Quat;

    fn spheres(d: Vec3) -> ClosestPointInput {
        ClosestPointInput::new(Transform::IDENTITY, Transform::from_position(d))
    }

    #[test]
    fn separated_spheres_report_gap_and_axis() {
        let mut detector = GjkPairDetector::default();
        let a = ConvexShape::sphere(1.0);
        let b = ConvexShape::sphere(0.5);
        let offset = Vec3::new(2.0, 3.0, -1.0);
        let result = detector
            .get_closest_points(&spheres(offset), &a, &b)
            .expect("spheres are within range");
        assert_abs_diff_eq!(result.distance, offset.length() - 1.5, epsilon = 1e-4);
        assert_abs_diff_eq!(result.normal.dot(offset.normalize()), 1.0, epsilon = 1e-4);
        let reconstructed = result.point_on_a + result.normal * result.distance;
        assert_abs_diff_eq!((reconstructed - result.point_on_b).length(), 0.0, epsilon = 1e-4);
        assert_eq!(detector.last_used_method(), LastUsedMethod::GjkExact);
    }

    #[test]
    fn cutoff_suppresses_far_pairs() {
        let mut detector = GjkPairDetector::default();
        let a = ConvexShape::sphere(1.0);
        let input = spheres(Vec3::new(10.0, 0.0, 0.0)).with_max_distance(1.0);
        assert!(detector.get_closest_points(&input, &a, &a).is_none());
    }

    #[test]
    fn box_distance_under_rotation() {
        let mut detector = GjkPairDetector::default();
        let a = ConvexShape::cuboid(Vec3::ONE);
        let b = ConvexShape::cuboid(Vec3::splat(0.5));
        let input = ClosestPointInput::new(
            Transform::IDENTITY,
            Transform::from_position_rotation(
                Vec3::new(0.0, 3.0, 0.0),
                Quat::from_rotation_y(0.6),
            ),
        );
        let result = detector.get_closest_points(&input, &a, &b).expect("in range");
        assert_abs_diff_eq!(result.distance, 1.5, epsilon = 1e-3);
        assert_abs_diff_eq!(result.normal.y, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn deep_overlap_falls_back_to_penetration_solver() {
        let mut detector =
            GjkPairDetector::new(Some(Arc::new(EpaPenetrationDepthSolver::default())));
        let a = ConvexShape::cuboid(Vec3::ONE);
        let b = ConvexShape::cuboid(Vec3::ONE);
        let input = ClosestPointInput::new(
            Transform::IDENTITY,
            Transform::from_position(Vec3::new(0.0, 1.5, 0.0)),
        );
        let result = detector.get_closest_points(&input, &a, &b).expect("overlap");
        assert_eq!(detector.last_used_method(), LastUsedMethod::EpaSuccess);
        assert_abs_diff_eq!(result.distance, -0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(result.normal.y, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn deep_overlap_without_solver_reports_nothing() {
        let mut detector = GjkPairDetector::new(None);
        let a = ConvexShape::cuboid(Vec3::ONE);
        let input = ClosestPointInput::new(Transform::IDENTITY, Transform::IDENTITY);
        assert!(detector.get_closest_points(&input, &a, &a).is_none());
    }

    #[test]
    fn penetration_result_must_be_strictly_deeper() {
        let gjk = ClosestPointResult {
            normal: Vec3::Y,
            point_on_a: Vec3::ZERO,
            point_on_b: Vec3::new(0.0, -0.1, 0.0),
            distance: -0.1,
            method: LastUsedMethod::GjkExact,
        };
        let same = ClosestPointResult {
            method: LastUsedMethod::EpaSuccess,
            ..gjk
        };
        let deeper = ClosestPointResult {
            distance: -0.1001,
            ..same
        };
        assert!(!prefer_penetration_result(Some(&gjk), &same));
        assert!(prefer_penetration_result(Some(&gjk), &deeper));
        assert!(prefer_penetration_result(None, &same));
    }

    #[test]
    fn swapped_result_mirrors_normal() {
        let result = ClosestPointResult {
            normal: Vec3::X,
            point_on_a: Vec3::ZERO,
            point_on_b: Vec3::new(0.5, 0.0, 0.0),
            distance: 0.5,
            method: LastUsedMethod::GjkExact,
        };
        let swapped = result.swapped();
        assert_eq!(swapped.normal, Vec3::NEG_X);
        assert_eq!(
            swapped.point_on_a + swapped.normal * swapped.distance,
            swapped.point_on_b
        );
    }
}
