//! Convex/convex pair handler: GJK with a penetration fallback feeding a
//! persistent manifold, plus swept-sphere time of impact.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::algorithm::{CollisionAlgorithm, DispatchInfo};
use super::ccd::GjkConvexCast;
use super::gjk::{ClosestPointInput, ClosestPointResult, GjkPairDetector, LastUsedMethod};
use super::manifold::{ManifoldPool, ManifoldResult, ManifoldSlot, PersistentManifold};
use crate::config::CollisionConfig;
use crate::core::collision_object::CollisionObject;
use crate::core::shape::{ConvexGeometry, ConvexShape};
use crate::core::types::Transform;

#[derive(Debug)]
pub struct ConvexConvexAlgorithm {
    body0: usize,
    body1: usize,
    detector: GjkPairDetector,
    manifold: ManifoldSlot,
    pool: Arc<ManifoldPool>,
    config: CollisionConfig,
}

impl ConvexConvexAlgorithm {
    pub fn new(body0: usize, body1: usize, pool: Arc<ManifoldPool>, config: CollisionConfig) -> Self {
        debug!("convex/convex algorithm created for bodies {body0}/{body1}");
        Self {
            body0,
            body1,
            detector: GjkPairDetector::from_config(&config),
            manifold: ManifoldSlot::Empty,
            pool,
            config,
        }
    }

    /// Writes into a manifold owned by someone else (the triangle
    /// sub-dispatch of a convex/concave pair).
    pub fn with_shared_manifold(
        body0: usize,
        body1: usize,
        manifold: Arc<Mutex<PersistentManifold>>,
        pool: Arc<ManifoldPool>,
        config: CollisionConfig,
    ) -> Self {
        Self {
            body0,
            body1,
            detector: GjkPairDetector::from_config(&config),
            manifold: ManifoldSlot::Shared(manifold),
            pool,
            config,
        }
    }

    pub fn bodies(&self) -> (usize, usize) {
        (self.body0, self.body1)
    }

    pub fn detector(&self) -> &GjkPairDetector {
        &self.detector
    }

    pub fn owns_manifold(&self) -> bool {
        self.manifold.is_owned()
    }

    pub fn owned_manifold(&self) -> Option<&PersistentManifold> {
        match &self.manifold {
            ManifoldSlot::Owned(manifold) => Some(manifold),
            _ => None,
        }
    }

    pub(crate) fn refresh_config(&mut self, config: &CollisionConfig) {
        if *config == self.config {
            return;
        }
        debug!(
            "bodies {}/{}: collision configuration changed, refreshing detector",
            self.body0, self.body1
        );
        self.config = *config;
        self.detector.apply_config(config);
        match &mut self.manifold {
            ManifoldSlot::Owned(manifold) => {
                manifold.set_breaking_threshold(config.contact_breaking_threshold)
            }
            ManifoldSlot::Shared(manifold) => manifold
                .lock()
                .set_breaking_threshold(config.contact_breaking_threshold),
            ManifoldSlot::Empty => {}
        }
    }

    fn ensure_manifold(&mut self) {
        if self.manifold.is_empty() {
            self.manifold = ManifoldSlot::Owned(self.pool.acquire(
                self.body0,
                self.body1,
                self.config.contact_breaking_threshold,
            ));
        }
    }

    /// Closest points of the two shapes, `None` when farther apart than the
    /// margins plus the breaking threshold.
    pub fn closest_points(
        &mut self,
        shape_a: &ConvexShape,
        transform_a: &Transform,
        shape_b: &ConvexShape,
        transform_b: &Transform,
    ) -> Option<ClosestPointResult> {
        let threshold = self.config.contact_breaking_threshold;
        if self.config.sphere_sphere_fast_path {
            if let Some(result) =
                sphere_sphere(shape_a, transform_a, shape_b, transform_b, threshold)
            {
                return result;
            }
        }

        let max_distance = shape_a.margin() + shape_b.margin() + threshold;
        let input = self.closest_point_input(transform_a, transform_b, max_distance);
        self.detector.get_closest_points(&input, shape_a, shape_b)
    }

    fn closest_point_input(
        &self,
        transform_a: &Transform,
        transform_b: &Transform,
        max_distance: f32,
    ) -> ClosestPointInput {
        ClosestPointInput::new(*transform_a, *transform_b)
            .with_max_distance(max_distance)
            .with_pair_ids(self.body0, self.body1)
    }

    fn store(
        &mut self,
        result: Option<ClosestPointResult>,
        transforms: (Transform, Transform),
        swapped: bool,
        triangle_ids: Option<(i32, i32)>,
        refresh: bool,
    ) {
        let write = |manifold: &mut PersistentManifold| {
            let mut out =
                ManifoldResult::new(manifold, transforms.0, transforms.1).with_swapped(swapped);
            if let Some((part_id, index)) = triangle_ids {
                out.set_shape_identifiers_b(part_id, index);
            }
            if let Some(result) = &result {
                out.add_contact(result);
            }
            if refresh {
                out.refresh_contact_points();
            }
        };
        match &mut self.manifold {
            ManifoldSlot::Owned(manifold) => write(manifold),
            ManifoldSlot::Shared(manifold) => write(&mut manifold.lock()),
            ManifoldSlot::Empty => {}
        }
    }

    /// Collides `convex` against one triangle of a concave shape.
    ///
    /// When `swapped` is set the concave shape is body0 of the manifold.
    /// Refreshing is left to the parent after all triangles are processed.
    #[allow(clippy::too_many_arguments)]
    pub fn process_triangle(
        &mut self,
        convex: &ConvexShape,
        convex_transform: &Transform,
        triangle: &ConvexShape,
        concave_transform: &Transform,
        part_id: i32,
        triangle_index: i32,
        swapped: bool,
    ) {
        self.ensure_manifold();
        let result = self.closest_points(convex, convex_transform, triangle, concave_transform);
        let transforms = if swapped {
            (*concave_transform, *convex_transform)
        } else {
            (*convex_transform, *concave_transform)
        };
        self.store(
            result,
            transforms,
            swapped,
            Some((part_id, triangle_index)),
            false,
        );
    }
}

/// Closed-form sphere/sphere contact. Returns `None` when either shape is
/// not a sphere, `Some(None)` when the spheres are out of range.
fn sphere_sphere(
    shape_a: &ConvexShape,
    transform_a: &Transform,
    shape_b: &ConvexShape,
    transform_b: &Transform,
    threshold: f32,
) -> Option<Option<ClosestPointResult>> {
    let (ConvexGeometry::Sphere { .. }, ConvexGeometry::Sphere { .. }) =
        (&shape_a.geometry, &shape_b.geometry)
    else {
        return None;
    };
    let radius_a = shape_a.margin();
    let radius_b = shape_b.margin();

    let delta = transform_b.position - transform_a.position;
    let length = delta.length();
    if length > radius_a + radius_b + threshold {
        return Some(None);
    }

    let normal = if length > f32::EPSILON {
        delta / length
    } else {
        glam::Vec3::X
    };
    Some(Some(ClosestPointResult {
        normal,
        point_on_a: transform_a.position + normal * radius_a,
        point_on_b: transform_b.position - normal * radius_b,
        distance: length - radius_a - radius_b,
        method: LastUsedMethod::Analytic,
    }))
}

impl CollisionAlgorithm for ConvexConvexAlgorithm {
    fn process_collision(
        &mut self,
        body0: &CollisionObject,
        body1: &CollisionObject,
        info: &DispatchInfo,
    ) {
        self.refresh_config(&info.config);
        let (Some(shape0), Some(shape1)) = (body0.shape.as_convex(), body1.shape.as_convex())
        else {
            return;
        };
        self.ensure_manifold();

        let transforms = (body0.world_transform, body1.world_transform);
        let result = self.closest_points(shape0, &transforms.0, shape1, &transforms.1);
        let refresh = self.manifold.is_owned();
        self.store(result, transforms, false, None, refresh);
    }

    fn calculate_time_of_impact(
        &mut self,
        body0: &CollisionObject,
        body1: &CollisionObject,
        info: &DispatchInfo,
    ) -> f32 {
        if !info.config.ccd_enabled {
            return 1.0;
        }
        if body0.motion_squared() < body0.ccd_square_motion_threshold
            && body1.motion_squared() < body1.ccd_square_motion_threshold
        {
            return 1.0;
        }
        let (Some(shape0), Some(shape1)) = (body0.shape.as_convex(), body1.shape.as_convex())
        else {
            return 1.0;
        };

        let mut fraction = 1.0f32;

        let sphere1 = ConvexShape::sphere(body1.ccd_swept_sphere_radius);
        if let Some(hit) = GjkConvexCast::new(shape0, &sphere1).calc_time_of_impact(
            &body0.interpolation_world_transform,
            &body0.world_transform,
            &body1.interpolation_world_transform,
            &body1.world_transform,
            info.allowed_ccd_penetration,
        ) {
            fraction = fraction.min(hit.fraction);
        }

        let sphere0 = ConvexShape::sphere(body0.ccd_swept_sphere_radius);
        if let Some(hit) = GjkConvexCast::new(&sphere0, shape1).calc_time_of_impact(
            &body0.interpolation_world_transform,
            &body0.world_transform,
            &body1.interpolation_world_transform,
            &body1.world_transform,
            info.allowed_ccd_penetration,
        ) {
            fraction = fraction.min(hit.fraction);
        }

        fraction
    }

    fn collect_manifolds(&self, out: &mut Vec<PersistentManifold>) {
        if let ManifoldSlot::Owned(manifold) = &self.manifold {
            out.push(manifold.clone());
        }
    }
}

impl Drop for ConvexConvexAlgorithm {
    fn drop(&mut self) {
        if let ManifoldSlot::Owned(manifold) = std::mem::take(&mut self.manifold) {
            self.pool.release(manifold);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::Vec3;

    fn object(shape: ConvexShape, position: Vec3) -> CollisionObject {
        CollisionObject::new(Arc::new(shape.into()), Transform::from_position(position))
    }

    fn algorithm(config: CollisionConfig) -> (ConvexConvexAlgorithm, Arc<ManifoldPool>) {
        let pool = ManifoldPool::shared(16);
        (ConvexConvexAlgorithm::new(0, 1, Arc::clone(&pool), config), pool)
    }

    #[test]
    fn closest_point_input_keeps_full_body_indices() {
        let pool = ManifoldPool::shared(1);
        let body0 = usize::MAX - 1;
        let body1 = (u32::MAX as usize).saturating_add(7);
        let algorithm = ConvexConvexAlgorithm::new(body0, body1, pool, CollisionConfig::default());
        let input = algorithm.closest_point_input(&Transform::IDENTITY, &Transform::IDENTITY, 1.0);
        assert_eq!(input.pair_ids, Some((body0, body1)));
        assert_eq!(input.max_distance_squared, 1.0);
    }

    #[test]
    fn resting_box_produces_upward_contact() {
        let (mut algo, _pool) = algorithm(CollisionConfig::default());
        let ground = object(ConvexShape::cuboid(Vec3::new(5.0, 0.5, 5.0)), Vec3::ZERO);
        let sphere = object(ConvexShape::sphere(0.5), Vec3::new(0.0, 0.99, 0.0));

        algo.process_collision(&ground, &sphere, &DispatchInfo::default());

        let manifold = algo.owned_manifold().expect("manifold allocated");
        assert_eq!(manifold.num_contacts(), 1);
        let point = manifold.points()[0];
        assert_abs_diff_eq!(point.normal_world.y, 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(point.distance, -0.01, epsilon = 1e-3);
    }

    #[test]
    fn manifold_is_allocated_lazily_and_returned_on_drop() {
        let (mut algo, pool) = algorithm(CollisionConfig::default());
        assert!(!algo.owns_manifold());

        let a = object(ConvexShape::sphere(0.5), Vec3::ZERO);
        let b = object(ConvexShape::sphere(0.5), Vec3::new(5.0, 0.0, 0.0));
        algo.process_collision(&a, &b, &DispatchInfo::default());
        assert!(algo.owns_manifold());
        assert!(algo.owned_manifold().is_some_and(|m| m.is_empty()));

        drop(algo);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.stats().live, 0);
    }

    #[test]
    fn sphere_fast_path_agrees_with_gjk() {
        let a = object(ConvexShape::sphere(0.5), Vec3::ZERO);
        let b = object(ConvexShape::sphere(0.7), Vec3::new(1.1, 0.2, 0.0));

        let (mut fast, _p0) = algorithm(CollisionConfig {
            sphere_sphere_fast_path: true,
            ..CollisionConfig::default()
        });
        let (mut slow, _p1) = algorithm(CollisionConfig::default());
        let fast_result = fast
            .closest_points(
                a.shape.as_convex().unwrap(),
                &a.world_transform,
                b.shape.as_convex().unwrap(),
                &b.world_transform,
            )
            .expect("overlapping");
        let slow_result = slow
            .closest_points(
                a.shape.as_convex().unwrap(),
                &a.world_transform,
                b.shape.as_convex().unwrap(),
                &b.world_transform,
            )
            .expect("overlapping");

        assert_eq!(fast_result.method, LastUsedMethod::Analytic);
        assert_ne!(slow_result.method, LastUsedMethod::Analytic);
        assert_abs_diff_eq!(fast_result.distance, slow_result.distance, epsilon = 1e-2);
        assert!(fast_result.normal.dot(slow_result.normal) > 0.99);
    }

    #[test]
    fn config_change_is_picked_up_on_next_process() {
        let (mut algo, _pool) = algorithm(CollisionConfig::default());
        let a = object(ConvexShape::sphere(0.5), Vec3::ZERO);
        let b = object(ConvexShape::sphere(0.5), Vec3::new(0.9, 0.0, 0.0));

        let config = CollisionConfig {
            contact_breaking_threshold: 0.5,
            ..CollisionConfig::default()
        };
        algo.process_collision(&a, &b, &DispatchInfo::default().with_config(config));
        let manifold = algo.owned_manifold().expect("manifold allocated");
        assert_eq!(manifold.breaking_threshold(), 0.5);
        assert_eq!(manifold.num_contacts(), 1);
    }

    #[test]
    fn slow_bodies_skip_time_of_impact() {
        let (mut algo, _pool) = algorithm(CollisionConfig::default());
        let a = object(ConvexShape::sphere(0.5), Vec3::ZERO).with_ccd(0.4, 1.0);
        let b = object(ConvexShape::sphere(0.5), Vec3::new(3.0, 0.0, 0.0)).with_ccd(0.4, 1.0);
        assert_eq!(algo.calculate_time_of_impact(&a, &b, &DispatchInfo::default()), 1.0);
    }

    #[test]
    fn fast_body_reports_time_of_impact() {
        let (mut algo, _pool) = algorithm(CollisionConfig::default());
        let mut bullet = object(ConvexShape::sphere(0.1), Vec3::new(5.0, 0.0, 0.0)).with_ccd(0.1, 0.1);
        bullet.interpolation_world_transform = Transform::from_position(Vec3::new(-5.0, 0.0, 0.0));
        let wall = object(ConvexShape::cuboid(Vec3::new(0.1, 2.0, 2.0)), Vec3::ZERO).with_ccd(0.1, 0.1);

        let toi = algo.calculate_time_of_impact(&bullet, &wall, &DispatchInfo::default());
        assert!(toi < 1.0);
        // Sphere surface reaches the wall face once the center is at x = -0.2.
        assert_abs_diff_eq!(toi, 0.48, epsilon = 0.01);
    }
}
