//! Convex shape against a triangle soup (mesh or plane).

use std::sync::Arc;

use glam::Vec3;
use log::{debug, warn};
use parking_lot::Mutex;

use super::algorithm::{CollisionAlgorithm, DispatchInfo};
use super::ccd::GjkConvexCast;
use super::convex_convex::ConvexConvexAlgorithm;
use super::manifold::{ManifoldPool, ManifoldResult, PersistentManifold};
use crate::config::CollisionConfig;
use crate::core::collision_object::CollisionObject;
use crate::core::shape::ConvexShape;
use crate::core::types::{Aabb, Transform};

/// Runs a child convex/convex query per triangle overlapping the convex
/// shape's bounds. All triangles write into one manifold owned here.
#[derive(Debug)]
pub struct ConvexConcaveAlgorithm {
    body0: usize,
    body1: usize,
    /// Body0 is the concave one.
    swapped: bool,
    manifold: Option<Arc<Mutex<PersistentManifold>>>,
    child: Option<ConvexConvexAlgorithm>,
    pool: Arc<ManifoldPool>,
    config: CollisionConfig,
}

impl ConvexConcaveAlgorithm {
    pub fn new(
        body0: usize,
        body1: usize,
        swapped: bool,
        pool: Arc<ManifoldPool>,
        config: CollisionConfig,
    ) -> Self {
        debug!("convex/concave algorithm created for bodies {body0}/{body1} (swapped: {swapped})");
        Self {
            body0,
            body1,
            swapped,
            manifold: None,
            child: None,
            pool,
            config,
        }
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    pub fn manifold(&self) -> Option<PersistentManifold> {
        self.manifold.as_ref().map(|m| m.lock().clone())
    }

    fn ensure_manifold(&mut self) {
        if self.manifold.is_some() {
            return;
        }
        let manifold = Arc::new(Mutex::new(self.pool.acquire(
            self.body0,
            self.body1,
            self.config.contact_breaking_threshold,
        )));
        self.child = Some(ConvexConvexAlgorithm::with_shared_manifold(
            self.body0,
            self.body1,
            Arc::clone(&manifold),
            Arc::clone(&self.pool),
            self.config,
        ));
        self.manifold = Some(manifold);
    }

    fn split<'o>(
        &self,
        body0: &'o CollisionObject,
        body1: &'o CollisionObject,
    ) -> (&'o CollisionObject, &'o CollisionObject) {
        if self.swapped {
            (body1, body0)
        } else {
            (body0, body1)
        }
    }
}

impl CollisionAlgorithm for ConvexConcaveAlgorithm {
    fn process_collision(
        &mut self,
        body0: &CollisionObject,
        body1: &CollisionObject,
        info: &DispatchInfo,
    ) {
        if info.config != self.config {
            self.config = info.config;
            if let Some(manifold) = &self.manifold {
                manifold
                    .lock()
                    .set_breaking_threshold(info.config.contact_breaking_threshold);
            }
        }

        let (convex_object, concave_object) = self.split(body0, body1);
        let (Some(convex), Some(concave)) = (
            convex_object.shape.as_convex(),
            concave_object.shape.as_concave(),
        ) else {
            return;
        };

        self.ensure_manifold();
        let swapped = self.swapped;
        let convex_transform = convex_object.world_transform;
        let concave_transform = concave_object.world_transform;

        let convex_in_concave = concave_transform.inverse_times(&convex_transform);
        let triangle_margin = concave.margin();
        let query = convex
            .aabb(&convex_in_concave)
            .expanded(triangle_margin + self.config.contact_breaking_threshold);

        if let Some(child) = self.child.as_mut() {
            child.refresh_config(&info.config);
            concave.process_all_triangles(&query, &mut |vertices, part_id, triangle_index| {
                let triangle = ConvexShape::triangle(*vertices).with_margin(triangle_margin);
                child.process_triangle(
                    convex,
                    &convex_transform,
                    &triangle,
                    &concave_transform,
                    part_id,
                    triangle_index,
                    swapped,
                );
            });
        }

        if let Some(manifold) = &self.manifold {
            let mut manifold = manifold.lock();
            ManifoldResult::new(&mut manifold, body0.world_transform, body1.world_transform)
                .refresh_contact_points();
        }
    }

    /// Casts a sphere of the convex body's swept radius through every
    /// triangle within its swept bounds. Triangles are treated as static.
    fn calculate_time_of_impact(
        &mut self,
        body0: &CollisionObject,
        body1: &CollisionObject,
        info: &DispatchInfo,
    ) -> f32 {
        if !info.config.ccd_enabled {
            return 1.0;
        }
        let (convex_object, concave_object) = self.split(body0, body1);
        if convex_object.motion_squared() < convex_object.ccd_square_motion_threshold {
            return 1.0;
        }
        let Some(concave) = concave_object.shape.as_concave() else {
            return 1.0;
        };

        let to_local = concave_object.world_transform.inverse();
        let from = to_local.combine(&convex_object.interpolation_world_transform);
        let to = to_local.combine(&convex_object.world_transform);
        let radius = convex_object.ccd_swept_sphere_radius;
        let sweep = swept_point_bounds(from.position, to.position, radius);

        let sphere = ConvexShape::sphere(radius);
        let triangle_margin = concave.margin();
        let identity = Transform::IDENTITY;
        let start = convex_object.hit_fraction.min(1.0);
        let mut fraction = start;

        concave.process_all_triangles(&sweep, &mut |vertices, _part_id, _index| {
            let triangle = ConvexShape::triangle(*vertices).with_margin(triangle_margin);
            if let Some(hit) = GjkConvexCast::new(&sphere, &triangle).calc_time_of_impact(
                &from,
                &to,
                &identity,
                &identity,
                info.allowed_ccd_penetration,
            ) {
                fraction = fraction.min(hit.fraction);
            }
        });

        if fraction < start {
            fraction
        } else {
            1.0
        }
    }

    fn collect_manifolds(&self, out: &mut Vec<PersistentManifold>) {
        if let Some(manifold) = &self.manifold {
            out.push(manifold.lock().clone());
        }
    }
}

impl Drop for ConvexConcaveAlgorithm {
    fn drop(&mut self) {
        self.child = None;
        if let Some(manifold) = self.manifold.take() {
            match Arc::try_unwrap(manifold) {
                Ok(manifold) => self.pool.release(manifold.into_inner()),
                Err(_) => warn!(
                    "manifold of bodies {}/{} still shared on drop, not returned to the pool",
                    self.body0, self.body1
                ),
            }
        }
    }
}

/// Swept bounds of a moving point in a concave shape's frame.
fn swept_point_bounds(from: Vec3, to: Vec3, radius: f32) -> Aabb {
    Aabb::new(from.min(to), from.max(to)).expanded(radius)
}
