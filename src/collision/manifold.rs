//! Persistent contact manifolds and the pool that recycles them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use glam::Vec3;
use log::{debug, warn};
use parking_lot::Mutex;

use super::gjk::ClosestPointResult;
use crate::config::MANIFOLD_CACHE_SIZE;
use crate::core::types::Transform;
use crate::utils::math::plane_space;

/// One cached contact between body0 and body1 of a manifold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldPoint {
    pub local_point_a: Vec3,
    pub local_point_b: Vec3,
    pub position_world_on_a: Vec3,
    pub position_world_on_b: Vec3,
    /// Points from body0 toward body1.
    pub normal_world: Vec3,
    /// Negative while penetrating.
    pub distance: f32,
    pub part_id0: i32,
    pub part_id1: i32,
    pub index0: i32,
    pub index1: i32,
    pub applied_impulse: f32,
    pub applied_impulse_lateral1: f32,
    pub applied_impulse_lateral2: f32,
    pub lateral_friction_dir1: Vec3,
    pub lateral_friction_dir2: Vec3,
    pub life_time: u32,
}

impl ManifoldPoint {
    pub fn new(
        local_point_a: Vec3,
        local_point_b: Vec3,
        normal_world: Vec3,
        distance: f32,
        position_world_on_a: Vec3,
        position_world_on_b: Vec3,
    ) -> Self {
        let (lateral_friction_dir1, lateral_friction_dir2) = plane_space(normal_world);
        Self {
            local_point_a,
            local_point_b,
            position_world_on_a,
            position_world_on_b,
            normal_world,
            distance,
            part_id0: -1,
            part_id1: -1,
            index0: -1,
            index1: -1,
            applied_impulse: 0.0,
            applied_impulse_lateral1: 0.0,
            applied_impulse_lateral2: 0.0,
            lateral_friction_dir1,
            lateral_friction_dir2,
            life_time: 0,
        }
    }
}

/// Up to [`MANIFOLD_CACHE_SIZE`] contact points between two bodies, kept
/// across frames.
///
/// A new point closer than the breaking threshold to a cached one replaces
/// it in place; when the cache is full the point whose removal keeps the
/// largest contact area is evicted, never the deepest one.
#[derive(Debug, Clone)]
pub struct PersistentManifold {
    pub body0: usize,
    pub body1: usize,
    points: Vec<ManifoldPoint>,
    breaking_threshold: f32,
}

impl PersistentManifold {
    pub fn new(body0: usize, body1: usize, breaking_threshold: f32) -> Self {
        Self {
            body0,
            body1,
            points: Vec::with_capacity(MANIFOLD_CACHE_SIZE),
            breaking_threshold,
        }
    }

    pub fn set_bodies(&mut self, body0: usize, body1: usize) {
        self.body0 = body0;
        self.body1 = body1;
    }

    pub fn num_contacts(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<&ManifoldPoint> {
        self.points.get(index)
    }

    pub fn breaking_threshold(&self) -> f32 {
        self.breaking_threshold
    }

    pub fn set_breaking_threshold(&mut self, threshold: f32) {
        self.breaking_threshold = threshold;
    }

    /// Index of the cached point nearest to `point` in body0's frame, if any
    /// lies within the breaking threshold.
    pub fn cache_entry(&self, point: &ManifoldPoint) -> Option<usize> {
        let mut shortest = self.breaking_threshold * self.breaking_threshold;
        let mut nearest = None;
        for (index, cached) in self.points.iter().enumerate() {
            let dist_sq = cached.local_point_a.distance_squared(point.local_point_a);
            if dist_sq < shortest {
                shortest = dist_sq;
                nearest = Some(index);
            }
        }
        nearest
    }

    /// Inserts `point`, evicting a cached point when full. Returns its index.
    pub fn add_manifold_point(&mut self, point: ManifoldPoint) -> usize {
        if self.points.len() < MANIFOLD_CACHE_SIZE {
            self.points.push(point);
            return self.points.len() - 1;
        }
        let index = self.sort_cached_points(&point);
        self.points[index] = point;
        index
    }

    /// Picks the slot to evict so the remaining four points span the largest
    /// area. The deepest cached point is never chosen.
    fn sort_cached_points(&self, point: &ManifoldPoint) -> usize {
        let mut deepest = None;
        let mut max_penetration = point.distance;
        for (index, cached) in self.points.iter().enumerate() {
            if cached.distance < max_penetration {
                max_penetration = cached.distance;
                deepest = Some(index);
            }
        }

        let p = |i: usize| self.points[i].local_point_a;
        let new = point.local_point_a;
        let mut areas = [0.0f32; MANIFOLD_CACHE_SIZE];
        if deepest != Some(0) {
            areas[0] = (new - p(1)).cross(p(3) - p(2)).length_squared();
        }
        if deepest != Some(1) {
            areas[1] = (new - p(0)).cross(p(3) - p(2)).length_squared();
        }
        if deepest != Some(2) {
            areas[2] = (new - p(0)).cross(p(3) - p(1)).length_squared();
        }
        if deepest != Some(3) {
            areas[3] = (new - p(0)).cross(p(2) - p(1)).length_squared();
        }

        let mut best = 0;
        for index in 1..MANIFOLD_CACHE_SIZE {
            if areas[index] > areas[best] {
                best = index;
            }
        }
        best
    }

    /// Overwrites the geometry of a cached point and keeps its solver data
    /// (impulses, friction directions, lifetime).
    pub fn replace_contact_point(&mut self, point: ManifoldPoint, index: usize) {
        let Some(slot) = self.points.get_mut(index) else {
            return;
        };
        let life_time = slot.life_time;
        let applied_impulse = slot.applied_impulse;
        let lateral1 = slot.applied_impulse_lateral1;
        let lateral2 = slot.applied_impulse_lateral2;
        let dir1 = slot.lateral_friction_dir1;
        let dir2 = slot.lateral_friction_dir2;
        *slot = point;
        slot.life_time = life_time;
        slot.applied_impulse = applied_impulse;
        slot.applied_impulse_lateral1 = lateral1;
        slot.applied_impulse_lateral2 = lateral2;
        slot.lateral_friction_dir1 = dir1;
        slot.lateral_friction_dir2 = dir2;
    }

    pub fn remove_contact_point(&mut self, index: usize) {
        if index < self.points.len() {
            self.points.swap_remove(index);
        }
    }

    /// Re-projects cached points with the current transforms and drops the
    /// ones that separated past the threshold or drifted sideways.
    pub fn refresh_contact_points(&mut self, transform_a: &Transform, transform_b: &Transform) {
        for point in self.points.iter_mut() {
            point.position_world_on_a = transform_a.transform_point(point.local_point_a);
            point.position_world_on_b = transform_b.transform_point(point.local_point_b);
            point.distance =
                (point.position_world_on_b - point.position_world_on_a).dot(point.normal_world);
            point.life_time += 1;
        }

        let threshold = self.breaking_threshold;
        let threshold_sq = threshold * threshold;
        for index in (0..self.points.len()).rev() {
            let point = &self.points[index];
            if point.distance > threshold {
                self.remove_contact_point(index);
                continue;
            }
            let projected = point.position_world_on_a + point.normal_world * point.distance;
            let drift = point.position_world_on_b - projected;
            if drift.length_squared() > threshold_sq {
                self.remove_contact_point(index);
            }
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Feeds closest-point results of one query into a manifold.
///
/// When `swapped` is set the query ran with body1 as shape A, so points,
/// normal and feature ids are flipped back before storing.
#[derive(Debug)]
pub struct ManifoldResult<'a> {
    manifold: &'a mut PersistentManifold,
    transform_a: Transform,
    transform_b: Transform,
    swapped: bool,
    part_id_a: i32,
    index_a: i32,
    part_id_b: i32,
    index_b: i32,
}

impl<'a> ManifoldResult<'a> {
    /// `transform_a`/`transform_b` are the transforms of the manifold's
    /// body0/body1.
    pub fn new(
        manifold: &'a mut PersistentManifold,
        transform_a: Transform,
        transform_b: Transform,
    ) -> Self {
        Self {
            manifold,
            transform_a,
            transform_b,
            swapped: false,
            part_id_a: -1,
            index_a: -1,
            part_id_b: -1,
            index_b: -1,
        }
    }

    pub fn with_swapped(mut self, swapped: bool) -> Self {
        self.swapped = swapped;
        self
    }

    pub fn set_shape_identifiers_a(&mut self, part_id: i32, index: i32) {
        self.part_id_a = part_id;
        self.index_a = index;
    }

    pub fn set_shape_identifiers_b(&mut self, part_id: i32, index: i32) {
        self.part_id_b = part_id;
        self.index_b = index;
    }

    pub fn manifold(&self) -> &PersistentManifold {
        self.manifold
    }

    /// Stores one contact. Returns the manifold slot it landed in, or `None`
    /// when the result lies beyond the breaking threshold.
    pub fn add_contact(&mut self, result: &ClosestPointResult) -> Option<usize> {
        if result.distance > self.manifold.breaking_threshold() {
            return None;
        }

        let (point_a, point_b, normal) = if self.swapped {
            (result.point_on_b, result.point_on_a, -result.normal)
        } else {
            (result.point_on_a, result.point_on_b, result.normal)
        };
        let local_a = self.transform_a.inverse_transform_point(point_a);
        let local_b = self.transform_b.inverse_transform_point(point_b);

        let mut point =
            ManifoldPoint::new(local_a, local_b, normal, result.distance, point_a, point_b);
        if self.swapped {
            point.part_id0 = self.part_id_b;
            point.index0 = self.index_b;
            point.part_id1 = self.part_id_a;
            point.index1 = self.index_a;
        } else {
            point.part_id0 = self.part_id_a;
            point.index0 = self.index_a;
            point.part_id1 = self.part_id_b;
            point.index1 = self.index_b;
        }

        match self.manifold.cache_entry(&point) {
            Some(index) => {
                self.manifold.replace_contact_point(point, index);
                Some(index)
            }
            None => Some(self.manifold.add_manifold_point(point)),
        }
    }

    pub fn refresh_contact_points(&mut self) {
        if !self.manifold.is_empty() {
            self.manifold
                .refresh_contact_points(&self.transform_a, &self.transform_b);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: usize,
    pub reused: usize,
    pub released: usize,
    pub live: usize,
}

/// Free list of cleared manifolds shared by every algorithm a dispatcher
/// creates.
#[derive(Debug)]
pub struct ManifoldPool {
    free: Mutex<Vec<PersistentManifold>>,
    capacity: usize,
    acquired: AtomicUsize,
    reused: AtomicUsize,
    released: AtomicUsize,
}

impl ManifoldPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
            acquired: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn acquire(&self, body0: usize, body1: usize, breaking_threshold: f32) -> PersistentManifold {
        let acquired = self.acquired.fetch_add(1, Ordering::Relaxed) + 1;
        let live = acquired.saturating_sub(self.released.load(Ordering::Relaxed));
        if live > self.capacity {
            warn!(
                "manifold pool exhausted ({live} live, capacity {}), allocating outside the pool",
                self.capacity
            );
        }

        match self.free.lock().pop() {
            Some(mut manifold) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                manifold.clear();
                manifold.set_bodies(body0, body1);
                manifold.set_breaking_threshold(breaking_threshold);
                manifold
            }
            None => {
                debug!("manifold pool allocating manifold for bodies {body0}/{body1}");
                PersistentManifold::new(body0, body1, breaking_threshold)
            }
        }
    }

    pub fn release(&self, mut manifold: PersistentManifold) {
        self.released.fetch_add(1, Ordering::Relaxed);
        manifold.clear();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(manifold);
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        let acquired = self.acquired.load(Ordering::Relaxed);
        let released = self.released.load(Ordering::Relaxed);
        PoolStats {
            acquired,
            reused: self.reused.load(Ordering::Relaxed),
            released,
            live: acquired.saturating_sub(released),
        }
    }
}

/// Where an algorithm keeps its manifold.
#[derive(Debug, Default)]
pub enum ManifoldSlot {
    #[default]
    Empty,
    /// Created by the algorithm and returned to the pool when it drops.
    Owned(PersistentManifold),
    /// Borrowed from a parent algorithm; never released by the borrower.
    Shared(Arc<Mutex<PersistentManifold>>),
}

impl ManifoldSlot {
    pub fn is_owned(&self) -> bool {
        matches!(self, ManifoldSlot::Owned(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ManifoldSlot::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::gjk::LastUsedMethod;
    use approx::assert_abs_diff_eq;

    fn contact_at(x: f32, z: f32, distance: f32) -> ManifoldPoint {
        let a = Vec3::new(x, 0.0, z);
        let b = a + Vec3::Y * distance;
        ManifoldPoint::new(a, b, Vec3::Y, distance, a, b)
    }

    #[test]
    fn nearby_point_replaces_cached_one() {
        let mut manifold = PersistentManifold::new(0, 1, 0.02);
        let mut first = contact_at(0.0, 0.0, -0.01);
        first.applied_impulse = 3.0;
        first.life_time = 5;
        manifold.add_manifold_point(first);

        let update = contact_at(0.005, 0.0, -0.02);
        let index = manifold.cache_entry(&update).expect("within threshold");
        manifold.replace_contact_point(update, index);

        assert_eq!(manifold.num_contacts(), 1);
        let point = manifold.points()[0];
        assert_eq!(point.distance, -0.02);
        assert_eq!(point.applied_impulse, 3.0);
        assert_eq!(point.life_time, 5);
    }

    #[test]
    fn full_manifold_keeps_deepest_point() {
        let mut manifold = PersistentManifold::new(0, 1, 0.02);
        manifold.add_manifold_point(contact_at(-1.0, -1.0, -0.5));
        manifold.add_manifold_point(contact_at(1.0, -1.0, -0.01));
        manifold.add_manifold_point(contact_at(1.0, 1.0, -0.01));
        manifold.add_manifold_point(contact_at(-1.0, 1.0, -0.01));

        manifold.add_manifold_point(contact_at(0.1, 0.1, -0.02));

        assert_eq!(manifold.num_contacts(), MANIFOLD_CACHE_SIZE);
        assert!(manifold.points().iter().any(|p| p.distance == -0.5));
    }

    #[test]
    fn refresh_drops_separated_and_drifted_points() {
        let mut manifold = PersistentManifold::new(0, 1, 0.02);
        manifold.add_manifold_point(contact_at(0.0, 0.0, 0.0));
        manifold.add_manifold_point(contact_at(1.0, 0.0, 0.0));

        let body_b = Transform::from_position(Vec3::new(0.0, 0.5, 0.0));
        manifold.refresh_contact_points(&Transform::IDENTITY, &body_b);
        assert!(manifold.is_empty());

        manifold.add_manifold_point(contact_at(0.0, 0.0, 0.0));
        let slid = Transform::from_position(Vec3::new(0.3, 0.0, 0.0));
        manifold.refresh_contact_points(&Transform::IDENTITY, &slid);
        assert!(manifold.is_empty());
    }

    #[test]
    fn refresh_updates_distance_and_lifetime() {
        let mut manifold = PersistentManifold::new(0, 1, 0.02);
        manifold.add_manifold_point(contact_at(0.0, 0.0, 0.0));
        let sunk = Transform::from_position(Vec3::new(0.0, -0.01, 0.0));
        manifold.refresh_contact_points(&Transform::IDENTITY, &sunk);

        let point = manifold.points()[0];
        assert_abs_diff_eq!(point.distance, -0.01, epsilon = 1e-6);
        assert_eq!(point.life_time, 1);
    }

    #[test]
    fn swapped_result_is_stored_in_body_order() {
        let mut manifold = PersistentManifold::new(0, 1, 0.02);
        let result = ClosestPointResult {
            normal: Vec3::NEG_Y,
            point_on_a: Vec3::new(0.0, 1.0, 0.0),
            point_on_b: Vec3::new(0.0, 0.99, 0.0),
            distance: -0.01,
            method: LastUsedMethod::GjkExact,
        };
        let mut adapter = ManifoldResult::new(&mut manifold, Transform::IDENTITY, Transform::IDENTITY)
            .with_swapped(true);
        adapter.set_shape_identifiers_b(0, 7);
        assert_eq!(adapter.add_contact(&result), Some(0));

        let point = manifold.points()[0];
        assert_eq!(point.normal_world, Vec3::Y);
        assert_eq!(point.position_world_on_a, Vec3::new(0.0, 0.99, 0.0));
        assert_eq!(point.index0, 7);
        assert_eq!(point.index1, -1);
    }

    #[test]
    fn distant_result_is_ignored() {
        let mut manifold = PersistentManifold::new(0, 1, 0.02);
        let result = ClosestPointResult {
            normal: Vec3::Y,
            point_on_a: Vec3::ZERO,
            point_on_b: Vec3::Y,
            distance: 1.0,
            method: LastUsedMethod::GjkExact,
        };
        let mut adapter = ManifoldResult::new(&mut manifold, Transform::IDENTITY, Transform::IDENTITY);
        assert_eq!(adapter.add_contact(&result), None);
        assert!(manifold.is_empty());
    }

    #[test]
    fn pool_recycles_released_manifolds() {
        let pool = ManifoldPool::new(2);
        let mut manifold = pool.acquire(0, 1, 0.02);
        manifold.add_manifold_point(contact_at(0.0, 0.0, 0.0));
        pool.release(manifold);
        assert_eq!(pool.free_count(), 1);

        let reused = pool.acquire(4, 5, 0.03);
        assert!(reused.is_empty());
        assert_eq!((reused.body0, reused.body1), (4, 5));
        assert_eq!(reused.breaking_threshold(), 0.03);

        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.live, 1);
    }
}
