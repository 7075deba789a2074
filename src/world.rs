use std::sync::Arc;

use glam::Vec3;
use log::debug;

use crate::{
    collision::{
        algorithm::DispatchFunc,
        broadphase::{
            OverlappingPairCache, ProxyRef, ALL_FILTER, DEFAULT_FILTER, KINEMATIC_FILTER,
            STATIC_FILTER,
        },
        dispatcher::{CollisionDispatcher, DispatchStats},
        manifold::PersistentManifold,
    },
    config::{CollisionConfig, DEFAULT_GRAVITY, DEFAULT_TIME_STEP},
    core::rigidbody::RigidBody,
    dynamics::integrator::Integrator,
    utils::{logging::ScopedTimer, task_pool::TaskPool},
};

/// Workers for the narrow-phase pool. The stepping thread drains the queue
/// as well, so one core is left to it.
fn narrowphase_workers() -> usize {
    std::thread::available_parallelism()
        .map(|cores| cores.get().saturating_sub(1))
        .unwrap_or(0)
}

/// Owns bodies, their broadphase proxies and the dispatcher, and runs one
/// integration plus narrow-phase pass per step. Contacts are reported
/// through [`PhysicsWorld::manifolds`]; nothing resolves them.
pub struct PhysicsWorld {
    pub integrator: Integrator,
    pub time_step: f32,
    bodies: Vec<RigidBody>,
    proxies: Vec<ProxyRef>,
    pair_cache: OverlappingPairCache,
    dispatcher: CollisionDispatcher,
    steps: u64,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_STEP, CollisionConfig::default())
    }
}

impl PhysicsWorld {
    pub fn new(time_step: f32, config: CollisionConfig) -> Self {
        let ts = if time_step <= 0.0 {
            DEFAULT_TIME_STEP
        } else {
            time_step
        };
        let mut world = Self {
            integrator: Integrator::new(Vec3::from_array(DEFAULT_GRAVITY)),
            time_step: ts,
            bodies: Vec::new(),
            proxies: Vec::new(),
            pair_cache: OverlappingPairCache::new(),
            dispatcher: CollisionDispatcher::new(config),
            steps: 0,
        };
        world.set_config(config);
        world
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.integrator.gravity = gravity;
    }

    pub fn gravity(&self) -> Vec3 {
        self.integrator.gravity
    }

    /// Flips the integrator and the narrow phase together. When enabled the
    /// narrow phase runs on a task pool owned by the world.
    pub fn set_parallel_enabled(&mut self, enabled: bool) {
        let config = self.dispatcher.config().with_parallel_dispatch(enabled);
        self.set_config(config);
    }

    pub fn config(&self) -> &CollisionConfig {
        self.dispatcher.config()
    }

    pub fn set_config(&mut self, config: CollisionConfig) {
        self.integrator.set_parallel(config.parallel_dispatch);
        match (config.parallel_dispatch, self.dispatcher.task_pool().is_some()) {
            (true, false) => {
                let pool = TaskPool::new(narrowphase_workers());
                self.dispatcher.set_task_pool(Some(Arc::new(pool)));
            }
            (false, true) => self.dispatcher.set_task_pool(None),
            _ => {}
        }
        self.dispatcher.set_config(config);
    }

    pub fn task_pool(&self) -> Option<&Arc<TaskPool>> {
        self.dispatcher.task_pool()
    }

    /// Adds a body with the default filter for its kind. Static and
    /// kinematic bodies only pair up with dynamic ones.
    pub fn add_body(&mut self, body: RigidBody) -> usize {
        let fixed = STATIC_FILTER | KINEMATIC_FILTER;
        if body.collision.is_kinematic() {
            self.add_body_with_filter(body, KINEMATIC_FILTER, ALL_FILTER ^ fixed)
        } else if body.collision.is_static() {
            self.add_body_with_filter(body, STATIC_FILTER, ALL_FILTER ^ fixed)
        } else {
            self.add_body_with_filter(body, DEFAULT_FILTER, ALL_FILTER)
        }
    }

    pub fn add_body_with_filter(&mut self, mut body: RigidBody, group: u16, mask: u16) -> usize {
        let index = self.bodies.len();
        if !body.is_static_or_kinematic() {
            body.set_gravity(self.integrator.gravity);
        }
        let proxy = self
            .pair_cache
            .create_proxy(index, group, mask, body.collision.aabb());
        self.proxies.push(proxy);
        self.bodies.push(body);
        debug!("body {index} added (group {group:#06x}, mask {mask:#06x})");
        index
    }

    pub fn body(&self, index: usize) -> Option<&RigidBody> {
        self.bodies.get(index)
    }

    pub fn body_mut(&mut self, index: usize) -> Option<&mut RigidBody> {
        self.bodies.get_mut(index)
    }

    pub fn bodies(&self) -> &[RigidBody] {
        &self.bodies
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn pair_cache(&self) -> &OverlappingPairCache {
        &self.pair_cache
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Refreshes every proxy's bounds. Bodies with CCD enabled use the
    /// bounds swept over the last step.
    fn update_aabbs(&mut self) {
        for (body, proxy) in self.bodies.iter().zip(&self.proxies) {
            let aabb = if body.collision.ccd_square_motion_threshold > 0.0 {
                body.collision.swept_aabb()
            } else {
                body.collision.aabb()
            };
            self.pair_cache.set_proxy_aabb(proxy, aabb);
        }
    }

    pub fn step(&mut self) {
        let dt = self.time_step;
        let _timer = ScopedTimer::new("physics_world_step");

        self.integrator.step(&mut self.bodies, dt);
        self.update_aabbs();
        self.pair_cache.update_overlapping_pairs();

        let info = self.dispatcher.dispatch_info(dt, DispatchFunc::Discrete);
        self.dispatcher
            .dispatch_all_collision_pairs(&mut self.pair_cache, &mut self.bodies, &info);

        if self.dispatcher.config().ccd_enabled {
            let info = self.dispatcher.dispatch_info(dt, DispatchFunc::Continuous);
            self.dispatcher
                .dispatch_all_collision_pairs(&mut self.pair_cache, &mut self.bodies, &info);
        }
        self.steps += 1;
    }

    /// Manifolds holding at least one contact point.
    pub fn manifolds(&self) -> Vec<PersistentManifold> {
        self.dispatcher
            .collect_manifolds(&self.pair_cache)
            .into_iter()
            .filter(|manifold| !manifold.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rigidbody::RigidBodyConstructionInfo;
    use crate::core::shape::ConvexShape;
    use crate::core::types::Transform;
    use std::sync::Arc;

    fn body(mass: f32, shape: ConvexShape, position: Vec3) -> RigidBody {
        RigidBody::new(RigidBodyConstructionInfo::new(
            mass,
            Arc::new(shape.into()),
            Transform::from_position(position),
        ))
    }

    #[test]
    fn static_bodies_never_pair_up() {
        let mut world = PhysicsWorld::default();
        world.add_body(body(0.0, ConvexShape::sphere(1.0), Vec3::ZERO));
        world.add_body(body(0.0, ConvexShape::sphere(1.0), Vec3::new(0.5, 0.0, 0.0)));
        world.step();
        assert!(world.pair_cache().is_empty());
    }

    #[test]
    fn falling_sphere_reaches_ground() {
        let mut world = PhysicsWorld::default();
        world.add_body(body(0.0, ConvexShape::cuboid(Vec3::new(5.0, 0.5, 5.0)), Vec3::ZERO));
        world.add_body(body(1.0, ConvexShape::sphere(0.5), Vec3::new(0.0, 1.2, 0.0)));

        let mut touched = false;
        for _ in 0..60 {
            world.step();
            if !world.manifolds().is_empty() {
                touched = true;
                break;
            }
        }
        assert!(touched);
        assert_eq!(world.dispatch_stats().algorithms_created, 1);
    }

    #[test]
    fn kinematic_bodies_pair_only_with_dynamic_ones() {
        let mut world = PhysicsWorld::default();
        world.set_gravity(Vec3::ZERO);
        let mut platform = body(0.0, ConvexShape::cuboid(Vec3::splat(1.0)), Vec3::ZERO);
        platform.collision.flags.is_kinematic = true;
        let platform = world.add_body(platform);
        world.add_body(body(0.0, ConvexShape::sphere(1.0), Vec3::new(1.5, -1.0, 0.0)));
        let ball = world.add_body(body(1.0, ConvexShape::sphere(0.5), Vec3::new(0.0, 1.4, 0.0)));

        world.step();
        let pairs: Vec<_> = world
            .pair_cache()
            .pairs()
            .iter()
            .map(|pair| {
                let (a, b) = (pair.proxy0.client, pair.proxy1.client);
                (a.min(b), a.max(b))
            })
            .collect();
        assert_eq!(pairs, vec![(platform, ball)]);
    }

    #[test]
    fn parallel_world_owns_a_task_pool() {
        let mut world = PhysicsWorld::new(
            DEFAULT_TIME_STEP,
            CollisionConfig::default().with_parallel_dispatch(true),
        );
        assert!(world.task_pool().is_some());
        assert!(world.integrator.parallel());

        world.add_body(body(0.0, ConvexShape::cuboid(Vec3::new(5.0, 0.5, 5.0)), Vec3::ZERO));
        world.add_body(body(1.0, ConvexShape::sphere(0.5), Vec3::new(0.0, 0.95, 0.0)));
        world.step();
        assert_eq!(world.manifolds().len(), 1);
        assert_eq!(world.pair_cache().len(), 1);

        world.set_parallel_enabled(false);
        assert!(world.task_pool().is_none());
        assert!(!world.config().parallel_dispatch);
    }

    #[test]
    fn ccd_bounds_cover_the_whole_step() {
        let mut world = PhysicsWorld::default();
        world.set_gravity(Vec3::ZERO);
        let mut bullet = body(1.0, ConvexShape::sphere(0.5), Vec3::ZERO);
        bullet.collision.ccd_swept_sphere_radius = 0.5;
        bullet.collision.ccd_square_motion_threshold = 0.01;
        bullet.set_linear_velocity(Vec3::new(600.0, 0.0, 0.0));
        let bullet = world.add_body(bullet);
        let post = world.add_body(body(0.0, ConvexShape::sphere(0.2), Vec3::new(5.0, 3.0, 0.0)));
        // Midway along the path, clear of both end positions.
        let gate = world.add_body(body(0.0, ConvexShape::sphere(0.2), Vec3::new(5.0, 0.0, 0.0)));

        world.step();
        let moved = world.body(bullet).expect("bullet exists");
        assert!(moved.world_transform().position.x > 9.0);
        assert!(moved.collision.hit_fraction < 1.0);
        let keys: Vec<_> = world
            .pair_cache()
            .pairs()
            .iter()
            .map(|pair| (pair.proxy0.client, pair.proxy1.client))
            .collect();
        assert!(keys.contains(&(bullet, gate)));
        assert!(!keys.iter().any(|&(a, b)| a == post || b == post));
    }
}
