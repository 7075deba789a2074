use glam::Vec3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::DEFAULT_GRAVITY;
use crate::core::rigidbody::RigidBody;

/// Steps rigid bodies forward in time without any collision response.
///
/// Per dynamic body: gravity, velocity integration, damping, transform
/// prediction and commit, force clearing. Kinematic bodies only get their
/// velocity reconstructed from the last keyframe; static bodies are skipped.
#[derive(Debug, Clone)]
pub struct Integrator {
    pub gravity: Vec3,
    parallel: bool,
}

impl Default for Integrator {
    fn default() -> Self {
        Self::new(Vec3::from_array(DEFAULT_GRAVITY))
    }
}

impl Integrator {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            gravity,
            parallel: false,
        }
    }

    pub fn set_parallel(&mut self, enabled: bool) {
        self.parallel = enabled;
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    fn step_body(&self, body: &mut RigidBody, dt: f32) {
        if body.collision.is_kinematic() {
            body.save_kinematic_state(dt);
            return;
        }
        if body.is_static_or_kinematic() {
            return;
        }

        if body.gravity() != self.gravity {
            body.set_gravity(self.gravity);
        }
        body.apply_gravity();
        body.integrate_velocities(dt);
        body.apply_damping(dt);
        let predicted = body.predict_integrated_transform(dt);
        body.set_center_of_mass_transform(predicted);
        body.clear_forces();
    }

    pub fn step(&self, bodies: &mut [RigidBody], dt: f32) {
        if dt <= 0.0 {
            return;
        }

        #[cfg(feature = "parallel")]
        {
            if self.parallel {
                bodies
                    .par_iter_mut()
                    .for_each(|body| self.step_body(body, dt));
                return;
            }
        }

        for body in bodies.iter_mut() {
            self.step_body(body, dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rigidbody::RigidBodyConstructionInfo;
    use crate::core::shape::ConvexShape;
    use crate::core::types::Transform;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn ball(mass: f32, height: f32) -> RigidBody {
        RigidBody::new(RigidBodyConstructionInfo::new(
            mass,
            Arc::new(ConvexShape::sphere(0.5).into()),
            Transform::from_position(Vec3::new(0.0, height, 0.0)),
        ))
    }

    #[test]
    fn free_fall_matches_gravity() {
        let integrator = Integrator::new(Vec3::new(0.0, -9.8, 0.0));
        let mut bodies = vec![ball(1.0, 10.0)];
        for _ in 0..60 {
            integrator.step(&mut bodies, 1.0 / 60.0);
        }
        assert_relative_eq!(bodies[0].velocity.linear.y, -9.8, epsilon = 1e-3);
        assert!(bodies[0].world_transform().position.y < 10.0 - 4.8);
        assert_eq!(bodies[0].total_force(), Vec3::ZERO);
    }

    #[test]
    fn static_bodies_are_untouched() {
        let integrator = Integrator::default();
        let mut bodies = vec![ball(0.0, 3.0)];
        let before = *bodies[0].world_transform();
        integrator.step(&mut bodies, 1.0 / 60.0);
        assert_eq!(*bodies[0].world_transform(), before);
        assert_eq!(bodies[0].velocity.linear, Vec3::ZERO);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let mut sequential = Integrator::new(Vec3::new(0.0, -9.8, 0.0));
        let mut parallel = sequential.clone();
        sequential.set_parallel(false);
        parallel.set_parallel(true);

        let mut a: Vec<_> = (0..32).map(|i| ball(1.0, i as f32)).collect();
        let mut b: Vec<_> = (0..32).map(|i| ball(1.0, i as f32)).collect();
        for _ in 0..10 {
            sequential.step(&mut a, 1.0 / 60.0);
            parallel.step(&mut b, 1.0 / 60.0);
        }
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.world_transform(), y.world_transform());
        }
    }

    #[test]
    fn step_keeps_start_pose_for_sweeps() {
        let integrator = Integrator::new(Vec3::ZERO);
        let mut body = ball(1.0, 2.0);
        body.set_linear_velocity(Vec3::X);
        let mut bodies = vec![body];
        integrator.step(&mut bodies, 0.5);

        let object = &bodies[0].collision;
        assert_relative_eq!(object.interpolation_world_transform.position.x, 0.0);
        assert_relative_eq!(object.world_transform.position.x, 0.5);
        assert_relative_eq!(object.linear_motion().x, 0.5);
        let swept = object.swept_aabb();
        assert!(swept.min.x <= -0.5 && swept.max.x >= 1.0);
    }
}
