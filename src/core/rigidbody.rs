use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use glam::{Mat3, Vec3};

use super::collision_object::CollisionObject;
use super::shape::CollisionShape;
use super::types::{Transform, Velocity};
use crate::config::{
    ADDITIONAL_ANGULAR_DAMPING_FACTOR, ADDITIONAL_ANGULAR_DAMPING_THRESHOLD_SQR,
    ADDITIONAL_DAMPING_FACTOR, ADDITIONAL_LINEAR_DAMPING_THRESHOLD_SQR, DEFAULT_ANGULAR_DAMPING,
    DEFAULT_LINEAR_DAMPING,
};
use crate::utils::math::{calculate_velocity, integrate_transform};

/// Largest angular speed, as rotation per step, a body may keep. The
/// transform itself turns by at most
/// [`ANGULAR_MOTION_THRESHOLD`](crate::utils::math::ANGULAR_MOTION_THRESHOLD)
/// per step.
const MAX_ANGULAR_STEP: f32 = FRAC_PI_2;
/// Speed removed per step by the additional damping deadband.
const DAMPING_DEADBAND: f32 = 0.005;

/// Everything needed to create a [`RigidBody`].
#[derive(Debug, Clone)]
pub struct RigidBodyConstructionInfo {
    pub mass: f32,
    pub shape: Arc<CollisionShape>,
    pub start_transform: Transform,
    pub local_inertia: Vec3,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub additional_damping: bool,
    pub additional_damping_factor: f32,
    pub additional_linear_damping_threshold_sqr: f32,
    pub additional_angular_damping_threshold_sqr: f32,
    pub additional_angular_damping_factor: f32,
}

impl RigidBodyConstructionInfo {
    /// Local inertia is derived from the shape; a zero mass makes the body static.
    pub fn new(mass: f32, shape: Arc<CollisionShape>, start_transform: Transform) -> Self {
        let local_inertia = if mass > 0.0 {
            shape.calculate_local_inertia(mass)
        } else {
            Vec3::ZERO
        };
        Self {
            mass,
            shape,
            start_transform,
            local_inertia,
            linear_damping: DEFAULT_LINEAR_DAMPING,
            angular_damping: DEFAULT_ANGULAR_DAMPING,
            additional_damping: false,
            additional_damping_factor: ADDITIONAL_DAMPING_FACTOR,
            additional_linear_damping_threshold_sqr: ADDITIONAL_LINEAR_DAMPING_THRESHOLD_SQR,
            additional_angular_damping_threshold_sqr: ADDITIONAL_ANGULAR_DAMPING_THRESHOLD_SQR,
            additional_angular_damping_factor: ADDITIONAL_ANGULAR_DAMPING_FACTOR,
        }
    }

    pub fn with_local_inertia(mut self, local_inertia: Vec3) -> Self {
        self.local_inertia = local_inertia;
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_additional_damping(mut self, enabled: bool) -> Self {
        self.additional_damping = enabled;
        self
    }
}

/// Rigid body with mass, inertia, velocity and force accumulators.
///
/// A zero inverse mass marks the body static: gravity, integration and
/// damping leave it untouched.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub collision: CollisionObject,
    pub velocity: Velocity,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub additional_damping: bool,
    pub additional_damping_factor: f32,
    pub additional_linear_damping_threshold_sqr: f32,
    pub additional_angular_damping_threshold_sqr: f32,
    pub additional_angular_damping_factor: f32,
    inverse_mass: f32,
    /// Gravity force, stored pre-multiplied by the mass.
    gravity: Vec3,
    gravity_acceleration: Vec3,
    inv_inertia_local: Vec3,
    inv_inertia_tensor_world: Mat3,
    total_force: Vec3,
    total_torque: Vec3,
    constraint_refs: Vec<u32>,
}

impl RigidBody {
    pub fn new(info: RigidBodyConstructionInfo) -> Self {
        let mut body = Self {
            collision: CollisionObject::new(info.shape, info.start_transform),
            velocity: Velocity::default(),
            linear_damping: 0.0,
            angular_damping: 0.0,
            additional_damping: info.additional_damping,
            additional_damping_factor: info.additional_damping_factor,
            additional_linear_damping_threshold_sqr: info.additional_linear_damping_threshold_sqr,
            additional_angular_damping_threshold_sqr: info.additional_angular_damping_threshold_sqr,
            additional_angular_damping_factor: info.additional_angular_damping_factor,
            inverse_mass: 0.0,
            gravity: Vec3::ZERO,
            gravity_acceleration: Vec3::ZERO,
            inv_inertia_local: Vec3::ZERO,
            inv_inertia_tensor_world: Mat3::ZERO,
            total_force: Vec3::ZERO,
            total_torque: Vec3::ZERO,
            constraint_refs: Vec::new(),
        };
        body.set_damping(info.linear_damping, info.angular_damping);
        body.set_mass_props(info.mass, info.local_inertia);
        body.update_inertia_tensor();
        body
    }

    /// A zero mass makes the body static. A zero inertia component locks
    /// rotation about that axis.
    pub fn set_mass_props(&mut self, mass: f32, inertia: Vec3) {
        if mass == 0.0 {
            self.collision.flags.is_static = true;
            self.inverse_mass = 0.0;
        } else {
            self.collision.flags.is_static = false;
            self.inverse_mass = 1.0 / mass;
        }
        self.gravity = mass * self.gravity_acceleration;
        self.inv_inertia_local = Vec3::new(
            inverse_or_zero(inertia.x),
            inverse_or_zero(inertia.y),
            inverse_or_zero(inertia.z),
        );
        self.update_inertia_tensor();
    }

    pub fn inverse_mass(&self) -> f32 {
        self.inverse_mass
    }

    pub fn mass(&self) -> f32 {
        if self.inverse_mass == 0.0 {
            0.0
        } else {
            1.0 / self.inverse_mass
        }
    }

    pub fn inv_inertia_local(&self) -> Vec3 {
        self.inv_inertia_local
    }

    pub fn inv_inertia_tensor_world(&self) -> Mat3 {
        self.inv_inertia_tensor_world
    }

    pub fn world_transform(&self) -> &Transform {
        &self.collision.world_transform
    }

    pub fn interpolation_world_transform(&self) -> &Transform {
        &self.collision.interpolation_world_transform
    }

    pub fn is_static_or_kinematic(&self) -> bool {
        self.collision.is_static_or_kinematic()
    }

    pub fn set_linear_velocity(&mut self, linear: Vec3) {
        self.velocity.linear = linear;
    }

    pub fn set_angular_velocity(&mut self, angular: Vec3) {
        self.velocity.angular = angular;
    }

    pub fn set_gravity(&mut self, acceleration: Vec3) {
        if self.inverse_mass != 0.0 {
            self.gravity = acceleration / self.inverse_mass;
        }
        self.gravity_acceleration = acceleration;
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity_acceleration
    }

    pub fn apply_gravity(&mut self) {
        if self.is_static_or_kinematic() {
            return;
        }
        self.apply_central_force(self.gravity);
    }

    pub fn apply_central_force(&mut self, force: Vec3) {
        self.total_force += force;
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        self.total_torque += torque;
    }

    /// Applies `force` at `rel_pos`, relative to the centre of mass.
    pub fn apply_force(&mut self, force: Vec3, rel_pos: Vec3) {
        self.apply_central_force(force);
        self.apply_torque(rel_pos.cross(force));
    }

    pub fn apply_central_impulse(&mut self, impulse: Vec3) {
        if self.inverse_mass != 0.0 {
            self.velocity.linear += impulse * self.inverse_mass;
        }
    }

    pub fn apply_impulse(&mut self, impulse: Vec3, rel_pos: Vec3) {
        if self.inverse_mass != 0.0 {
            self.apply_central_impulse(impulse);
            self.velocity.angular += self.inv_inertia_tensor_world * rel_pos.cross(impulse);
        }
    }

    pub fn total_force(&self) -> Vec3 {
        self.total_force
    }

    pub fn total_torque(&self) -> Vec3 {
        self.total_torque
    }

    pub fn clear_forces(&mut self) {
        self.total_force = Vec3::ZERO;
        self.total_torque = Vec3::ZERO;
    }

    /// Integrates accumulated force and torque into the velocities.
    pub fn integrate_velocities(&mut self, dt: f32) {
        if self.is_static_or_kinematic() {
            return;
        }

        self.velocity.linear += self.total_force * (self.inverse_mass * dt);
        self.velocity.angular += self.inv_inertia_tensor_world * self.total_torque * dt;

        let speed = self.velocity.angular.length();
        if speed * dt > MAX_ANGULAR_STEP {
            self.velocity.angular *= (MAX_ANGULAR_STEP / dt) / speed;
        }
    }

    /// Clamps both coefficients to `[0, 1]`.
    pub fn set_damping(&mut self, linear: f32, angular: f32) {
        self.linear_damping = linear.clamp(0.0, 1.0);
        self.angular_damping = angular.clamp(0.0, 1.0);
    }

    pub fn apply_damping(&mut self, dt: f32) {
        if self.is_static_or_kinematic() {
            return;
        }

        self.velocity.linear *= (1.0 - dt * self.linear_damping).clamp(0.0, 1.0);
        self.velocity.angular *= (1.0 - dt * self.angular_damping).clamp(0.0, 1.0);

        if !self.additional_damping {
            return;
        }

        if self.velocity.angular.length_squared() < self.additional_angular_damping_threshold_sqr
            && self.velocity.linear.length_squared() < self.additional_linear_damping_threshold_sqr
        {
            self.velocity.angular *= self.additional_angular_damping_factor;
            self.velocity.linear *= self.additional_damping_factor;
        }

        let speed = self.velocity.linear.length();
        if speed < self.linear_damping {
            self.velocity.linear = deadband(self.velocity.linear, speed);
        }
        let angular_speed = self.velocity.angular.length();
        if angular_speed < self.angular_damping {
            self.velocity.angular = deadband(self.velocity.angular, angular_speed);
        }
    }

    /// Transform the body would reach after `dt` at its current velocity.
    pub fn predict_integrated_transform(&self, dt: f32) -> Transform {
        integrate_transform(
            &self.collision.world_transform,
            self.velocity.linear,
            self.velocity.angular,
            dt,
        )
    }

    /// Commits `transform`, keeping the previous one as the interpolation
    /// transform, and refreshes the world inertia tensor.
    pub fn set_center_of_mass_transform(&mut self, transform: Transform) {
        self.collision.interpolation_world_transform = self.collision.world_transform;
        self.collision.world_transform = transform;
        self.update_inertia_tensor();
    }

    /// Reconstructs the velocity of a keyframed body from its last motion.
    pub fn save_kinematic_state(&mut self, dt: f32) {
        if dt == 0.0 || !self.collision.is_kinematic() {
            return;
        }
        let (linear, angular) = calculate_velocity(
            &self.collision.interpolation_world_transform,
            &self.collision.world_transform,
            dt,
        );
        self.velocity = Velocity { linear, angular };
        self.collision.interpolation_world_transform = self.collision.world_transform;
    }

    pub fn update_inertia_tensor(&mut self) {
        let basis = self.collision.world_transform.basis();
        self.inv_inertia_tensor_world =
            basis * Mat3::from_diagonal(self.inv_inertia_local) * basis.transpose();
    }

    /// Velocity of a point given relative to the centre of mass.
    pub fn velocity_in_local_point(&self, rel_pos: Vec3) -> Vec3 {
        self.velocity.linear + self.velocity.angular.cross(rel_pos)
    }

    pub fn add_constraint_ref(&mut self, constraint: u32) {
        if !self.constraint_refs.contains(&constraint) {
            self.constraint_refs.push(constraint);
        }
    }

    pub fn remove_constraint_ref(&mut self, constraint: u32) {
        self.constraint_refs.retain(|&c| c != constraint);
    }

    pub fn constraint_refs(&self) -> &[u32] {
        &self.constraint_refs
    }

    /// Bodies may only leave the world once every constraint is detached.
    pub fn can_be_removed(&self) -> bool {
        self.constraint_refs.is_empty()
    }
}

impl AsRef<CollisionObject> for RigidBody {
    fn as_ref(&self) -> &CollisionObject {
        &self.collision
    }
}

impl AsMut<CollisionObject> for RigidBody {
    fn as_mut(&mut self) -> &mut CollisionObject {
        &mut self.collision
    }
}

fn inverse_or_zero(value: f32) -> f32 {
    if value != 0.0 {
        1.0 / value
    } else {
        0.0
    }
}

fn deadband(velocity: Vec3, speed: f32) -> Vec3 {
    if speed > DAMPING_DEADBAND {
        velocity - velocity / speed * DAMPING_DEADBAND
    } else {
        Vec3::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shape::ConvexShape;
    use approx::assert_abs_diff_eq;
    use glam::Quat;

    fn body(mass: f32) -> RigidBody {
        let shape = Arc::new(CollisionShape::from(ConvexShape::sphere(0.5)));
        RigidBody::new(RigidBodyConstructionInfo::new(
            mass,
            shape,
            Transform::from_position(Vec3::new(0.0, 5.0, 0.0)),
        ))
    }

    #[test]
    fn static_body_ignores_forces() {
        let mut b = body(0.0);
        b.set_gravity(Vec3::new(0.0, -9.8, 0.0));
        b.apply_torque(Vec3::new(100.0, 0.0, 0.0));
        let before = (b.velocity, *b.world_transform());
        b.apply_gravity();
        b.integrate_velocities(1.0 / 60.0);
        b.apply_damping(1.0 / 60.0);
        assert_eq!(before, (b.velocity, *b.world_transform()));
        assert!(b.collision.is_static());
    }

    #[test]
    fn gravity_is_mass_scaled_force() {
        let mut b = body(2.0);
        b.set_gravity(Vec3::new(0.0, -10.0, 0.0));
        b.apply_gravity();
        assert_abs_diff_eq!(b.total_force().y, -20.0);
        b.integrate_velocities(0.5);
        assert_abs_diff_eq!(b.velocity.linear.y, -5.0);
    }

    #[test]
    fn angular_velocity_is_clamped() {
        let mut b = body(1.0);
        let dt = 1.0 / 60.0;
        b.apply_torque(Vec3::new(1.0e6, -3.0e5, 2.0e4));
        b.integrate_velocities(dt);
        assert!(b.velocity.angular.length() * dt <= MAX_ANGULAR_STEP + 1e-4);
    }

    #[test]
    fn spin_between_clamps_keeps_speed_but_turns_less() {
        let mut b = body(1.0);
        let dt = 1.0 / 60.0;
        let spin = Vec3::new(0.0, 1.2 / dt, 0.0);
        b.set_angular_velocity(spin);
        b.integrate_velocities(dt);
        assert_abs_diff_eq!(b.velocity.angular.y, spin.y, epsilon = 1e-3);

        let predicted = b.predict_integrated_transform(dt);
        let turned = predicted.rotation.angle_between(b.world_transform().rotation);
        assert_abs_diff_eq!(turned, crate::utils::math::ANGULAR_MOTION_THRESHOLD, epsilon = 1e-4);
    }

    #[test]
    fn zero_inertia_component_locks_axis() {
        let mut b = body(1.0);
        b.set_mass_props(1.0, Vec3::new(0.0, 1.0, 2.0));
        assert_eq!(b.inv_inertia_local(), Vec3::new(0.0, 1.0, 0.5));
        b.apply_torque(Vec3::X);
        b.integrate_velocities(0.1);
        assert_eq!(b.velocity.angular, Vec3::ZERO);
    }

    #[test]
    fn damping_is_clamped_and_applied() {
        let mut b = body(1.0);
        b.set_damping(0.5, 4.0);
        assert_eq!(b.angular_damping, 1.0);
        b.set_linear_velocity(Vec3::X * 2.0);
        b.apply_damping(0.5);
        assert_abs_diff_eq!(b.velocity.linear.x, 1.5);
    }

    #[test]
    fn additional_damping_zeroes_tiny_velocities() {
        let shape = Arc::new(CollisionShape::from(ConvexShape::sphere(0.5)));
        let info = RigidBodyConstructionInfo::new(1.0, shape, Transform::IDENTITY)
            .with_damping(0.1, 0.1)
            .with_additional_damping(true);
        let mut b = RigidBody::new(info);
        b.set_linear_velocity(Vec3::new(0.01, 0.0, 0.0));
        b.apply_damping(1.0 / 60.0);
        assert_eq!(b.velocity.linear, Vec3::ZERO);
    }

    #[test]
    fn commit_keeps_previous_transform_for_velocity_reconstruction() {
        let mut b = body(1.0);
        let dt = 1.0 / 60.0;
        b.set_linear_velocity(Vec3::new(1.0, -2.0, 0.5));
        b.set_angular_velocity(Vec3::new(0.0, 3.0, 0.0));
        let predicted = b.predict_integrated_transform(dt);
        b.set_center_of_mass_transform(predicted);
        let (linear, angular) =
            calculate_velocity(b.interpolation_world_transform(), b.world_transform(), dt);
        assert_abs_diff_eq!((linear - b.velocity.linear).length(), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!((angular - b.velocity.angular).length(), 0.0, epsilon = 1e-2);
    }

    #[test]
    fn kinematic_velocity_comes_from_motion() {
        let mut b = body(0.0);
        b.collision.flags.is_kinematic = true;
        b.collision.world_transform =
            Transform::from_position_rotation(Vec3::new(1.0, 5.0, 0.0), Quat::IDENTITY);
        b.save_kinematic_state(0.5);
        assert_abs_diff_eq!(b.velocity.linear.x, 2.0, epsilon = 1e-5);
        assert_eq!(b.interpolation_world_transform(), b.world_transform());
    }

    #[test]
    fn constraints_block_removal() {
        let mut b = body(1.0);
        b.add_constraint_ref(7);
        b.add_constraint_ref(7);
        assert_eq!(b.constraint_refs(), &[7]);
        assert!(!b.can_be_removed());
        b.remove_constraint_ref(7);
        assert!(b.can_be_removed());
    }
}
