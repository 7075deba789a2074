//! Transform integration helpers layered on top of `glam`.

use std::f32::consts::FRAC_PI_4;

use glam::{Quat, Vec3};

use crate::core::types::Transform;

/// Largest rotation a single integration step may apply.
///
/// Tighter than the angular speed clamp applied to rigid-body velocities
/// (π/2 per step). A spin between the two limits keeps its velocity but
/// turns the transform by only π/4, so `calculate_velocity` on the result
/// gives back `ANGULAR_MOTION_THRESHOLD / dt` rather than the input speed.
pub const ANGULAR_MOTION_THRESHOLD: f32 = FRAC_PI_4;

/// Integrates `current` by the given velocities using the exponential map.
pub fn integrate_transform(current: &Transform, linear: Vec3, angular: Vec3, dt: f32) -> Transform {
    let position = current.position + linear * dt;

    let speed = angular.length();
    let mut angle = speed;
    if angle * dt > ANGULAR_MOTION_THRESHOLD {
        angle = ANGULAR_MOTION_THRESHOLD / dt;
    }

    let axis = if speed < 0.001 {
        // Taylor expansion of sin(x/2)/x around zero.
        angular * (0.5 * dt - (dt * dt * dt) * 0.020_833_334 * angle * angle)
    } else {
        (angular / speed) * (0.5 * angle * dt).sin()
    };

    let delta = Quat::from_xyzw(axis.x, axis.y, axis.z, (angle * dt * 0.5).cos());
    Transform {
        position,
        rotation: (delta * current.rotation).normalize(),
    }
}

/// Returns the shortest-arc rotation axis and angle taking `from` to `to`.
pub fn calculate_diff_axis_angle(from: Quat, to: Quat) -> (Vec3, f32) {
    let mut delta = (to * from.conjugate()).normalize();
    if delta.w < 0.0 {
        delta = -delta;
    }
    let angle = 2.0 * delta.w.clamp(-1.0, 1.0).acos();
    let axis = Vec3::new(delta.x, delta.y, delta.z);
    let len_sq = axis.length_squared();
    if len_sq < f32::EPSILON * f32::EPSILON {
        (Vec3::X, angle)
    } else {
        (axis / len_sq.sqrt(), angle)
    }
}

/// Reconstructs the linear and angular velocity that moves `from` to `to` in `dt`.
pub fn calculate_velocity(from: &Transform, to: &Transform, dt: f32) -> (Vec3, Vec3) {
    if dt <= 0.0 {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    let linear = (to.position - from.position) / dt;
    let (axis, angle) = calculate_diff_axis_angle(from.rotation, to.rotation);
    (linear, axis * angle / dt)
}

/// Builds two unit vectors spanning the plane orthogonal to `n`.
pub fn plane_space(n: Vec3) -> (Vec3, Vec3) {
    if n.z.abs() > std::f32::consts::FRAC_1_SQRT_2 {
        let a = n.y * n.y + n.z * n.z;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(0.0, -n.z * k, n.y * k);
        let q = Vec3::new(a * k, -n.x * p.z, n.x * p.y);
        (p, q)
    } else {
        let a = n.x * n.x + n.y * n.y;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(-n.y * k, n.x * k, 0.0);
        let q = Vec3::new(-n.z * p.y, n.z * p.x, a * k);
        (p, q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn integrate_then_reconstruct_matches_velocity() {
        let start = Transform::from_position_rotation(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.3),
        );
        let linear = Vec3::new(0.5, -1.0, 2.0);
        let angular = Vec3::new(0.2, 1.5, -0.7);
        let dt = 1.0 / 60.0;

        let end = integrate_transform(&start, linear, angular, dt);
        let (lin, ang) = calculate_velocity(&start, &end, dt);

        assert_abs_diff_eq!(lin.x, linear.x, epsilon = 1e-3);
        assert_abs_diff_eq!(lin.y, linear.y, epsilon = 1e-3);
        assert_abs_diff_eq!(lin.z, linear.z, epsilon = 1e-3);
        assert_abs_diff_eq!(ang.x, angular.x, epsilon = 1e-2);
        assert_abs_diff_eq!(ang.y, angular.y, epsilon = 1e-2);
        assert_abs_diff_eq!(ang.z, angular.z, epsilon = 1e-2);
    }

    #[test]
    fn integration_clamps_large_rotations() {
        let start = Transform::default();
        let end = integrate_transform(&start, Vec3::ZERO, Vec3::new(0.0, 1000.0, 0.0), 0.1);
        let (_, angle) = calculate_diff_axis_angle(start.rotation, end.rotation);
        assert!(angle <= ANGULAR_MOTION_THRESHOLD + 1e-4, "angle was {angle}");
    }

    #[test]
    fn fast_spin_reconstructs_clamped_speed() {
        let dt = 1.0 / 60.0;
        let axis = Vec3::new(1.0, 2.0, -2.0).normalize();
        // 1.2 rad per step: above the transform clamp, below the velocity clamp.
        let angular = axis * (1.2 / dt);

        let start = Transform::default();
        let end = integrate_transform(&start, Vec3::ZERO, angular, dt);
        let (_, reconstructed) = calculate_velocity(&start, &end, dt);

        assert_abs_diff_eq!(
            reconstructed.length(),
            ANGULAR_MOTION_THRESHOLD / dt,
            epsilon = 1e-2
        );
        assert_abs_diff_eq!(reconstructed.normalize().dot(axis), 1.0, epsilon = 1e-4);
        assert!(reconstructed.length() < angular.length());
    }

    #[test]
    fn plane_space_is_orthonormal() {
        for n in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(1.0, 2.0, -3.0).normalize()] {
            let (p, q) = plane_space(n);
            assert_abs_diff_eq!(p.dot(n), 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(q.dot(n), 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(p.dot(q), 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(p.length(), 1.0, epsilon = 1e-5);
        }
    }
}
