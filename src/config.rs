//! Global configuration constants and the explicit collision configuration object.

use serde::{Deserialize, Serialize};

/// Default gravity vector applied to dynamic bodies (Y-up).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, -9.81, 0.0];

/// Default integration timestep (in seconds).
pub const DEFAULT_TIME_STEP: f32 = 1.0 / 60.0;

/// Default damping applied to linear velocity.
pub const DEFAULT_LINEAR_DAMPING: f32 = 0.0;

/// Default damping applied to angular velocity.
pub const DEFAULT_ANGULAR_DAMPING: f32 = 0.0;

/// Collision margin used by shapes that do not carry an implicit one.
pub const CONVEX_DISTANCE_MARGIN: f32 = 0.04;

/// Distance beyond which cached manifold points are dropped.
pub const CONTACT_BREAKING_THRESHOLD: f32 = 0.02;

/// Squared relative error that stops GJK once it no longer improves.
pub const GJK_RELATIVE_ERROR2: f32 = 1.0e-6;

/// Iteration cap guarding GJK against invalid transforms.
pub const GJK_MAX_ITERATIONS: u32 = 1000;

/// Maximum number of points stored in a single contact manifold.
pub const MANIFOLD_CACHE_SIZE: usize = 4;

/// Number of released manifolds kept around for reuse.
pub const MANIFOLD_POOL_CAPACITY: usize = 4096;

/// Penetration tolerated by continuous collision before reporting an impact.
pub const CCD_ALLOWED_PENETRATION: f32 = 0.04;

pub const ADDITIONAL_DAMPING_FACTOR: f32 = 0.005;
pub const ADDITIONAL_LINEAR_DAMPING_THRESHOLD_SQR: f32 = 0.01;
pub const ADDITIONAL_ANGULAR_DAMPING_THRESHOLD_SQR: f32 = 0.01;
pub const ADDITIONAL_ANGULAR_DAMPING_FACTOR: f32 = 0.01;

/// Strategy used when GJK cannot separate two shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PenetrationStrategy {
    /// Expanding polytope on the Minkowski difference.
    #[default]
    Epa,
    /// Minimum overlap over a fixed direction set, refined with GJK.
    Sampled,
    /// Penetrations the GJK core cannot resolve are reported as "no contact".
    Disabled,
}

/// Tunables handed to the collision dispatcher at construction.
///
/// The dispatcher copies this value into every [`DispatchInfo`] it builds, so
/// a query always observes one consistent configuration.
///
/// [`DispatchInfo`]: crate::collision::algorithm::DispatchInfo
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub contact_breaking_threshold: f32,
    pub gjk_relative_error2: f32,
    pub max_gjk_iterations: u32,
    pub penetration: PenetrationStrategy,
    /// Re-run the penetration solver when GJK ended on a degenerate simplex
    /// close to touching.
    pub catch_degeneracies: bool,
    pub ccd_enabled: bool,
    /// Use the closed-form sphere/sphere test instead of GJK.
    pub sphere_sphere_fast_path: bool,
    pub parallel_dispatch: bool,
    pub manifold_pool_capacity: usize,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            contact_breaking_threshold: CONTACT_BREAKING_THRESHOLD,
            gjk_relative_error2: GJK_RELATIVE_ERROR2,
            max_gjk_iterations: GJK_MAX_ITERATIONS,
            penetration: PenetrationStrategy::Epa,
            catch_degeneracies: true,
            ccd_enabled: true,
            sphere_sphere_fast_path: false,
            parallel_dispatch: false,
            manifold_pool_capacity: MANIFOLD_POOL_CAPACITY,
        }
    }
}

impl CollisionConfig {
    pub fn with_penetration(mut self, strategy: PenetrationStrategy) -> Self {
        self.penetration = strategy;
        self
    }

    pub fn with_parallel_dispatch(mut self, enabled: bool) -> Self {
        self.parallel_dispatch = enabled;
        self
    }

    pub fn with_ccd(mut self, enabled: bool) -> Self {
        self.ccd_enabled = enabled;
        self
    }
}
