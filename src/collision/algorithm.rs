//! Per-pair narrow-phase algorithms and the data handed to them.

use std::fmt;

use super::manifold::PersistentManifold;
use crate::config::{CollisionConfig, CCD_ALLOWED_PENETRATION, DEFAULT_TIME_STEP};
use crate::core::collision_object::CollisionObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchFunc {
    #[default]
    Discrete,
    Continuous,
}

/// Per-step dispatch parameters. Carries a copy of the dispatcher's
/// configuration so algorithms can notice toggles flipping between steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchInfo {
    pub time_step: f32,
    pub step_count: u64,
    pub dispatch_func: DispatchFunc,
    pub allowed_ccd_penetration: f32,
    pub config: CollisionConfig,
}

impl Default for DispatchInfo {
    fn default() -> Self {
        Self {
            time_step: DEFAULT_TIME_STEP,
            step_count: 0,
            dispatch_func: DispatchFunc::Discrete,
            allowed_ccd_penetration: CCD_ALLOWED_PENETRATION,
            config: CollisionConfig::default(),
        }
    }
}

impl DispatchInfo {
    pub fn with_config(mut self, config: CollisionConfig) -> Self {
        self.config = config;
        self
    }
}

/// Narrow-phase handler persisted on a broadphase pair.
///
/// `body0`/`body1` passed to every call must match the order the algorithm
/// was created with.
pub trait CollisionAlgorithm: Send + Sync + fmt::Debug {
    /// Updates the pair's manifold from the current world transforms.
    fn process_collision(
        &mut self,
        body0: &CollisionObject,
        body1: &CollisionObject,
        info: &DispatchInfo,
    );

    /// Earliest fraction in `[0, 1]` of the step's motion at which the pair
    /// touches; `1.0` means no impact within the step.
    fn calculate_time_of_impact(
        &mut self,
        body0: &CollisionObject,
        body1: &CollisionObject,
        info: &DispatchInfo,
    ) -> f32;

    /// Appends copies of the manifolds this algorithm owns.
    fn collect_manifolds(&self, out: &mut Vec<PersistentManifold>);
}
