//! Collision detection: broadphase pair bookkeeping, the GJK/EPA narrow
//! phase, persistent manifolds, per-pair algorithms and CCD.

pub mod algorithm;
pub mod broadphase;
pub mod ccd;
pub mod convex_concave;
pub mod convex_convex;
pub mod dispatcher;
pub mod epa;
pub mod gjk;
pub mod manifold;
pub mod penetration;
pub mod simplex;

pub use algorithm::{CollisionAlgorithm, DispatchFunc, DispatchInfo};
pub use broadphase::{make_pair, OverlappingPairCache, Pair, Proxy, ProxyRef};
pub use ccd::{CastResult, GjkConvexCast};
pub use convex_concave::ConvexConcaveAlgorithm;
pub use convex_convex::ConvexConvexAlgorithm;
pub use dispatcher::{CollisionDispatcher, DispatchStats};
pub use gjk::{ClosestPointInput, ClosestPointResult, GjkPairDetector, LastUsedMethod};
pub use manifold::{ManifoldPoint, ManifoldPool, ManifoldResult, PersistentManifold};
pub use penetration::{
    EpaPenetrationDepthSolver, PenetrationDepth, PenetrationDepthSolver,
    SampledPenetrationDepthSolver,
};
pub use simplex::VoronoiSimplexSolver;
