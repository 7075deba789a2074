//! Collision Kernel – rigid-body collision detection and integration for Rust.
//!
//! The crate covers broadphase pair bookkeeping, convex support mapping,
//! GJK closest points with EPA or sampled penetration fallbacks, persistent
//! contact manifolds, conservative-advancement CCD and rigid-body
//! integration. Contact resolution is left to the caller: the outputs are
//! manifolds, updated transforms and velocities, and per-body hit fractions.

pub mod collision;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod utils;
pub mod world;

pub use glam::{Mat3, Quat, Vec3};

pub use collision::{
    algorithm::{CollisionAlgorithm, DispatchFunc, DispatchInfo},
    broadphase::{make_pair, OverlappingPairCache, Pair, Proxy, ProxyRef},
    ccd::{CastResult, GjkConvexCast},
    dispatcher::CollisionDispatcher,
    gjk::{ClosestPointInput, ClosestPointResult, GjkPairDetector},
    manifold::{ManifoldPoint, PersistentManifold},
    penetration::{EpaPenetrationDepthSolver, PenetrationDepthSolver, SampledPenetrationDepthSolver},
};
pub use config::{CollisionConfig, PenetrationStrategy};
pub use crate::core::{
    collision_object::{CollisionFlags, CollisionObject},
    mesh::{CompoundShape, ConcaveShape, StaticPlane, TriangleMesh},
    rigidbody::{RigidBody, RigidBodyConstructionInfo},
    shape::{CollisionShape, ConvexShape, ShapeType},
    types::{Aabb, Transform, Velocity},
};
pub use dynamics::integrator::Integrator;
pub use utils::allocator::{Arena, Handle};
pub use world::PhysicsWorld;
