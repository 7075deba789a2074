//! Core types: transforms, shapes, collision objects and rigid bodies.

pub mod collision_object;
pub mod mesh;
pub mod rigidbody;
pub mod shape;
pub mod types;

pub use collision_object::{CollisionFlags, CollisionObject};
pub use mesh::{CompoundShape, ConcaveShape, EmptyShape, MeshBuilder, StaticPlane, TriangleMesh};
pub use rigidbody::{RigidBody, RigidBodyConstructionInfo};
pub use shape::{CollisionShape, ConvexGeometry, ConvexShape, ShapeType};
pub use types::{Aabb, Transform, Velocity};
