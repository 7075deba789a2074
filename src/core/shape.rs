//! Convex support-mapped shapes and the shape wrapper handed to collision objects.
//!
//! Every convex variant is described by a support function that excludes the
//! collision margin; the margin-inflated surface is obtained by pushing that
//! point `margin` further along the query direction. Spheres and capsules are
//! pure margin around a point or segment, while boxes and cylinders shrink
//! their core so the inflated surface matches the declared extents.

use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::mesh::{ConcaveShape, TriangleMesh};
use super::types::{Aabb, Transform};
use crate::config::CONVEX_DISTANCE_MARGIN;
use crate::utils::simd::{batch_max_dot_points, max_dot_point};

/// Tag identifying the concrete geometry behind a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeType {
    Sphere,
    Box,
    Capsule,
    Cone,
    Cylinder,
    ConvexHull,
    ConvexTriangleMesh,
    Triangle,
    MinkowskiSum,
    MinkowskiDifference,
    UniformScaling,
    TriangleMesh,
    StaticPlane,
    Compound,
    Empty,
}

impl ShapeType {
    pub fn is_convex(self) -> bool {
        !self.is_concave()
    }

    pub fn is_concave(self) -> bool {
        matches!(
            self,
            ShapeType::TriangleMesh
                | ShapeType::StaticPlane
                | ShapeType::Compound
                | ShapeType::Empty
        )
    }
}

/// Geometry of a convex shape in its local frame, before scaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConvexGeometry {
    Sphere {
        radius: f32,
    },
    Box {
        half_extents: Vec3,
    },
    /// Capsule aligned with the local Y axis.
    Capsule {
        radius: f32,
        half_height: f32,
    },
    /// Cone aligned with the local Y axis, apex at `+height / 2`.
    Cone {
        radius: f32,
        height: f32,
    },
    /// Cylinder aligned with the local Y axis; `x` is the radius.
    Cylinder {
        half_extents: Vec3,
    },
    ConvexHull {
        points: Vec<Vec3>,
    },
    ConvexTriangleMesh {
        mesh: Arc<TriangleMesh>,
    },
    Triangle {
        vertices: [Vec3; 3],
    },
    MinkowskiSum {
        a: Box<ConvexShape>,
        b: Box<ConvexShape>,
        transform_a: Transform,
        transform_b: Transform,
    },
    MinkowskiDifference {
        a: Box<ConvexShape>,
        b: Box<ConvexShape>,
        transform_a: Transform,
        transform_b: Transform,
    },
    UniformScaling {
        child: Box<ConvexShape>,
        factor: f32,
    },
}

/// Immutable convex shape: geometry, per-axis scaling and collision margin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvexShape {
    pub geometry: ConvexGeometry,
    pub local_scaling: Vec3,
    margin: f32,
}

impl ConvexShape {
    fn from_geometry(geometry: ConvexGeometry) -> Self {
        Self {
            geometry,
            local_scaling: Vec3::ONE,
            margin: CONVEX_DISTANCE_MARGIN,
        }
    }

    pub fn sphere(radius: f32) -> Self {
        Self::from_geometry(ConvexGeometry::Sphere {
            radius: radius.max(0.0),
        })
    }

    /// Box with the given half extents. The margin is carved out of the extents.
    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::from_geometry(ConvexGeometry::Box {
            half_extents: half_extents.abs(),
        })
    }

    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::from_geometry(ConvexGeometry::Capsule {
            radius: radius.max(0.0),
            half_height: half_height.max(0.0),
        })
    }

    pub fn cone(radius: f32, height: f32) -> Self {
        Self::from_geometry(ConvexGeometry::Cone {
            radius: radius.max(0.0),
            height: height.max(0.0),
        })
    }

    pub fn cylinder(half_extents: Vec3) -> Self {
        Self::from_geometry(ConvexGeometry::Cylinder {
            half_extents: half_extents.abs(),
        })
    }

    pub fn convex_hull(points: Vec<Vec3>) -> Self {
        Self::from_geometry(ConvexGeometry::ConvexHull { points })
    }

    /// Convex hull of the vertices of an indexed mesh.
    pub fn convex_mesh(mesh: Arc<TriangleMesh>) -> Self {
        Self::from_geometry(ConvexGeometry::ConvexTriangleMesh { mesh })
    }

    pub fn triangle(vertices: [Vec3; 3]) -> Self {
        Self::from_geometry(ConvexGeometry::Triangle { vertices })
    }

    pub fn minkowski_sum(
        a: ConvexShape,
        b: ConvexShape,
        transform_a: Transform,
        transform_b: Transform,
    ) -> Self {
        Self::from_geometry(ConvexGeometry::MinkowskiSum {
            a: Box::new(a),
            b: Box::new(b),
            transform_a,
            transform_b,
        })
    }

    pub fn minkowski_difference(
        a: ConvexShape,
        b: ConvexShape,
        transform_a: Transform,
        transform_b: Transform,
    ) -> Self {
        Self::from_geometry(ConvexGeometry::MinkowskiDifference {
            a: Box::new(a),
            b: Box::new(b),
            transform_a,
            transform_b,
        })
    }

    pub fn uniform_scaling(child: ConvexShape, factor: f32) -> Self {
        Self::from_geometry(ConvexGeometry::UniformScaling {
            child: Box::new(child),
            factor,
        })
    }

    /// Sets the collision margin. Spheres, capsules and composite shapes derive
    /// their margin from their geometry and ignore this value.
    pub fn with_margin(mut self, margin: f32) -> Self {
        self.margin = margin.max(0.0);
        self
    }

    pub fn with_local_scaling(mut self, scaling: Vec3) -> Self {
        self.local_scaling = scaling.abs();
        self
    }

    pub fn shape_type(&self) -> ShapeType {
        match &self.geometry {
            ConvexGeometry::Sphere { .. } => ShapeType::Sphere,
            ConvexGeometry::Box { .. } => ShapeType::Box,
            ConvexGeometry::Capsule { .. } => ShapeType::Capsule,
            ConvexGeometry::Cone { .. } => ShapeType::Cone,
            ConvexGeometry::Cylinder { .. } => ShapeType::Cylinder,
            ConvexGeometry::ConvexHull { .. } => ShapeType::ConvexHull,
            ConvexGeometry::ConvexTriangleMesh { .. } => ShapeType::ConvexTriangleMesh,
            ConvexGeometry::Triangle { .. } => ShapeType::Triangle,
            ConvexGeometry::MinkowskiSum { .. } => ShapeType::MinkowskiSum,
            ConvexGeometry::MinkowskiDifference { .. } => ShapeType::MinkowskiDifference,
            ConvexGeometry::UniformScaling { .. } => ShapeType::UniformScaling,
        }
    }

    /// Effective collision margin, always non-negative.
    pub fn margin(&self) -> f32 {
        match &self.geometry {
            ConvexGeometry::Sphere { radius } => radius * self.local_scaling.x,
            ConvexGeometry::Capsule { radius, .. } => radius * self.local_scaling.x,
            ConvexGeometry::Box { half_extents } | ConvexGeometry::Cylinder { half_extents } => self
                .margin
                .min((*half_extents * self.local_scaling).min_element())
                .max(0.0),
            ConvexGeometry::MinkowskiSum { a, b, .. }
            | ConvexGeometry::MinkowskiDifference { a, b, .. } => a.margin() + b.margin(),
            ConvexGeometry::UniformScaling { child, factor } => child.margin() * factor.abs(),
            _ => self.margin,
        }
    }

    /// Dimensions of the margin-free core of a box or cylinder.
    fn core_extents(&self, half_extents: Vec3) -> Vec3 {
        (half_extents * self.local_scaling - Vec3::splat(self.margin())).max(Vec3::ZERO)
    }

    /// Farthest point of the margin-free core along `direction` (local frame).
    pub fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        match &self.geometry {
            ConvexGeometry::Sphere { .. } => Vec3::ZERO,
            ConvexGeometry::Box { half_extents } => {
                let core = self.core_extents(*half_extents);
                Vec3::new(
                    select(direction.x, core.x),
                    select(direction.y, core.y),
                    select(direction.z, core.z),
                )
            }
            ConvexGeometry::Capsule { half_height, .. } => {
                Vec3::new(0.0, select(direction.y, half_height * self.local_scaling.y), 0.0)
            }
            ConvexGeometry::Cylinder { half_extents } => {
                cylinder_support(self.core_extents(*half_extents), direction)
            }
            _ => {
                let scaled = direction * self.local_scaling;
                self.unscaled_support(scaled) * self.local_scaling
            }
        }
    }

    fn unscaled_support(&self, direction: Vec3) -> Vec3 {
        match &self.geometry {
            ConvexGeometry::Cone { radius, height } => cone_support(*radius, *height, direction),
            ConvexGeometry::ConvexHull { points } => {
                max_dot_point(points, direction).unwrap_or(Vec3::ZERO)
            }
            ConvexGeometry::ConvexTriangleMesh { mesh } => {
                max_dot_point(&mesh.vertices, direction).unwrap_or(Vec3::ZERO)
            }
            ConvexGeometry::Triangle { vertices } => {
                max_dot_point(vertices, direction).unwrap_or(Vec3::ZERO)
            }
            ConvexGeometry::MinkowskiSum {
                a,
                b,
                transform_a,
                transform_b,
            } => {
                let on_a = child_support(a, transform_a, direction);
                let on_b = child_support(b, transform_b, direction);
                on_a + on_b
            }
            ConvexGeometry::MinkowskiDifference {
                a,
                b,
                transform_a,
                transform_b,
            } => {
                let on_a = child_support(a, transform_a, direction);
                let on_b = child_support(b, transform_b, -direction);
                on_a - on_b
            }
            ConvexGeometry::UniformScaling { child, factor } => {
                child.local_support_without_margin(direction) * *factor
            }
            // Handled with their own scaling rules in `local_support_without_margin`.
            ConvexGeometry::Sphere { .. }
            | ConvexGeometry::Box { .. }
            | ConvexGeometry::Capsule { .. }
            | ConvexGeometry::Cylinder { .. } => Vec3::ZERO,
        }
    }

    /// Farthest point of the margin-inflated surface along `direction` (local frame).
    pub fn local_support(&self, direction: Vec3) -> Vec3 {
        let mut point = self.local_support_without_margin(direction);
        let margin = self.margin();
        if margin != 0.0 {
            let dir = if direction.length_squared() < f32::EPSILON * f32::EPSILON {
                Vec3::splat(-1.0).normalize()
            } else {
                direction.normalize()
            };
            point += dir * margin;
        }
        point
    }

    /// Margin-free support in world space for a world-space direction.
    pub fn support_world_without_margin(&self, direction: Vec3, transform: &Transform) -> Vec3 {
        let local_dir = transform.inverse_transform_vector(direction);
        transform.transform_point(self.local_support_without_margin(local_dir))
    }

    pub fn support_world(&self, direction: Vec3, transform: &Transform) -> Vec3 {
        let local_dir = transform.inverse_transform_vector(direction);
        transform.transform_point(self.local_support(local_dir))
    }

    /// Vectorised [`ConvexShape::local_support_without_margin`]; `out` receives one
    /// point per direction.
    pub fn batched_support_without_margin(&self, directions: &[Vec3], out: &mut [Vec3]) {
        debug_assert_eq!(directions.len(), out.len());
        match &self.geometry {
            ConvexGeometry::ConvexHull { points } => self.batched_cloud(points, directions, out),
            ConvexGeometry::ConvexTriangleMesh { mesh } => {
                self.batched_cloud(&mesh.vertices, directions, out)
            }
            _ => {
                for (dir, slot) in directions.iter().zip(out.iter_mut()) {
                    *slot = self.local_support_without_margin(*dir);
                }
            }
        }
    }

    fn batched_cloud(&self, cloud: &[Vec3], directions: &[Vec3], out: &mut [Vec3]) {
        let scaled: Vec<Vec3> = directions.iter().map(|d| *d * self.local_scaling).collect();
        batch_max_dot_points(cloud, &scaled, out);
        for point in out.iter_mut() {
            *point *= self.local_scaling;
        }
    }

    /// World-space bounds of the margin-inflated shape.
    pub fn aabb(&self, transform: &Transform) -> Aabb {
        match &self.geometry {
            ConvexGeometry::Sphere { .. } => {
                Aabb::from_center_extent(transform.position, Vec3::splat(self.margin()))
            }
            ConvexGeometry::Box { half_extents } => {
                Aabb::from_center_extent(Vec3::ZERO, *half_extents * self.local_scaling)
                    .transformed(transform)
            }
            ConvexGeometry::Capsule { half_height, .. } => {
                let axis = transform
                    .transform_vector(Vec3::new(0.0, half_height * self.local_scaling.y, 0.0));
                Aabb::from_center_extent(
                    transform.position,
                    axis.abs() + Vec3::splat(self.margin()),
                )
            }
            ConvexGeometry::Triangle { vertices } => {
                let points = vertices.map(|v| transform.transform_point(v * self.local_scaling));
                Aabb::from_points(&points).expanded(self.margin())
            }
            _ => self.sampled_aabb(transform),
        }
    }

    /// Bounds from the support function along the six world axes.
    fn sampled_aabb(&self, transform: &Transform) -> Aabb {
        let mut min = Vec3::ZERO;
        let mut max = Vec3::ZERO;
        for (i, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
            max[i] = self.support_world(axis, transform)[i];
            min[i] = self.support_world(-axis, transform)[i];
        }
        Aabb::new(min, max)
    }

    /// Diagonal of the local inertia tensor for a body of `mass`.
    pub fn calculate_local_inertia(&self, mass: f32) -> Vec3 {
        match &self.geometry {
            ConvexGeometry::Sphere { .. } => {
                let radius = self.margin();
                Vec3::splat(0.4 * mass * radius * radius)
            }
            ConvexGeometry::Cylinder { half_extents } => {
                let scaled = *half_extents * self.local_scaling;
                let radius2 = scaled.x * scaled.x;
                let height = 2.0 * scaled.y;
                let side = mass * (3.0 * radius2 + height * height) / 12.0;
                Vec3::new(side, 0.5 * mass * radius2, side)
            }
            _ => {
                // Solid box matching the local bounds.
                let size = self.aabb(&Transform::IDENTITY).extent() * 2.0;
                let size2 = size * size;
                mass / 12.0 * Vec3::new(size2.y + size2.z, size2.x + size2.z, size2.x + size2.y)
            }
        }
    }
}

fn select(direction: f32, extent: f32) -> f32 {
    if direction >= 0.0 {
        extent
    } else {
        -extent
    }
}

fn child_support(child: &ConvexShape, transform: &Transform, direction: Vec3) -> Vec3 {
    let local_dir = transform.inverse_transform_vector(direction);
    transform.transform_point(child.local_support_without_margin(local_dir))
}

fn cone_support(radius: f32, height: f32, v: Vec3) -> Vec3 {
    let half_height = 0.5 * height;
    let sin_angle = radius / (radius * radius + height * height).sqrt().max(f32::EPSILON);
    if v.y > v.length() * sin_angle {
        return Vec3::new(0.0, half_height, 0.0);
    }
    let s = (v.x * v.x + v.z * v.z).sqrt();
    if s > f32::EPSILON {
        let d = radius / s;
        Vec3::new(v.x * d, -half_height, v.z * d)
    } else {
        Vec3::new(0.0, -half_height, 0.0)
    }
}

fn cylinder_support(core: Vec3, v: Vec3) -> Vec3 {
    let radius = core.x;
    let y = select(v.y, core.y);
    let s = (v.x * v.x + v.z * v.z).sqrt();
    if s > f32::EPSILON {
        let d = radius / s;
        Vec3::new(v.x * d, y, v.z * d)
    } else {
        Vec3::new(radius, y, 0.0)
    }
}

/// Shape attached to a collision object.
#[derive(Debug, Clone)]
pub enum CollisionShape {
    Convex(ConvexShape),
    Concave(Arc<dyn ConcaveShape>),
}

impl CollisionShape {
    pub fn shape_type(&self) -> ShapeType {
        match self {
            CollisionShape::Convex(shape) => shape.shape_type(),
            CollisionShape::Concave(shape) => shape.shape_type(),
        }
    }

    pub fn is_convex(&self) -> bool {
        matches!(self, CollisionShape::Convex(_))
    }

    pub fn as_convex(&self) -> Option<&ConvexShape> {
        match self {
            CollisionShape::Convex(shape) => Some(shape),
            CollisionShape::Concave(_) => None,
        }
    }

    pub fn as_concave(&self) -> Option<&dyn ConcaveShape> {
        match self {
            CollisionShape::Convex(_) => None,
            CollisionShape::Concave(shape) => Some(shape.as_ref()),
        }
    }

    pub fn margin(&self) -> f32 {
        match self {
            CollisionShape::Convex(shape) => shape.margin(),
            CollisionShape::Concave(shape) => shape.margin(),
        }
    }

    pub fn aabb(&self, transform: &Transform) -> Aabb {
        match self {
            CollisionShape::Convex(shape) => shape.aabb(transform),
            CollisionShape::Concave(shape) => shape.aabb(transform),
        }
    }

    /// Concave shapes are treated as static geometry and have no inertia.
    pub fn calculate_local_inertia(&self, mass: f32) -> Vec3 {
        match self {
            CollisionShape::Convex(shape) => shape.calculate_local_inertia(mass),
            CollisionShape::Concave(_) => Vec3::ZERO,
        }
    }
}

impl From<ConvexShape> for CollisionShape {
    fn from(shape: ConvexShape) -> Self {
        CollisionShape::Convex(shape)
    }
}
