use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::shape::ShapeType;
use super::types::{Aabb, Transform};
use crate::utils::math::plane_space;

/// Half size used for the bounds of unbounded shapes.
const LARGE_EXTENT: f32 = 1.0e18;

/// Static geometry that exposes its triangles to the narrow phase.
pub trait ConcaveShape: Send + Sync + fmt::Debug {
    fn shape_type(&self) -> ShapeType;

    /// Calls `callback(triangle, part_id, triangle_index)` for every triangle
    /// whose bounds overlap `aabb` (both in the shape's local frame).
    fn process_all_triangles(&self, aabb: &Aabb, callback: &mut dyn FnMut(&[Vec3; 3], i32, i32));

    fn local_aabb(&self) -> Aabb;

    /// Margin applied to each triangle handed to the narrow phase.
    fn margin(&self) -> f32 {
        0.0
    }

    fn aabb(&self, transform: &Transform) -> Aabb {
        self.local_aabb().transformed(transform).expanded(self.margin())
    }
}

/// Indexed triangle mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    pub bounds: Aabb,
    pub margin: f32,
}

impl TriangleMesh {
    pub fn builder(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> MeshBuilder {
        MeshBuilder::new(vertices, indices)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// Returns `None` when an index is out of range.
    pub fn triangle(&self, index: usize) -> Option<[Vec3; 3]> {
        let [a, b, c] = *self.indices.get(index)?;
        Some([
            *self.vertices.get(a as usize)?,
            *self.vertices.get(b as usize)?,
            *self.vertices.get(c as usize)?,
        ])
    }
}

impl ConcaveShape for TriangleMesh {
    fn shape_type(&self) -> ShapeType {
        ShapeType::TriangleMesh
    }

    fn process_all_triangles(&self, aabb: &Aabb, callback: &mut dyn FnMut(&[Vec3; 3], i32, i32)) {
        let query = aabb.expanded(self.margin);
        for index in 0..self.indices.len() {
            let Some(triangle) = self.triangle(index) else {
                continue;
            };
            if Aabb::from_points(&triangle).overlaps(&query) {
                callback(&triangle, 0, index as i32);
            }
        }
    }

    fn local_aabb(&self) -> Aabb {
        self.bounds
    }

    fn margin(&self) -> f32 {
        self.margin
    }
}

/// Cooks triangle meshes from raw vertex/index buffers.
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    vertices: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
    margin: f32,
}

impl MeshBuilder {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            indices,
            margin: 0.0,
        }
    }

    /// Merges vertices that fall in the same quantised grid cell.
    pub fn weld_vertices(mut self, epsilon: f32) -> Self {
        if epsilon <= 0.0 || self.vertices.is_empty() {
            return self;
        }

        let inv = 1.0 / epsilon;
        let mut map: HashMap<(i32, i32, i32), u32> = HashMap::new();
        let mut welded: Vec<Vec3> = Vec::new();
        let mut remap: Vec<u32> = Vec::with_capacity(self.vertices.len());

        for v in &self.vertices {
            let key = (
                (v.x * inv).round() as i32,
                (v.y * inv).round() as i32,
                (v.z * inv).round() as i32,
            );
            let index = *map.entry(key).or_insert_with(|| {
                welded.push(*v);
                (welded.len() - 1) as u32
            });
            remap.push(index);
        }

        for tri in &mut self.indices {
            for corner in tri.iter_mut() {
                if let Some(&mapped) = remap.get(*corner as usize) {
                    *corner = mapped;
                }
            }
        }

        self.vertices = welded;
        self
    }

    /// Moves vertices so their centroid sits at the origin.
    pub fn recenter(mut self) -> Self {
        if self.vertices.is_empty() {
            return self;
        }
        let centroid: Vec3 =
            self.vertices.iter().copied().sum::<Vec3>() / self.vertices.len() as f32;
        for vertex in &mut self.vertices {
            *vertex -= centroid;
        }
        self
    }

    pub fn margin(mut self, margin: f32) -> Self {
        self.margin = margin.max(0.0);
        self
    }

    pub fn build(self) -> TriangleMesh {
        TriangleMesh {
            bounds: Aabb::from_points(&self.vertices),
            vertices: self.vertices,
            indices: self.indices,
            margin: self.margin,
        }
    }
}

/// Infinite plane `normal · x = constant`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StaticPlane {
    pub normal: Vec3,
    pub constant: f32,
}

impl StaticPlane {
    pub fn new(normal: Vec3, constant: f32) -> Self {
        Self {
            normal: normal.try_normalize().unwrap_or(Vec3::Y),
            constant,
        }
    }
}

impl ConcaveShape for StaticPlane {
    fn shape_type(&self) -> ShapeType {
        ShapeType::StaticPlane
    }

    /// Emits two triangles covering the projection of `aabb` onto the plane.
    fn process_all_triangles(&self, aabb: &Aabb, callback: &mut dyn FnMut(&[Vec3; 3], i32, i32)) {
        let center = aabb.center();
        let radius = aabb.extent().length();
        let (t0, t1) = plane_space(self.normal);
        let on_plane = center - (self.normal.dot(center) - self.constant) * self.normal;
        let (u, v) = (t0 * radius, t1 * radius);

        callback(&[on_plane + u + v, on_plane + u - v, on_plane - u - v], 0, 0);
        callback(&[on_plane - u - v, on_plane - u + v, on_plane + u + v], 0, 1);
    }

    fn local_aabb(&self) -> Aabb {
        Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(LARGE_EXTENT))
    }
}

/// Concave children placed at local transforms. Triangles are reported in
/// the compound's frame with the child index as their part id.
#[derive(Debug, Clone, Default)]
pub struct CompoundShape {
    children: Vec<(Transform, Arc<dyn ConcaveShape>)>,
    bounds: Option<Aabb>,
    margin: f32,
}

impl CompoundShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_child(mut self, transform: Transform, child: Arc<dyn ConcaveShape>) -> Self {
        self.add_child(transform, child);
        self
    }

    pub fn add_child(&mut self, transform: Transform, child: Arc<dyn ConcaveShape>) {
        let bounds = child.local_aabb().transformed(&transform);
        self.bounds = Some(match self.bounds {
            Some(current) => current.merged(&bounds),
            None => bounds,
        });
        self.margin = self.margin.max(child.margin());
        self.children.push((transform, child));
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

impl ConcaveShape for CompoundShape {
    fn shape_type(&self) -> ShapeType {
        ShapeType::Compound
    }

    fn process_all_triangles(&self, aabb: &Aabb, callback: &mut dyn FnMut(&[Vec3; 3], i32, i32)) {
        for (part, (transform, child)) in self.children.iter().enumerate() {
            let local_query = aabb.transformed(&transform.inverse());
            child.process_all_triangles(&local_query, &mut |triangle, _, index| {
                let placed = triangle.map(|vertex| transform.transform_point(vertex));
                callback(&placed, part as i32, index);
            });
        }
    }

    fn local_aabb(&self) -> Aabb {
        self.bounds.unwrap_or_else(|| Aabb::new(Vec3::ZERO, Vec3::ZERO))
    }

    fn margin(&self) -> f32 {
        self.margin
    }
}

/// Concave shape without geometry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmptyShape;

impl ConcaveShape for EmptyShape {
    fn shape_type(&self) -> ShapeType {
        ShapeType::Empty
    }

    fn process_all_triangles(&self, _aabb: &Aabb, _callback: &mut dyn FnMut(&[Vec3; 3], i32, i32)) {
    }

    fn local_aabb(&self) -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn quad() -> TriangleMesh {
        TriangleMesh::builder(
            vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 1.0),
            ],
            vec![[0, 1, 2], [0, 4, 3]],
        )
        .weld_vertices(1e-4)
        .build()
    }

    #[test]
    fn welding_merges_duplicates() {
        let mesh = quad();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices[1], [0, 2, 3]);
    }

    #[test]
    fn mesh_reports_only_overlapping_triangles() {
        let mesh = quad();
        let mut hits = Vec::new();
        let above = Aabb::new(Vec3::new(0.6, 0.5, -0.9), Vec3::new(0.9, 1.0, -0.7));
        mesh.process_all_triangles(&above, &mut |_, _, index| hits.push(index));
        assert!(hits.is_empty());

        let touching = Aabb::new(Vec3::new(0.6, -0.1, -0.9), Vec3::new(0.9, 0.1, -0.7));
        mesh.process_all_triangles(&touching, &mut |_, _, index| hits.push(index));
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn plane_triangles_lie_on_plane_and_cover_query() {
        let plane = StaticPlane::new(Vec3::Y, 2.0);
        let query = Aabb::from_center_extent(Vec3::new(3.0, 5.0, -1.0), Vec3::ONE);
        let mut triangles = Vec::new();
        plane.process_all_triangles(&query, &mut |tri, _, _| triangles.push(*tri));
        assert_eq!(triangles.len(), 2);
        for tri in &triangles {
            for vertex in tri {
                assert_abs_diff_eq!(vertex.y, 2.0, epsilon = 1e-5);
            }
        }
        let covered = Aabb::from_points(&triangles.concat());
        assert!(covered.min.x <= 2.0 && covered.max.x >= 4.0);
    }

    #[test]
    fn compound_places_children_and_tags_parts() {
        let mesh: Arc<dyn ConcaveShape> = Arc::new(quad());
        let compound = CompoundShape::new()
            .with_child(Transform::IDENTITY, Arc::clone(&mesh))
            .with_child(Transform::from_position(Vec3::new(10.0, 0.0, 0.0)), mesh);
        assert_eq!(compound.child_count(), 2);
        assert_abs_diff_eq!(compound.local_aabb().max.x, 11.0);

        let query = Aabb::from_center_extent(Vec3::new(10.5, 0.0, 0.5), Vec3::splat(0.2));
        let mut hits = Vec::new();
        compound.process_all_triangles(&query, &mut |tri, part, index| {
            hits.push((part, index));
            assert!(tri.iter().all(|v| v.x >= 9.0));
        });
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|&(part, _)| part == 1));
    }

    #[test]
    fn empty_shape_emits_nothing() {
        let mut count = 0;
        EmptyShape.process_all_triangles(&Aabb::new(Vec3::splat(-1.0), Vec3::ONE), &mut |_, _, _| {
            count += 1
        });
        assert_eq!(count, 0);
    }
}
