//! SIMD-friendly helpers for support-mapping hot loops.
//!
//! Point clouds are scanned through `Vec3A` so the dot products use `glam`'s
//! SIMD lanes where the target supports them.

use glam::{Vec3, Vec3A};

/// Returns the index of the vertex with the largest dot product against
/// `direction`, along with that dot product.
pub fn max_dot_index(vertices: &[Vec3], direction: Vec3) -> Option<(usize, f32)> {
    if vertices.is_empty() {
        return None;
    }

    let dir = Vec3A::from(direction);
    let mut best_index = 0;
    let mut max_value = f32::NEG_INFINITY;

    for (index, vertex) in vertices.iter().enumerate() {
        let dot = Vec3A::from(*vertex).dot(dir);
        if dot > max_value {
            max_value = dot;
            best_index = index;
        }
    }

    if max_value.is_finite() {
        Some((best_index, max_value))
    } else {
        None
    }
}

/// Returns the vertex that produces the maximum dot product with `direction`.
pub fn max_dot_point(vertices: &[Vec3], direction: Vec3) -> Option<Vec3> {
    max_dot_index(vertices, direction).map(|(index, _)| vertices[index])
}

/// Evaluates [`max_dot_point`] for several directions in one sweep over the
/// vertices. `out` receives one point per direction; an empty cloud yields
/// the origin.
pub fn batch_max_dot_points(vertices: &[Vec3], directions: &[Vec3], out: &mut [Vec3]) {
    debug_assert_eq!(directions.len(), out.len());
    let dirs: Vec<Vec3A> = directions.iter().map(|d| Vec3A::from(*d)).collect();
    let mut best = vec![f32::NEG_INFINITY; dirs.len()];
    out.iter_mut().for_each(|p| *p = Vec3::ZERO);

    for vertex in vertices {
        let vert = Vec3A::from(*vertex);
        for (slot, dir) in dirs.iter().enumerate() {
            let dot = vert.dot(*dir);
            if dot > best[slot] {
                best[slot] = dot;
                out[slot] = *vertex;
            }
        }
    }
}
