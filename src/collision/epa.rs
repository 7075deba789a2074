//! Expanding Polytope Algorithm.
//!
//! Works on the margin-inflated Minkowski difference `A - B`. A boolean GJK
//! pass builds a tetrahedron enclosing the origin, then the polytope is grown
//! toward the face closest to the origin until the support function stops
//! making progress. Witness points come from the barycentric coordinates of
//! the origin's projection onto that face.

use glam::Vec3;
use log::{debug, warn};

use super::penetration::{PenetrationDepth, PenetrationDepthSolver};
use super::simplex::VoronoiSimplexSolver;
use crate::core::shape::{ConvexShape, ShapeType};
use crate::core::types::Transform;

pub const EPA_MAX_ITERATIONS: usize = 128;
pub const EPA_ACCURACY: f32 = 1.0e-4;

const ENCLOSE_MAX_ITERATIONS: usize = 64;
const TOLERANCE: f32 = 1.0e-10;
/// Origin may sit this far outside a face of the seed tetrahedron.
const FACE_SLACK: f32 = 1.0e-5;

#[derive(Debug, Clone, Copy)]
pub struct EpaPenetrationDepthSolver {
    pub max_iterations: usize,
    pub accuracy: f32,
}

impl Default for EpaPenetrationDepthSolver {
    fn default() -> Self {
        Self {
            max_iterations: EPA_MAX_ITERATIONS,
            accuracy: EPA_ACCURACY,
        }
    }
}

impl PenetrationDepthSolver for EpaPenetrationDepthSolver {
    fn calc_pen_depth(
        &self,
        _simplex: &mut VoronoiSimplexSolver,
        shape_a: &ConvexShape,
        shape_b: &ConvexShape,
        transform_a: &Transform,
        transform_b: &Transform,
    ) -> Option<PenetrationDepth> {
        if shape_a.shape_type() == ShapeType::Sphere && shape_b.shape_type() == ShapeType::Sphere {
            return sphere_depth(shape_a.margin(), transform_a, shape_b.margin(), transform_b);
        }
        let pair = MinkowskiPair {
            shape_a,
            shape_b,
            transform_a,
            transform_b,
        };
        let tetrahedron = enclose_origin(&pair)?;
        let mut polytope = Polytope::new(&tetrahedron)?;
        polytope.expand(&pair, self.max_iterations, self.accuracy)
    }
}

/// Closed-form witnesses for two spheres. Coincident centres separate
/// along +Y.
fn sphere_depth(
    radius_a: f32,
    transform_a: &Transform,
    radius_b: f32,
    transform_b: &Transform,
) -> Option<PenetrationDepth> {
    let delta = transform_b.position - transform_a.position;
    let length = delta.length();
    if !length.is_finite() {
        return None;
    }
    let depth = radius_a + radius_b - length;
    if depth <= 0.0 {
        return None;
    }
    let axis = if length > f32::EPSILON {
        delta / length
    } else {
        Vec3::Y
    };
    Some(PenetrationDepth {
        point_on_a: transform_a.position + axis * radius_a,
        point_on_b: transform_b.position - axis * radius_b,
    })
}

#[derive(Debug, Clone, Copy)]
struct SupportVertex {
    w: Vec3,
    a: Vec3,
    b: Vec3,
}

struct MinkowskiPair<'a> {
    shape_a: &'a ConvexShape,
    shape_b: &'a ConvexShape,
    transform_a: &'a Transform,
    transform_b: &'a Transform,
}

impl MinkowskiPair<'_> {
    fn support(&self, direction: Vec3) -> SupportVertex {
        let a = self.shape_a.support_world(direction, self.transform_a);
        let b = self.shape_b.support_world(-direction, self.transform_b);
        SupportVertex { w: a - b, a, b }
    }
}

fn any_perpendicular(v: Vec3) -> Vec3 {
    let other = if v.x.abs() < 0.57 { Vec3::X } else { Vec3::Y };
    v.cross(other)
}

fn contains_vertex(vertices: &[SupportVertex], w: Vec3) -> bool {
    vertices.iter().any(|v| v.w.distance_squared(w) <= TOLERANCE)
}

/// Boolean GJK: returns four support vertices whose hull contains the origin.
fn enclose_origin(pair: &MinkowskiPair) -> Option<Vec<SupportVertex>> {
    let mut direction = pair.transform_a.position - pair.transform_b.position;
    if direction.length_squared() <= TOLERANCE {
        direction = Vec3::X;
    }

    let first = pair.support(direction);
    let mut simplex = vec![first];
    direction = -first.w;

    for _ in 0..ENCLOSE_MAX_ITERATIONS {
        if direction.length_squared() <= TOLERANCE {
            return promote_to_tetrahedron(pair, simplex);
        }
        let vertex = pair.support(direction);
        if vertex.w.dot(direction) < 0.0 {
            return None;
        }
        if contains_vertex(&simplex, vertex.w) {
            return promote_to_tetrahedron(pair, simplex);
        }
        simplex.push(vertex);
        if reduce_simplex(&mut simplex, &mut direction) {
            return Some(simplex);
        }
    }
    debug!("epa: origin enclosure did not terminate");
    None
}

/// Shrinks the simplex to the feature closest to the origin and updates the
/// search direction. The newest vertex is last. Returns true once a
/// tetrahedron contains the origin.
fn reduce_simplex(simplex: &mut Vec<SupportVertex>, direction: &mut Vec3) -> bool {
    match simplex.len() {
        2 => {
            reduce_line(simplex, direction);
            false
        }
        3 => {
            reduce_triangle(simplex, direction);
            false
        }
        4 => reduce_tetrahedron(simplex, direction),
        _ => false,
    }
}

fn reduce_line(simplex: &mut Vec<SupportVertex>, direction: &mut Vec3) {
    let a = simplex[1];
    let b = simplex[0];
    let ab = b.w - a.w;
    let len_sq = ab.length_squared();
    let t = if len_sq > TOLERANCE {
        (-a.w).dot(ab) / len_sq
    } else {
        0.0
    };
    if t <= 0.0 {
        *simplex = vec![a];
        *direction = -a.w;
    } else if t >= 1.0 {
        *simplex = vec![b];
        *direction = -b.w;
    } else {
        *direction = -(a.w + ab * t);
    }
}

fn reduce_triangle(simplex: &mut Vec<SupportVertex>, direction: &mut Vec3) {
    let a = simplex[2];
    let b = simplex[1];
    let c = simplex[0];
    let ab = b.w - a.w;
    let ac = c.w - a.w;
    let ao = -a.w;

    let d1 = ab.dot(ao);
    let d2 = ac.dot(ao);
    if d1 <= 0.0 && d2 <= 0.0 {
        *simplex = vec![a];
        *direction = ao;
        return;
    }

    let bo = -b.w;
    let d3 = ab.dot(bo);
    let d4 = ac.dot(bo);
    if d3 >= 0.0 && d4 <= d3 {
        *simplex = vec![b];
        *direction = bo;
        return;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        *simplex = vec![b, a];
        *direction = -(a.w + ab * t);
        return;
    }

    let co = -c.w;
    let d5 = ab.dot(co);
    let d6 = ac.dot(co);
    if d6 >= 0.0 && d5 <= d6 {
        *simplex = vec![c];
        *direction = co;
        return;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        *simplex = vec![c, a];
        *direction = -(a.w + ac * t);
        return;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        *simplex = vec![c, b];
        *direction = -(b.w + (c.w - b.w) * t);
        return;
    }

    let denom = va + vb + vc;
    if denom.abs() <= TOLERANCE {
        *direction = ab.cross(ac);
        return;
    }
    let v = vb / denom;
    let w = vc / denom;
    *direction = -(a.w + ab * v + ac * w);
}

fn reduce_tetrahedron(simplex: &mut Vec<SupportVertex>, direction: &mut Vec3) -> bool {
    let a = simplex[3];
    let b = simplex[2];
    let c = simplex[1];
    let d = simplex[0];

    // Faces through the newest vertex; the face bcd was already checked.
    for (p, q, opposite) in [(b, c, d), (c, d, b), (d, b, c)] {
        let mut normal = (p.w - a.w).cross(q.w - a.w);
        if normal.dot(opposite.w - a.w) > 0.0 {
            normal = -normal;
        }
        if normal.dot(-a.w) > 0.0 {
            *simplex = vec![q, p, a];
            *direction = normal;
            return false;
        }
    }
    true
}

/// Adds vertices along directions orthogonal to the current simplex until it
/// is a tetrahedron. Used when the origin lies on a lower-dimensional simplex.
fn promote_to_tetrahedron(
    pair: &MinkowskiPair,
    mut simplex: Vec<SupportVertex>,
) -> Option<Vec<SupportVertex>> {
    while simplex.len() < 4 {
        let candidates: Vec<Vec3> = match simplex.len() {
            1 => vec![Vec3::X, Vec3::Y, Vec3::Z],
            2 => {
                let edge = simplex[1].w - simplex[0].w;
                let perp = any_perpendicular(edge);
                vec![perp, edge.cross(perp)]
            }
            _ => {
                let normal = (simplex[1].w - simplex[0].w).cross(simplex[2].w - simplex[0].w);
                if normal.length_squared() > TOLERANCE {
                    vec![normal]
                } else {
                    vec![any_perpendicular(simplex[1].w - simplex[0].w)]
                }
            }
        };

        let mut added = false;
        'search: for candidate in candidates {
            for query in [candidate, -candidate] {
                if query.length_squared() <= TOLERANCE {
                    continue;
                }
                let vertex = pair.support(query);
                if vertex.w.dot(query) <= 0.0 || contains_vertex(&simplex, vertex.w) {
                    continue;
                }
                simplex.push(vertex);
                added = true;
                break 'search;
            }
        }
        if !added {
            return None;
        }
    }
    Some(simplex)
}

#[derive(Debug, Clone, Copy)]
struct Face {
    indices: [usize; 3],
    normal: Vec3,
    distance: f32,
}

struct Polytope {
    vertices: Vec<SupportVertex>,
    faces: Vec<Face>,
    interior: Vec3,
}

impl Polytope {
    fn new(tetrahedron: &[SupportVertex]) -> Option<Self> {
        let [a, b, c, d] = [
            tetrahedron[0].w,
            tetrahedron[1].w,
            tetrahedron[2].w,
            tetrahedron[3].w,
        ];
        let volume = (b - a).cross(c - a).dot(d - a);
        if volume.abs() <= TOLERANCE {
            warn!("epa: seed tetrahedron is flat (volume {volume})");
            return None;
        }

        let mut polytope = Self {
            vertices: tetrahedron.to_vec(),
            faces: Vec::with_capacity(64),
            interior: (a + b + c + d) * 0.25,
        };
        for [i, j, k] in [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]] {
            let face = polytope.make_face(i, j, k)?;
            if face.distance < -FACE_SLACK {
                return None;
            }
            polytope.faces.push(face);
        }
        Some(polytope)
    }

    /// Builds a face with its normal pointing away from the interior point.
    fn make_face(&self, i: usize, j: usize, k: usize) -> Option<Face> {
        let a = self.vertices[i].w;
        let b = self.vertices[j].w;
        let c = self.vertices[k].w;
        let mut normal = (b - a).cross(c - a);
        let len_sq = normal.length_squared();
        if len_sq <= TOLERANCE * TOLERANCE {
            return None;
        }
        normal /= len_sq.sqrt();
        let mut indices = [i, j, k];
        if normal.dot(a - self.interior) < 0.0 {
            normal = -normal;
            indices = [i, k, j];
        }
        Some(Face {
            indices,
            normal,
            distance: normal.dot(a),
        })
    }

    fn closest_face(&self) -> Option<Face> {
        self.faces
            .iter()
            .copied()
            .min_by(|lhs, rhs| lhs.distance.total_cmp(&rhs.distance))
    }

    fn expand(
        &mut self,
        pair: &MinkowskiPair,
        max_iterations: usize,
        accuracy: f32,
    ) -> Option<PenetrationDepth> {
        for _ in 0..max_iterations {
            let face = self.closest_face()?;
            let vertex = pair.support(face.normal);
            let support_distance = vertex.w.dot(face.normal);

            if support_distance - face.distance <= accuracy * support_distance.abs().max(1.0)
                || contains_vertex(&self.vertices, vertex.w)
            {
                return self.witness(&face);
            }

            let new_index = self.vertices.len();
            self.vertices.push(vertex);

            let mut horizon: Vec<(usize, usize)> = Vec::new();
            let vertices = &self.vertices;
            self.faces.retain(|f| {
                let visible = f.normal.dot(vertex.w - vertices[f.indices[0]].w) > 0.0;
                if visible {
                    let [i0, i1, i2] = f.indices;
                    for edge in [(i0, i1), (i1, i2), (i2, i0)] {
                        if let Some(pos) = horizon
                            .iter()
                            .position(|&(x, y)| x == edge.1 && y == edge.0)
                        {
                            horizon.swap_remove(pos);
                        } else {
                            horizon.push(edge);
                        }
                    }
                }
                !visible
            });

            if horizon.is_empty() {
                warn!("epa: empty horizon at depth {}", face.distance);
                return self.witness(&face);
            }

            for (i, j) in horizon {
                if let Some(new_face) = self.make_face(i, j, new_index) {
                    self.faces.push(new_face);
                }
            }
            if self.faces.is_empty() {
                warn!("epa: polytope collapsed");
                return None;
            }
        }

        let face = self.closest_face()?;
        warn!(
            "epa: no convergence after {max_iterations} iterations (depth {}, {} faces)",
            face.distance,
            self.faces.len()
        );
        self.witness(&face)
    }

    fn witness(&self, face: &Face) -> Option<PenetrationDepth> {
        let [v0, v1, v2] = face.indices.map(|i| self.vertices[i]);
        let projection = face.normal * face.distance;
        let (u, v, w) = barycentric(projection, v0.w, v1.w, v2.w)?;
        let depth = PenetrationDepth {
            point_on_a: v0.a * u + v1.a * v + v2.a * w,
            point_on_b: v0.b * u + v1.b * v + v2.b * w,
        };
        (!depth.is_degenerate()).then_some(depth)
    }
}

fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, f32, f32)> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= TOLERANCE * TOLERANCE {
        return None;
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Some((1.0 - v - w, v, w))
}
