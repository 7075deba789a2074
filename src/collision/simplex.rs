//! Incremental closest-point-to-origin solver over a simplex of up to four
//! Minkowski-difference vertices.
//!
//! Each vertex `w = p - q` is stored with the support points `p` (on A) and
//! `q` (on B) that produced it, so the closest points on both shapes can be
//! recovered from the barycentric coordinates of the closest point on the
//! simplex. Vertices that do not contribute to the closest feature are
//! dropped after every update.

use glam::Vec3;

const MAX_VERTICES: usize = 5;

/// Vertices closer than this (squared) to an existing one are considered duplicates.
pub const DEFAULT_EQUAL_VERTEX_THRESHOLD: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, Default)]
struct SubSimplexClosestResult {
    closest_point: Vec3,
    used_vertices: [bool; 4],
    barycentric: [f32; 4],
    degenerate: bool,
}

impl SubSimplexClosestResult {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn is_valid(&self) -> bool {
        self.barycentric.iter().all(|&b| b >= 0.0)
    }

    fn set_barycentric(&mut self, a: f32, b: f32, c: f32, d: f32) {
        self.barycentric = [a, b, c, d];
    }

    fn use_vertices(&mut self, used: [bool; 4]) {
        self.used_vertices = used;
    }
}

#[derive(Debug, Clone)]
pub struct VoronoiSimplexSolver {
    num_vertices: usize,
    vertices_w: [Vec3; MAX_VERTICES],
    points_p: [Vec3; MAX_VERTICES],
    points_q: [Vec3; MAX_VERTICES],
    cached_p1: Vec3,
    cached_p2: Vec3,
    cached_v: Vec3,
    last_w: Vec3,
    equal_vertex_threshold: f32,
    cached_valid_closest: bool,
    cached_bc: SubSimplexClosestResult,
    need_update: bool,
}

impl Default for VoronoiSimplexSolver {
    fn default() -> Self {
        Self {
            num_vertices: 0,
            vertices_w: [Vec3::ZERO; MAX_VERTICES],
            points_p: [Vec3::ZERO; MAX_VERTICES],
            points_q: [Vec3::ZERO; MAX_VERTICES],
            cached_p1: Vec3::ZERO,
            cached_p2: Vec3::ZERO,
            cached_v: Vec3::ZERO,
            last_w: Vec3::splat(f32::MAX),
            equal_vertex_threshold: DEFAULT_EQUAL_VERTEX_THRESHOLD,
            cached_valid_closest: false,
            cached_bc: SubSimplexClosestResult::default(),
            need_update: true,
        }
    }
}

impl VoronoiSimplexSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.cached_valid_closest = false;
        self.num_vertices = 0;
        self.need_update = true;
        self.last_w = Vec3::splat(f32::MAX);
        self.cached_bc.reset();
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn full_simplex(&self) -> bool {
        self.num_vertices == 4
    }

    pub fn empty_simplex(&self) -> bool {
        self.num_vertices == 0
    }

    pub fn equal_vertex_threshold(&self) -> f32 {
        self.equal_vertex_threshold
    }

    pub fn set_equal_vertex_threshold(&mut self, threshold: f32) {
        self.equal_vertex_threshold = threshold;
    }

    /// Adds `w = p - q` together with its support points.
    pub fn add_vertex(&mut self, w: Vec3, p: Vec3, q: Vec3) {
        if self.num_vertices >= MAX_VERTICES {
            return;
        }
        self.last_w = w;
        self.need_update = true;
        self.vertices_w[self.num_vertices] = w;
        self.points_p[self.num_vertices] = p;
        self.points_q[self.num_vertices] = q;
        self.num_vertices += 1;
    }

    /// Closest point of the simplex to the origin, or `None` when the
    /// simplex is degenerate.
    pub fn closest(&mut self) -> Option<Vec3> {
        if self.update_closest_vectors_and_points() {
            Some(self.cached_v)
        } else {
            None
        }
    }

    /// Last computed closest vector, valid or not.
    pub fn backup_closest(&self) -> Vec3 {
        self.cached_v
    }

    /// Closest points on A and B for the current simplex.
    pub fn compute_points(&mut self) -> (Vec3, Vec3) {
        self.update_closest_vectors_and_points();
        (self.cached_p1, self.cached_p2)
    }

    /// Largest squared length among the simplex vertices.
    pub fn max_vertex(&self) -> f32 {
        self.vertices_w[..self.num_vertices]
            .iter()
            .map(|w| w.length_squared())
            .fold(0.0, f32::max)
    }

    pub fn in_simplex(&self, w: Vec3) -> bool {
        if w == self.last_w {
            return true;
        }
        self.vertices_w[..self.num_vertices]
            .iter()
            .any(|v| v.distance_squared(w) <= self.equal_vertex_threshold)
    }

    /// Copies the current vertices into the given buffers and returns the count.
    pub fn simplex(&self, p: &mut [Vec3; 4], q: &mut [Vec3; 4], w: &mut [Vec3; 4]) -> usize {
        let count = self.num_vertices.min(4);
        p[..count].copy_from_slice(&self.points_p[..count]);
        q[..count].copy_from_slice(&self.points_q[..count]);
        w[..count].copy_from_slice(&self.vertices_w[..count]);
        count
    }

    fn remove_vertex(&mut self, index: usize) {
        debug_assert!(self.num_vertices > 0);
        self.num_vertices -= 1;
        let last = self.num_vertices;
        self.vertices_w[index] = self.vertices_w[last];
        self.points_p[index] = self.points_p[last];
        self.points_q[index] = self.points_q[last];
    }

    fn reduce_vertices(&mut self, used: [bool; 4]) {
        if self.num_vertices >= 4 && !used[3] {
            self.remove_vertex(3);
        }
        if self.num_vertices >= 3 && !used[2] {
            self.remove_vertex(2);
        }
        if self.num_vertices >= 2 && !used[1] {
            self.remove_vertex(1);
        }
        if self.num_vertices >= 1 && !used[0] {
            self.remove_vertex(0);
        }
    }

    fn interpolate(&self, count: usize) -> (Vec3, Vec3) {
        let bary = self.cached_bc.barycentric;
        let mut p1 = Vec3::ZERO;
        let mut p2 = Vec3::ZERO;
        for i in 0..count {
            p1 += self.points_p[i] * bary[i];
            p2 += self.points_q[i] * bary[i];
        }
        (p1, p2)
    }

    fn update_closest_vectors_and_points(&mut self) -> bool {
        if !self.need_update {
            return self.cached_valid_closest;
        }

        self.cached_bc.reset();
        self.need_update = false;

        match self.num_vertices {
            0 => {
                self.cached_valid_closest = false;
            }
            1 => {
                self.cached_p1 = self.points_p[0];
                self.cached_p2 = self.points_q[0];
                self.cached_v = self.cached_p1 - self.cached_p2;
                self.cached_bc.set_barycentric(1.0, 0.0, 0.0, 0.0);
                self.cached_valid_closest = self.cached_bc.is_valid();
            }
            2 => {
                let from = self.vertices_w[0];
                let to = self.vertices_w[1];
                let v = to - from;
                let mut t = v.dot(-from);
                let mut used = [false; 4];

                if t > 0.0 {
                    let dot_vv = v.dot(v);
                    if t < dot_vv {
                        t /= dot_vv;
                        used[0] = true;
                        used[1] = true;
                    } else {
                        t = 1.0;
                        used[1] = true;
                    }
                } else {
                    t = 0.0;
                    used[0] = true;
                }

                self.cached_bc.use_vertices(used);
                self.cached_bc.set_barycentric(1.0 - t, t, 0.0, 0.0);
                self.cached_p1 = self.points_p[0] + t * (self.points_p[1] - self.points_p[0]);
                self.cached_p2 = self.points_q[0] + t * (self.points_q[1] - self.points_q[0]);
                self.cached_v = self.cached_p1 - self.cached_p2;

                self.reduce_vertices(used);
                self.cached_valid_closest = self.cached_bc.is_valid();
            }
            3 => {
                let [a, b, c, ..] = self.vertices_w;
                closest_pt_point_triangle(Vec3::ZERO, a, b, c, &mut self.cached_bc);
                let (p1, p2) = self.interpolate(3);
                self.cached_p1 = p1;
                self.cached_p2 = p2;
                self.cached_v = p1 - p2;

                self.reduce_vertices(self.cached_bc.used_vertices);
                self.cached_valid_closest = self.cached_bc.is_valid();
            }
            4 => {
                let [a, b, c, d, _] = self.vertices_w;
                let has_separation =
                    closest_pt_point_tetrahedron(Vec3::ZERO, a, b, c, d, &mut self.cached_bc);

                if has_separation {
                    let (p1, p2) = self.interpolate(4);
                    self.cached_p1 = p1;
                    self.cached_p2 = p2;
                    self.cached_v = p1 - p2;
                    self.reduce_vertices(self.cached_bc.used_vertices);
                    self.cached_valid_closest = self.cached_bc.is_valid();
                } else if self.cached_bc.degenerate {
                    self.cached_valid_closest = false;
                } else {
                    // Origin is inside the tetrahedron.
                    self.cached_valid_closest = true;
                    self.cached_v = Vec3::ZERO;
                }
            }
            _ => {
                self.cached_valid_closest = false;
            }
        }

        self.cached_valid_closest
    }
}

fn closest_pt_point_triangle(
    p: Vec3,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    result: &mut SubSimplexClosestResult,
) -> bool {
    result.used_vertices = [false; 4];

    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        result.closest_point = a;
        result.use_vertices([true, false, false, false]);
        result.set_barycentric(1.0, 0.0, 0.0, 0.0);
        return true;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        result.closest_point = b;
        result.use_vertices([false, true, false, false]);
        result.set_barycentric(0.0, 1.0, 0.0, 0.0);
        return true;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        result.closest_point = a + v * ab;
        result.use_vertices([true, true, false, false]);
        result.set_barycentric(1.0 - v, v, 0.0, 0.0);
        return true;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        result.closest_point = c;
        result.use_vertices([false, false, true, false]);
        result.set_barycentric(0.0, 0.0, 1.0, 0.0);
        return true;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        result.closest_point = a + w * ac;
        result.use_vertices([true, false, true, false]);
        result.set_barycentric(1.0 - w, 0.0, w, 0.0);
        return true;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        result.closest_point = b + w * (c - b);
        result.use_vertices([false, true, true, false]);
        result.set_barycentric(0.0, 1.0 - w, w, 0.0);
        return true;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    result.closest_point = a + ab * v + ac * w;
    result.use_vertices([true, true, true, false]);
    result.set_barycentric(1.0 - v - w, v, w, 0.0);
    true
}

/// 1 when `p` and `d` lie on opposite sides of plane `abc`, 0 when on the
/// same side, -1 when the tetrahedron is too flat to tell.
fn point_outside_of_plane(p: Vec3, a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> i32 {
    let normal = (b - a).cross(c - a);
    let sign_p = (p - a).dot(normal);
    let sign_d = (d - a).dot(normal);

    if sign_d * sign_d < 1.0e-4 * 1.0e-4 {
        return -1;
    }
    i32::from(sign_p * sign_d < 0.0)
}

/// Returns `false` when `p` is inside the tetrahedron or the tetrahedron is
/// degenerate (flagged on `result`).
fn closest_pt_point_tetrahedron(
    p: Vec3,
    a: Vec3,
    b: Vec3,
    c: Vec3,
    d: Vec3,
    result: &mut SubSimplexClosestResult,
) -> bool {
    let mut temp = SubSimplexClosestResult::default();

    result.closest_point = p;
    result.use_vertices([true; 4]);

    let outside_abc = point_outside_of_plane(p, a, b, c, d);
    let outside_acd = point_outside_of_plane(p, a, c, d, b);
    let outside_adb = point_outside_of_plane(p, a, d, b, c);
    let outside_bdc = point_outside_of_plane(p, b, d, c, a);

    if outside_abc < 0 || outside_acd < 0 || outside_adb < 0 || outside_bdc < 0 {
        result.degenerate = true;
        return false;
    }

    if outside_abc == 0 && outside_acd == 0 && outside_adb == 0 && outside_bdc == 0 {
        return false;
    }

    let mut best_sq_dist = f32::MAX;

    if outside_abc != 0 {
        closest_pt_point_triangle(p, a, b, c, &mut temp);
        let q = temp.closest_point;
        let sq_dist = (q - p).length_squared();
        if sq_dist < best_sq_dist {
            best_sq_dist = sq_dist;
            result.closest_point = q;
            let u = temp.used_vertices;
            result.use_vertices([u[0], u[1], u[2], false]);
            let bc = temp.barycentric;
            result.set_barycentric(bc[0], bc[1], bc[2], 0.0);
        }
    }

    if outside_acd != 0 {
        closest_pt_point_triangle(p, a, c, d, &mut temp);
        let q = temp.closest_point;
        let sq_dist = (q - p).length_squared();
        if sq_dist < best_sq_dist {
            best_sq_dist = sq_dist;
            result.closest_point = q;
            let u = temp.used_vertices;
            result.use_vertices([u[0], false, u[1], u[2]]);
            let bc = temp.barycentric;
            result.set_barycentric(bc[0], 0.0, bc[1], bc[2]);
        }
    }

    if outside_adb != 0 {
        closest_pt_point_triangle(p, a, d, b, &mut temp);
        let q = temp.closest_point;
        let sq_dist = (q - p).length_squared();
        if sq_dist < best_sq_dist {
            best_sq_dist = sq_dist;
            result.closest_point = q;
            let u = temp.used_vertices;
            result.use_vertices([u[0], u[2], false, u[1]]);
            let bc = temp.barycentric;
            result.set_barycentric(bc[0], bc[2], 0.0, bc[1]);
        }
    }

    if outside_bdc != 0 {
        closest_pt_point_triangle(p, b, d, c, &mut temp);
        let q = temp.closest_point;
        let sq_dist = (q - p).length_squared();
        if sq_dist < best_sq_dist {
            result.closest_point = q;
            let u = temp.used_vertices;
            result.use_vertices([false, u[0], u[2], u[1]]);
            let bc = temp.barycentric;
            result.set_barycentric(0.0, bc[0], bc[2], bc[1]);
        }
    }

    true
}
