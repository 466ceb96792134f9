//! Gilbert-Johnson-Keerthi distance/intersection queries between convex
//! leaves, with Expanding Polytope penetration depth for overlapping pairs.
//!
//! The simplex tracks the individual support points on both shapes so that
//! separated queries can reconstruct witness points from the barycentric
//! coordinates of the closest simplex feature.

use glam::Vec3;

use crate::shapes::ConvexLeaf;

const MAX_GJK_ITERATIONS: usize = 32;
const MAX_EPA_ITERATIONS: usize = 32;
const EPSILON: f32 = 1.0e-6;

/// Outcome of a GJK query between two convex leaves.
#[derive(Debug, Clone)]
pub enum GjkResult {
    /// Shapes are separated. `axis` points from A toward B.
    Separated {
        distance: f32,
        point_on_a: Vec3,
        point_on_b: Vec3,
        axis: Vec3,
    },
    /// Shapes overlap. `axis` points from A toward B, `depth` is positive.
    Penetrating {
        depth: f32,
        point_on_a: Vec3,
        point_on_b: Vec3,
        axis: Vec3,
    },
    /// The query could not resolve a direction (degenerate geometry).
    Degenerate,
}

#[derive(Debug, Clone, Copy)]
struct SupportPoint {
    /// Minkowski difference point (a - b).
    w: Vec3,
    a: Vec3,
    b: Vec3,
}

fn support(leaf_a: &ConvexLeaf, leaf_b: &ConvexLeaf, direction: Vec3) -> SupportPoint {
    let a = leaf_a.support(direction);
    let b = leaf_b.support(-direction);
    SupportPoint { w: a - b, a, b }
}

/// Distance query with witness points, or penetration depth via EPA.
pub fn closest_points(leaf_a: &ConvexLeaf, leaf_b: &ConvexLeaf, max_distance: f32) -> GjkResult {
    let mut direction = leaf_b.position - leaf_a.position;
    if direction.length_squared() < EPSILON {
        direction = Vec3::X;
    }

    let mut simplex: Vec<SupportPoint> = Vec::with_capacity(4);
    simplex.push(support(leaf_a, leaf_b, direction));

    let mut closest = simplex[0].w;

    for _ in 0..MAX_GJK_ITERATIONS {
        let distance_sq = closest.length_squared();
        if distance_sq < EPSILON * EPSILON {
            // Origin reached: shapes overlap.
            return penetration(leaf_a, leaf_b, &simplex);
        }

        let new_point = support(leaf_a, leaf_b, -closest);

        // No progress toward the origin: `closest` is the true separation.
        let progress = closest.length_squared() - new_point.w.dot(closest);
        if progress < EPSILON * closest.length() {
            let distance = closest.length();
            let (point_on_a, point_on_b) = witness_points(&simplex, closest);
            let axis = -closest / distance;
            return GjkResult::Separated { distance, point_on_a, point_on_b, axis };
        }

        // Lower bound on the distance already exceeds the cutoff.
        let support_distance = new_point.w.dot(closest) / closest.length();
        if support_distance > max_distance {
            let distance = closest.length();
            let (point_on_a, point_on_b) = witness_points(&simplex, closest);
            return GjkResult::Separated { distance, point_on_a, point_on_b, axis: -closest / distance };
        }

        simplex.push(new_point);
        let (next_closest, reduced) = closest_on_simplex(&simplex);
        simplex = reduced;
        closest = next_closest;

        if simplex.len() == 4 {
            // Origin enclosed by the tetrahedron.
            return penetration(leaf_a, leaf_b, &simplex);
        }
    }

    let distance = closest.length();
    if distance < EPSILON {
        return GjkResult::Degenerate;
    }
    let (point_on_a, point_on_b) = witness_points(&simplex, closest);
    GjkResult::Separated {
        distance,
        point_on_a,
        point_on_b,
        axis: -closest / distance,
    }
}

/// Reconstructs the closest points on both shapes from the barycentric
/// weights of `closest` with respect to the simplex.
fn witness_points(simplex: &[SupportPoint], closest: Vec3) -> (Vec3, Vec3) {
    match simplex.len() {
        1 => (simplex[0].a, simplex[0].b),
        2 => {
            let w0 = simplex[0].w;
            let w1 = simplex[1].w;
            let edge = w1 - w0;
            let t = if edge.length_squared() > EPSILON {
                ((closest - w0).dot(edge) / edge.length_squared()).clamp(0.0, 1.0)
            } else {
                0.0
            };
            (
                simplex[0].a.lerp(simplex[1].a, t),
                simplex[0].b.lerp(simplex[1].b, t),
            )
        }
        _ => {
            let (u, v, w) = barycentric(closest, simplex[0].w, simplex[1].w, simplex[2].w);
            (
                simplex[0].a * u + simplex[1].a * v + simplex[2].a * w,
                simplex[0].b * u + simplex[1].b * v + simplex[2].b * w,
            )
        }
    }
}

fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> (f32, f32, f32) {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < EPSILON {
        return (1.0, 0.0, 0.0);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    (1.0 - v - w, v, w)
}

/// Closest point to the origin on the current simplex, and the simplex
/// reduced to the feature that supports it.
fn closest_on_simplex(simplex: &[SupportPoint]) -> (Vec3, Vec<SupportPoint>) {
    match simplex.len() {
        1 => (simplex[0].w, simplex.to_vec()),
        2 => closest_on_segment(simplex[0], simplex[1]),
        3 => closest_on_triangle(simplex[0], simplex[1], simplex[2]),
        4 => closest_on_tetrahedron(simplex),
        _ => (Vec3::ZERO, simplex.to_vec()),
    }
}

fn closest_on_segment(p0: SupportPoint, p1: SupportPoint) -> (Vec3, Vec<SupportPoint>) {
    let edge = p1.w - p0.w;
    let t = -p0.w.dot(edge);
    if t <= 0.0 {
        return (p0.w, vec![p0]);
    }
    let edge_sq = edge.length_squared();
    if t >= edge_sq {
        return (p1.w, vec![p1]);
    }
    (p0.w + edge * (t / edge_sq), vec![p0, p1])
}

fn closest_on_triangle(p0: SupportPoint, p1: SupportPoint, p2: SupportPoint) -> (Vec3, Vec<SupportPoint>) {
    let a = p0.w;
    let b = p1.w;
    let c = p2.w;
    let ab = b - a;
    let ac = c - a;
    let ap = -a;

    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, vec![p0]);
    }

    let bp = -b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, vec![p1]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        return (a + ab * t, vec![p0, p1]);
    }

    let cp = -c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, vec![p2]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        return (a + ac * t, vec![p0, p2]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * t, vec![p1, p2]);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, vec![p0, p1, p2])
}

fn closest_on_tetrahedron(simplex: &[SupportPoint]) -> (Vec3, Vec<SupportPoint>) {
    // Test the three faces containing the newest vertex; if the origin is
    // outside one of them, recurse onto that face. Otherwise it is inside.
    let d = simplex[3];
    let faces = [
        [simplex[0], simplex[1], d],
        [simplex[1], simplex[2], d],
        [simplex[2], simplex[0], d],
    ];
    let inner = [simplex[2].w, simplex[0].w, simplex[1].w];

    let mut best: Option<(f32, (Vec3, Vec<SupportPoint>))> = None;
    let mut outside_any = false;
    for (face, opposite) in faces.iter().zip(inner) {
        let normal = (face[1].w - face[0].w).cross(face[2].w - face[0].w);
        if normal.length_squared() < EPSILON {
            continue;
        }
        // Orient the normal away from the opposite vertex.
        let normal = if normal.dot(opposite - face[0].w) > 0.0 { -normal } else { normal };
        if normal.dot(-face[0].w) > 0.0 {
            outside_any = true;
            let candidate = closest_on_triangle(face[0], face[1], face[2]);
            let dist = candidate.0.length_squared();
            if best.as_ref().map(|(d, _)| dist < *d).unwrap_or(true) {
                best = Some((dist, candidate));
            }
        }
    }

    if !outside_any {
        // Origin inside the tetrahedron: caller switches to EPA.
        return (Vec3::ZERO, simplex.to_vec());
    }
    best.map(|(_, r)| r).unwrap_or((Vec3::ZERO, simplex.to_vec()))
}

/// Expanding polytope penetration query. The incoming simplex is padded to a
/// tetrahedron if GJK terminated early.
fn penetration(leaf_a: &ConvexLeaf, leaf_b: &ConvexLeaf, simplex: &[SupportPoint]) -> GjkResult {
    let mut polytope: Vec<SupportPoint> = simplex.to_vec();
    if !pad_to_tetrahedron(leaf_a, leaf_b, &mut polytope) {
        return fallback_penetration(leaf_a, leaf_b);
    }

    let mut faces = initial_faces(&polytope);
    if faces.is_empty() {
        return fallback_penetration(leaf_a, leaf_b);
    }

    for _ in 0..MAX_EPA_ITERATIONS {
        let Some((_, min_dist, normal)) = closest_face(&polytope, &faces) else {
            return fallback_penetration(leaf_a, leaf_b);
        };

        let new_point = support(leaf_a, leaf_b, normal);
        let expansion = new_point.w.dot(normal) - min_dist;
        if expansion < 1.0e-4 {
            return finish_epa(&polytope, &faces, min_dist, normal);
        }
        expand_polytope(&mut polytope, &mut faces, new_point);
        if faces.is_empty() {
            return fallback_penetration(leaf_a, leaf_b);
        }
    }

    match closest_face(&polytope, &faces) {
        Some((_, min_dist, normal)) => finish_epa(&polytope, &faces, min_dist, normal),
        None => fallback_penetration(leaf_a, leaf_b),
    }
}

fn finish_epa(polytope: &[SupportPoint], faces: &[(usize, usize, usize)], depth: f32, normal: Vec3) -> GjkResult {
    // Witness points from the barycentric coordinates of the closest face.
    let Some((face_index, _, _)) = closest_face(polytope, faces) else {
        return GjkResult::Degenerate;
    };
    let (i0, i1, i2) = faces[face_index];
    let projected = normal * depth;
    let (u, v, w) = barycentric(projected, polytope[i0].w, polytope[i1].w, polytope[i2].w);
    let point_on_a = polytope[i0].a * u + polytope[i1].a * v + polytope[i2].a * w;
    let point_on_b = polytope[i0].b * u + polytope[i1].b * v + polytope[i2].b * w;

    // Translating B along the face normal by `depth` separates the shapes,
    // so the normal is exactly the contact axis from A toward B.
    GjkResult::Penetrating {
        depth: depth.max(EPSILON),
        point_on_a,
        point_on_b,
        axis: normal,
    }
}

/// Guarantees the polytope has 4 affinely independent vertices.
fn pad_to_tetrahedron(leaf_a: &ConvexLeaf, leaf_b: &ConvexLeaf, polytope: &mut Vec<SupportPoint>) -> bool {
    let probe_directions = [
        Vec3::X,
        Vec3::Y,
        Vec3::Z,
        -Vec3::X,
        -Vec3::Y,
        -Vec3::Z,
        Vec3::new(1.0, 1.0, 1.0).normalize(),
        Vec3::new(-1.0, 1.0, -1.0).normalize(),
    ];
    let mut probe = probe_directions.iter();
    while polytope.len() < 4 {
        let Some(direction) = probe.next() else { return false };
        let candidate = support(leaf_a, leaf_b, *direction);
        let distinct = polytope
            .iter()
            .all(|p| (p.w - candidate.w).length_squared() > EPSILON);
        if distinct && !makes_degenerate(polytope, candidate.w) {
            polytope.push(candidate);
        }
    }
    true
}

fn makes_degenerate(polytope: &[SupportPoint], candidate: Vec3) -> bool {
    match polytope.len() {
        2 => {
            let edge = polytope[1].w - polytope[0].w;
            edge.cross(candidate - polytope[0].w).length_squared() < EPSILON
        }
        3 => {
            let normal = (polytope[1].w - polytope[0].w).cross(polytope[2].w - polytope[0].w);
            normal.dot(candidate - polytope[0].w).abs() < EPSILON
        }
        _ => false,
    }
}

fn initial_faces(polytope: &[SupportPoint]) -> Vec<(usize, usize, usize)> {
    let mut faces = vec![(0, 1, 2), (0, 2, 3), (0, 3, 1), (1, 3, 2)];
    for face in &mut faces {
        let ab = polytope[face.1].w - polytope[face.0].w;
        let ac = polytope[face.2].w - polytope[face.0].w;
        let normal = ab.cross(ac);
        if polytope[face.0].w.dot(normal) < 0.0 {
            std::mem::swap(&mut face.1, &mut face.2);
        }
    }
    faces
}

fn closest_face(polytope: &[SupportPoint], faces: &[(usize, usize, usize)]) -> Option<(usize, f32, Vec3)> {
    let mut best: Option<(usize, f32, Vec3)> = None;
    for (index, &(a, b, c)) in faces.iter().enumerate() {
        let ab = polytope[b].w - polytope[a].w;
        let ac = polytope[c].w - polytope[a].w;
        let normal = ab.cross(ac).normalize_or_zero();
        if normal == Vec3::ZERO {
            continue;
        }
        let dist = polytope[a].w.dot(normal);
        if best.map(|(_, d, _)| dist < d).unwrap_or(true) {
            best = Some((index, dist, normal));
        }
    }
    best
}

fn expand_polytope(polytope: &mut Vec<SupportPoint>, faces: &mut Vec<(usize, usize, usize)>, point: SupportPoint) {
    let new_index = polytope.len();
    polytope.push(point);

    let mut edges: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < faces.len() {
        let (a, b, c) = faces[i];
        let ab = polytope[b].w - polytope[a].w;
        let ac = polytope[c].w - polytope[a].w;
        let normal = ab.cross(ac).normalize_or_zero();
        if normal.dot(point.w - polytope[a].w) > 0.0 {
            for edge in [(a, b), (b, c), (c, a)] {
                if let Some(pos) = edges.iter().position(|e| *e == (edge.1, edge.0)) {
                    edges.remove(pos);
                } else {
                    edges.push(edge);
                }
            }
            faces.swap_remove(i);
        } else {
            i += 1;
        }
    }

    for (u, v) in edges {
        faces.push((u, v, new_index));
    }
}

/// Center-to-center axis with a depth estimate, for geometry EPA gave up on.
fn fallback_penetration(leaf_a: &ConvexLeaf, leaf_b: &ConvexLeaf) -> GjkResult {
    let axis = (leaf_b.position - leaf_a.position).normalize_or_zero();
    let axis = if axis == Vec3::ZERO { Vec3::Y } else { axis };
    let point_on_a = leaf_a.support(axis);
    let point_on_b = leaf_b.support(-axis);
    let depth = (point_on_a - point_on_b).dot(axis);
    if depth <= 0.0 {
        return GjkResult::Degenerate;
    }
    GjkResult::Penetrating {
        depth,
        point_on_a,
        point_on_b,
        axis,
    }
}
