use glam::Vec3;

const EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy)]
pub struct Plane {
    normal: Vec3,
    distance: f32,
}

impl Plane {
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let n = normal.normalize_or_zero();
        Self { normal: n, distance: n.dot(point) }
    }

    fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.distance
    }
}

/// Clips the provided polygon against a set of planes using the
/// Sutherland-Hodgman algorithm. Points on the negative side are kept.
pub fn clip_polygon(vertices: &[Vec3], planes: &[Plane]) -> Vec<Vec3> {
    let mut output = vertices.to_vec();
    for plane in planes {
        output = clip_against_plane(&output, *plane);
        if output.is_empty() {
            break;
        }
    }
    output
}

fn clip_against_plane(vertices: &[Vec3], plane: Plane) -> Vec<Vec3> {
    if vertices.is_empty() {
        return Vec::new();
    }

    let mut clipped = Vec::with_capacity(vertices.len() + 2);
    for i in 0..vertices.len() {
        let current = vertices[i];
        let next = vertices[(i + 1) % vertices.len()];

        let current_dist = plane.signed_distance(current);
        let next_dist = plane.signed_distance(next);
        let current_inside = current_dist <= EPSILON;
        let next_inside = next_dist <= EPSILON;

        if current_inside && next_inside {
            clipped.push(next);
        } else if current_inside != next_inside {
            if let Some(intersection) = line_plane_intersection(current, next, current_dist, next_dist) {
                clipped.push(intersection);
            }
            if next_inside {
                clipped.push(next);
            }
        }
    }
    clipped
}

fn line_plane_intersection(start: Vec3, end: Vec3, start_dist: f32, end_dist: f32) -> Option<Vec3> {
    let denom = start_dist - end_dist;
    if denom.abs() <= EPSILON {
        return None;
    }
    let t = start_dist / denom;
    Some(start + (end - start) * t)
}

/// Edge planes of a convex polygon, oriented so the interior is negative
/// regardless of the polygon's winding. `face_normal` is the plane normal.
fn edge_planes(polygon: &[Vec3], face_normal: Vec3) -> Vec<Plane> {
    let centroid = polygon.iter().copied().sum::<Vec3>() / polygon.len() as f32;
    let mut planes = Vec::with_capacity(polygon.len());
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        let edge = b - a;
        let mut outward = edge.cross(face_normal);
        if outward.length_squared() <= EPSILON * EPSILON {
            continue;
        }
        if outward.dot(centroid - a) > 0.0 {
            outward = -outward;
        }
        planes.push(Plane::from_point_normal(a, outward));
    }
    planes
}

/// A manifold point produced by clipping: position on each face and the
/// penetration along the contact normal (negative while still separated).
#[derive(Debug, Clone, Copy)]
pub struct FaceContact {
    pub on_a: Vec3,
    pub on_b: Vec3,
    pub penetration: f32,
}

/// Builds the contact points between two supporting faces.
///
/// Face B is clipped against the edge planes of face A, the surviving points
/// are projected onto face A's plane, and only points within
/// `max_separation_sq` of the deepest one along the normal are kept.
/// `axis` is the contact normal from A toward B; `reference` is the deepest
/// pair found by the narrowphase, kept as a fallback when clipping collapses.
pub fn manifold_between_two_faces(
    reference_on_a: Vec3,
    reference_on_b: Vec3,
    axis: Vec3,
    max_separation_sq: f32,
    face_a: &[Vec3],
    face_b: &[Vec3],
) -> Vec<FaceContact> {
    let reference_penetration = (reference_on_a - reference_on_b).dot(axis);

    // Either side degenerate: keep the single reference pair.
    if face_a.len() < 3 || face_b.len() < 2 {
        return vec![FaceContact {
            on_a: reference_on_a,
            on_b: reference_on_b,
            penetration: reference_penetration,
        }];
    }

    // The interior of face A, as seen along the contact normal.
    let planes = edge_planes(face_a, axis);
    let clipped = clip_polygon(face_b, &planes);
    if clipped.is_empty() {
        return vec![FaceContact {
            on_a: reference_on_a,
            on_b: reference_on_b,
            penetration: reference_penetration,
        }];
    }

    let plane_a = Plane::from_point_normal(face_a[0], axis);
    let mut contacts = Vec::with_capacity(clipped.len());
    let mut deepest = f32::MIN;
    for point_on_b in clipped {
        // Separation of this point from face A's plane, along the normal.
        let height = plane_a.signed_distance(point_on_b);
        let penetration = -height;
        deepest = deepest.max(penetration);
        contacts.push(FaceContact {
            on_a: point_on_b - axis * height,
            on_b: point_on_b,
            penetration,
        });
    }

    // Drop points trailing too far behind the deepest contact.
    let limit = max_separation_sq.sqrt();
    contacts.retain(|c| deepest - c.penetration <= limit);

    if contacts.is_empty() {
        contacts.push(FaceContact {
            on_a: reference_on_a,
            on_b: reference_on_b,
            penetration: reference_penetration,
        });
    }
    contacts
}

/// Prunes a manifold down to `max_points` by keeping the deepest point and
/// then greedily maximizing the spanned contact area.
pub fn prune_contact_points(contacts: &mut Vec<FaceContact>, axis: Vec3, max_points: usize) {
    if contacts.len() <= max_points {
        return;
    }

    let mut selected: Vec<FaceContact> = Vec::with_capacity(max_points);

    // Deepest point first.
    let deepest_index = contacts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.penetration.partial_cmp(&b.1.penetration).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    selected.push(contacts.swap_remove(deepest_index));

    while selected.len() < max_points && !contacts.is_empty() {
        let mut best_index = 0;
        let mut best_score = f32::MIN;
        for (index, candidate) in contacts.iter().enumerate() {
            // Tangential distance to the nearest already-selected point,
            // plus depth, approximates the gain in covered area.
            let mut min_dist = f32::MAX;
            for kept in &selected {
                let diff = candidate.on_b - kept.on_b;
                let tangential = diff - axis * diff.dot(axis);
                min_dist = min_dist.min(tangential.length());
            }
            let score = min_dist + candidate.penetration;
            if score > best_score {
                best_score = score;
                best_index = index;
            }
        }
        selected.push(contacts.swap_remove(best_index));
    }

    *contacts = selected;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(center: Vec3, half: f32, y: f32) -> Vec<Vec3> {
        vec![
            center + Vec3::new(half, y, half),
            center + Vec3::new(half, y, -half),
            center + Vec3::new(-half, y, -half),
            center + Vec3::new(-half, y, half),
        ]
    }

    #[test]
    fn coplanar_squares_clip_to_the_smaller_square() {
        let face_a = square(Vec3::ZERO, 1.0, 0.0);
        let face_b = square(Vec3::ZERO, 0.5, 0.01);
        let contacts = manifold_between_two_faces(
            Vec3::ZERO,
            Vec3::new(0.0, 0.01, 0.0),
            Vec3::Y,
            0.1,
            &face_a,
            &face_b,
        );
        assert_eq!(contacts.len(), 4);
        for contact in &contacts {
            assert!(contact.on_b.x.abs() <= 0.5 + 1.0e-4);
            assert!(contact.on_b.z.abs() <= 0.5 + 1.0e-4);
            assert!((contact.penetration + 0.01).abs() < 1.0e-4);
        }
    }

    #[test]
    fn offset_squares_clip_to_the_overlap_region() {
        let face_a = square(Vec3::ZERO, 1.0, 0.0);
        let face_b = square(Vec3::new(1.5, 0.0, 0.0), 1.0, -0.02);
        let contacts = manifold_between_two_faces(
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, -0.02, 0.0),
            Vec3::Y,
            0.1,
            &face_a,
            &face_b,
        );
        assert!(!contacts.is_empty());
        for contact in &contacts {
            assert!(contact.on_b.x >= 0.5 - 1.0e-3, "point {:?}", contact.on_b);
            assert!(contact.on_b.x <= 1.0 + 1.0e-3, "point {:?}", contact.on_b);
        }
    }

    #[test]
    fn pruning_keeps_the_deepest_point() {
        let mut contacts = vec![
            FaceContact { on_a: Vec3::ZERO, on_b: Vec3::ZERO, penetration: 0.01 },
            FaceContact { on_a: Vec3::X, on_b: Vec3::X, penetration: 0.05 },
            FaceContact { on_a: Vec3::Z, on_b: Vec3::Z, penetration: 0.02 },
            FaceContact { on_a: Vec3::X + Vec3::Z, on_b: Vec3::X + Vec3::Z, penetration: 0.01 },
            FaceContact { on_a: Vec3::X * 0.5, on_b: Vec3::X * 0.5, penetration: 0.01 },
            FaceContact { on_a: Vec3::Z * 0.5, on_b: Vec3::Z * 0.5, penetration: 0.01 },
        ];
        prune_contact_points(&mut contacts, Vec3::Y, 4);
        assert_eq!(contacts.len(), 4);
        assert!(contacts.iter().any(|c| (c.penetration - 0.05).abs() < 1.0e-6));
    }
}
