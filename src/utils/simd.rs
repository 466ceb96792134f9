//! 4-wide AABB tests used by the quadtree walker.
//!
//! Node bounds are stored in structure-of-arrays form so one `Vec4` holds the
//! same coordinate of all four children.

use glam::{Vec3, Vec4};

/// Bounds of four boxes, one coordinate per lane.
#[derive(Debug, Clone, Copy)]
pub struct AabbBatch {
    pub min_x: Vec4,
    pub min_y: Vec4,
    pub min_z: Vec4,
    pub max_x: Vec4,
    pub max_y: Vec4,
    pub max_z: Vec4,
}

impl AabbBatch {
    /// Lane mask of boxes overlapping the box `[min, max]`. Lanes whose box is
    /// invalid (min > max) never test positive.
    pub fn overlaps(&self, min: Vec3, max: Vec3) -> u32 {
        let ok_x = self.min_x.cmple(Vec4::splat(max.x)) & Vec4::splat(min.x).cmple(self.max_x);
        let ok_y = self.min_y.cmple(Vec4::splat(max.y)) & Vec4::splat(min.y).cmple(self.max_y);
        let ok_z = self.min_z.cmple(Vec4::splat(max.z)) & Vec4::splat(min.z).cmple(self.max_z);
        (ok_x & ok_y & ok_z).bitmask()
    }

    /// Lane mask of boxes containing the point.
    pub fn contains(&self, point: Vec3) -> u32 {
        self.overlaps(point, point)
    }

    /// Slab test of a ray against all four boxes. Returns the entry distance
    /// per lane (`f32::MAX` for misses) and the hit mask.
    pub fn ray_intersect(&self, origin: Vec3, inv_direction: Vec3, max_distance: f32) -> (Vec4, u32) {
        let t1x = (self.min_x - Vec4::splat(origin.x)) * Vec4::splat(inv_direction.x);
        let t2x = (self.max_x - Vec4::splat(origin.x)) * Vec4::splat(inv_direction.x);
        let t1y = (self.min_y - Vec4::splat(origin.y)) * Vec4::splat(inv_direction.y);
        let t2y = (self.max_y - Vec4::splat(origin.y)) * Vec4::splat(inv_direction.y);
        let t1z = (self.min_z - Vec4::splat(origin.z)) * Vec4::splat(inv_direction.z);
        let t2z = (self.max_z - Vec4::splat(origin.z)) * Vec4::splat(inv_direction.z);

        let t_entry = t1x.min(t2x).max(t1y.min(t2y)).max(t1z.min(t2z)).max(Vec4::ZERO);
        let t_exit = t1x.max(t2x).min(t1y.max(t2y)).min(t1z.max(t2z)).min(Vec4::splat(max_distance));

        let hit = t_entry.cmple(t_exit);
        let distance = Vec4::select(hit, t_entry, Vec4::splat(f32::MAX));
        (distance, hit.bitmask())
    }
}

/// Reciprocal ray direction with near-zero components nudged so the slab test
/// stays NaN-free.
pub fn safe_inverse_direction(direction: Vec3) -> Vec3 {
    const TINY: f32 = 1.0e-20;
    Vec3::new(
        1.0 / if direction.x.abs() < TINY { TINY.copysign(direction.x) } else { direction.x },
        1.0 / if direction.y.abs() < TINY { TINY.copysign(direction.y) } else { direction.y },
        1.0 / if direction.z.abs() < TINY { TINY.copysign(direction.z) } else { direction.z },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_of(boxes: [(Vec3, Vec3); 4]) -> AabbBatch {
        AabbBatch {
            min_x: Vec4::new(boxes[0].0.x, boxes[1].0.x, boxes[2].0.x, boxes[3].0.x),
            min_y: Vec4::new(boxes[0].0.y, boxes[1].0.y, boxes[2].0.y, boxes[3].0.y),
            min_z: Vec4::new(boxes[0].0.z, boxes[1].0.z, boxes[2].0.z, boxes[3].0.z),
            max_x: Vec4::new(boxes[0].1.x, boxes[1].1.x, boxes[2].1.x, boxes[3].1.x),
            max_y: Vec4::new(boxes[0].1.y, boxes[1].1.y, boxes[2].1.y, boxes[3].1.y),
            max_z: Vec4::new(boxes[0].1.z, boxes[1].1.z, boxes[2].1.z, boxes[3].1.z),
        }
    }

    #[test]
    fn overlap_mask_selects_the_right_lanes() {
        let batch = batch_of([
            (Vec3::ZERO, Vec3::ONE),
            (Vec3::splat(2.0), Vec3::splat(3.0)),
            (Vec3::splat(0.5), Vec3::splat(1.5)),
            // invalid box: min > max
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        ]);
        let mask = batch.overlaps(Vec3::splat(0.75), Vec3::splat(1.25));
        assert_eq!(mask, 0b0101);
    }

    #[test]
    fn ray_hits_report_entry_distance() {
        let batch = batch_of([
            (Vec3::new(2.0, -1.0, -1.0), Vec3::new(3.0, 1.0, 1.0)),
            (Vec3::new(5.0, -1.0, -1.0), Vec3::new(6.0, 1.0, 1.0)),
            (Vec3::new(-4.0, -1.0, -1.0), Vec3::new(-3.0, 1.0, 1.0)),
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        ]);
        let inv = safe_inverse_direction(Vec3::X);
        let (distance, mask) = batch.ray_intersect(Vec3::ZERO, inv, 100.0);
        assert_eq!(mask & 0b0011, 0b0011);
        assert_eq!(mask & 0b1100, 0);
        assert!((distance.x - 2.0).abs() < 1.0e-5);
        assert!((distance.y - 5.0).abs() < 1.0e-5);
    }
}
