use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::f64::consts::PI;

///Represents a vector in 3D space.
/// Tile positions use it as a point on the unit sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    ///Returns the magnitude of the vector.
    pub fn length(&self) -> f32 {
        self.dot(self).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vec3 {
        let len = self.length();
        if len == 0.0 {
            Vec3::default()
        } else {
            self.scale(1.0 / len)
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vec3 {
        Vec3::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    ///Returns the difference of two vectors.
    pub fn sub(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn dot(&self, other: &Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        self.sub(other).length()
    }

    /// True when every component is within `tolerance` of `other`'s.
    pub fn close_to(&self, other: &Vec3, tolerance: f32) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }

    fn widen(&self) -> [f64; 3] {
        [self.x as f64, self.y as f64, self.z as f64]
    }
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Measures angles around a root position, starting from a reference direction.
///
/// Both the reference and the measured point are projected onto the plane
/// tangent to the sphere at `root`. The angle between the projections is
/// `acos` of their normalized dot product, mapped to `[0, 2π)` and increasing
/// clockwise when the sphere is viewed from outside. A point whose projection
/// vanishes (it lies on the root axis) measures π/2.
#[derive(Debug, Clone, Copy)]
pub struct AngleFrom {
    axis: [f64; 3],
    reference: [f64; 3],
}

impl AngleFrom {
    pub fn new(root: Vec3, reference: Vec3) -> Self {
        let root = root.widen();
        let len = dot(&root, &root).sqrt();
        let axis = if len > 0.0 {
            [root[0] / len, root[1] / len, root[2] / len]
        } else {
            [0.0, 0.0, 0.0]
        };
        let reference = Self::project(&axis, &reference.widen());
        AngleFrom { axis, reference }
    }

    fn project(axis: &[f64; 3], v: &[f64; 3]) -> [f64; 3] {
        let along = dot(v, axis);
        [
            v[0] - axis[0] * along,
            v[1] - axis[1] * along,
            v[2] - axis[2] * along,
        ]
    }

    pub fn angle(&self, point: Vec3) -> f64 {
        let point = point.widen();
        let projected = Self::project(&self.axis, &point);

        let ref_len = dot(&self.reference, &self.reference).sqrt();
        let proj_len = dot(&projected, &projected).sqrt();
        let point_len = dot(&point, &point).sqrt();
        if ref_len <= f64::EPSILON || proj_len <= point_len * 1e-6 {
            return PI / 2.0;
        }

        let cos = (dot(&self.reference, &projected) / (ref_len * proj_len)).clamp(-1.0, 1.0);
        let angle = cos.acos();
        if dot(&self.axis, &cross(&self.reference, &projected)) > 0.0 {
            2.0 * PI - angle
        } else {
            angle
        }
    }
}

/// Orders the neighbour ring of a tile.
///
/// The neighbour with the lowest z coordinate comes first; the others follow
/// by ascending [`AngleFrom`] angle around `root` measured from that first
/// neighbour. Ties on either key go to the lower id.
pub fn sort_neighbours<F>(root: Vec3, neighbours: &[u32], position: F) -> Vec<u32>
where
    F: Fn(u32) -> Vec3,
{
    let first = match neighbours.iter().copied().min_by(|&a, &b| {
        position(a)
            .z
            .total_cmp(&position(b).z)
            .then_with(|| a.cmp(&b))
    }) {
        Some(first) => first,
        None => return Vec::new(),
    };

    let measure = AngleFrom::new(root, position(first));
    let mut rest: Vec<(f64, u32)> = neighbours
        .iter()
        .copied()
        .filter(|&id| id != first)
        .map(|id| (measure.angle(position(id)), id))
        .collect();
    rest.sort_by(|a, b| match a.0.total_cmp(&b.0) {
        Ordering::Equal => a.1.cmp(&b.1),
        other => other,
    });

    let mut sorted = Vec::with_capacity(neighbours.len());
    sorted.push(first);
    sorted.extend(rest.into_iter().map(|(_, id)| id));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vector_normalize() {
        let v = Vec3::new(3.0, 0.0, 4.0).normalize();
        assert_approx_eq!(v.length(), 1.0, 1e-6);
        assert_approx_eq!(v.x, 0.6, 1e-6);
        assert_approx_eq!(v.z, 0.8, 1e-6);
    }

    #[test]
    fn test_zero_vector_normalize() {
        assert_eq!(Vec3::default().normalize(), Vec3::default());
    }

    #[test]
    fn test_vector_distance() {
        let a = Vec3::new(1.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 1.0, 0.0);
        assert_approx_eq!(a.distance(&b), 2.0_f32.sqrt(), 1e-6);
        assert!(a.close_to(&Vec3::new(1.000001, 0.0, 0.0), 1e-5));
        assert!(!a.close_to(&b, 1e-5));
    }

    #[test]
    fn test_angle_between_pentagon_neighbours() {
        let root = Vec3::new(0.0, 0.525_731_08, 0.850_650_787);
        let pole = Vec3::new(0.309_016_973, 0.809_016_943, 0.499_999_97);
        let u = Vec3::new(-0.309_016_973, 0.809_016_943, 0.499_999_97);

        let measure = AngleFrom::new(root, pole);
        assert_approx_eq!(measure.angle(u), 5.026_548_39, 1e-4);
        assert_approx_eq!(measure.angle(pole), 0.0, 1e-6);
    }

    #[test]
    fn test_point_on_axis_measures_right_angle() {
        let root = Vec3::new(0.0, 15.49, 25.07);
        let measure = AngleFrom::new(root, Vec3::new(9.11, 23.83, 14.73));
        assert_approx_eq!(measure.angle(root), PI / 2.0, 1e-9);
    }

    #[test]
    fn test_sort_siblings_around_root() {
        let points = [
            Vec3::new(9.11, 23.83, 14.73),
            Vec3::new(-9.11, 23.83, 14.73),
            Vec3::new(14.73, 9.11, 23.84),
            Vec3::new(-14.73, 9.11, 23.84),
            Vec3::new(0.0, 15.49, 25.07),
        ];
        let root = Vec3::new(0.0, 15.49, 25.07);

        let measure = AngleFrom::new(root, points[0]);
        let mut rest: Vec<u32> = vec![1, 2, 3, 4];
        rest.sort_by(|&a, &b| {
            measure
                .angle(points[a as usize])
                .total_cmp(&measure.angle(points[b as usize]))
        });

        let mut order = vec![0];
        order.extend(rest);
        assert_eq!(order, vec![0, 2, 4, 3, 1]);
    }

    #[test]
    fn test_sort_neighbours_picks_lowest_z_first() {
        let points = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, -0.5),
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(0.0, -1.0, 0.2),
        ];
        let root = Vec3::new(0.0, 0.0, 1.0);
        let sorted = sort_neighbours(root, &[0, 1, 2, 3], |id| points[id as usize]);

        assert_eq!(sorted[0], 1);
        assert_eq!(sorted.len(), 4);
        let mut ids = sorted.clone();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sort_neighbours_breaks_ties_by_id() {
        let same = Vec3::new(1.0, 0.0, 0.0);
        let points = [Vec3::new(0.0, 1.0, -1.0), same, same, same];
        let root = Vec3::new(0.0, 0.0, 1.0);
        let sorted = sort_neighbours(root, &[3, 1, 0, 2], |id| points[id as usize]);
        assert_eq!(sorted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sort_empty_ring() {
        let sorted = sort_neighbours(Vec3::new(0.0, 0.0, 1.0), &[], |_| Vec3::default());
        assert!(sorted.is_empty());
    }
}
