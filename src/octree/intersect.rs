//! Plane / unit-cube intersection.

use glam::Vec3;

const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Vertices of the polygon in which the plane through `pt` with normal
/// `normal` cuts the axis-aligned unit cube whose minimum corner is `base`.
///
/// Pure function of its inputs. The result is empty when the plane misses
/// the cube, and in particular when `normal` is zero.
pub fn intersect_cube(pt: Vec3, base: Vec3, normal: Vec3) -> Vec<Vec3> {
    let mut dist = [0.0f32; 8];
    for (i, d) in dist.iter_mut().enumerate() {
        let corner = base
            + Vec3::new(
                (i & 1) as f32,
                ((i >> 1) & 1) as f32,
                ((i >> 2) & 1) as f32,
            );
        *d = (corner - pt).dot(normal);
    }

    let mut vertices = Vec::new();
    for &(a, b) in EDGES.iter() {
        if (dist[a] < 0.0) == (dist[b] < 0.0) {
            continue;
        }
        let ca = base
            + Vec3::new(
                (a & 1) as f32,
                ((a >> 1) & 1) as f32,
                ((a >> 2) & 1) as f32,
            );
        let cb = base
            + Vec3::new(
                (b & 1) as f32,
                ((b >> 1) & 1) as f32,
                ((b >> 2) & 1) as f32,
            );
        let t = dist[a] / (dist[a] - dist[b]);
        vertices.push(ca + t * (cb - ca));
    }
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_normal_yields_empty_polygon() {
        let v = intersect_cube(Vec3::splat(0.5), Vec3::ZERO, Vec3::ZERO);
        assert!(v.is_empty());
    }

    #[test]
    fn axis_aligned_plane_cuts_four_edges() {
        let v = intersect_cube(Vec3::splat(0.5), Vec3::ZERO, Vec3::Z);
        assert_eq!(v.len(), 4);
        for p in v {
            assert!((p.z - 0.5).abs() < 1e-6, "vertex off plane: {p:?}");
            assert!(p.x == 0.0 || p.x == 1.0);
            assert!(p.y == 0.0 || p.y == 1.0);
        }
    }

    #[test]
    fn plane_outside_cube_yields_empty_polygon() {
        let v = intersect_cube(Vec3::new(0.5, 0.5, 3.0), Vec3::ZERO, Vec3::Z);
        assert!(v.is_empty());
    }

    #[test]
    fn diagonal_plane_through_corner() {
        let n = Vec3::ONE.normalize();
        let v = intersect_cube(Vec3::splat(0.5), Vec3::ZERO, n);
        assert!(v.len() >= 3);
        let d0 = (v[0] - Vec3::splat(0.5)).dot(n);
        assert!(d0.abs() < 1e-5);
    }
}
