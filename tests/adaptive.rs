use glam::Vec3;
use mortree::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A dense sampling of the plane z = 0.53 inside the unit cube, every
/// normal pointing up.
fn planar_patch() -> Points {
    let mut pts = Vec::new();
    let mut normals = Vec::new();
    let n = 64;
    for i in 0..n {
        for j in 0..n {
            pts.push((i as f32 + 0.5) / n as f32);
            pts.push((j as f32 + 0.5) / n as f32);
            pts.push(0.53);
            normals.extend_from_slice(&[0.0, 0.0, 1.0]);
        }
    }
    Points::from_parts(pts, normals, Vec::new(), Vec::new(), Vec::new(), Vec::new()).unwrap()
}

fn random_cloud(n: usize, seed: u64) -> Points {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pts = Vec::with_capacity(3 * n);
    let mut normals = Vec::with_capacity(3 * n);
    for _ in 0..n {
        for _ in 0..3 {
            pts.push(rng.gen_range(0.0f32..1.0));
        }
        let v = [
            rng.gen_range(-1.0f32..1.0),
            rng.gen_range(-1.0f32..1.0),
            rng.gen_range(-1.0f32..1.0),
        ];
        let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt().max(1e-6);
        for c in v {
            normals.push(c / len);
        }
    }
    Points::from_parts(pts, normals, Vec::new(), Vec::new(), Vec::new(), Vec::new()).unwrap()
}

fn build_unit_cube(points: &Points, params: &BuildParams) -> Octree {
    let mut info = OctreeInfo::initialize(params, points);
    info.set_bbox(&Aabb::new(Vec3::ZERO, Vec3::ONE));
    Octree::build(info, points).expect("build should succeed")
}

fn internal_count(octree: &Octree, depth: i32) -> usize {
    octree.children(depth).iter().filter(|c| **c != -1).count()
}

#[test]
fn planar_patch_collapses_to_adaptive_leaves() {
    let points = planar_patch();
    let params = BuildParams {
        depth: 4,
        full_depth: 1,
        adaptive: true,
        adaptive_depth: 2,
        threshold_distance: 1.0,
        threshold_normal: 0.01,
        node_displacement: true,
        split_label: true,
        ..BuildParams::default()
    };
    let octree = build_unit_cube(&points, &params);

    // one promoted chain survives; everything else becomes an adaptive
    // leaf. The finest level keeps its occupied cells, whose error metric
    // is the unmeasured sentinel.
    for d in 2..=3 {
        assert!(!octree.keys(d).is_empty(), "level {d} must not be emptied");
        assert_eq!(
            internal_count(&octree, d),
            1,
            "level {d} should keep exactly one internal node"
        );
    }
    assert_eq!(octree.keys(3).len(), 8, "only the promoted octet survives at level 3");
    assert_eq!(octree.keys(4).len(), 8, "only the promoted octet survives at level 4");
    assert!(internal_count(&octree, 4) >= 1, "occupied finest cells must stay");
    assert!(
        octree.split_labels(2).iter().any(|s| *s == 2),
        "collapsed planar nodes should be tagged as approximated leaves"
    );

    // kept leaves that still carry a surface approximation are tagged 2
    for d in 2..=4 {
        let nnum = octree.keys(d).len();
        let normals = octree.avg_normals(d);
        assert_eq!(normals.len(), 3 * nnum, "channel-major layout broken at level {d}");
        for i in 0..nnum {
            let t = normals[i].abs() + normals[nnum + i].abs() + normals[2 * nnum + i].abs();
            let split = octree.split_labels(d)[i];
            if octree.children(d)[i] != -1 {
                assert_eq!(split, 1, "internal node {i} at level {d}");
            } else if t != 0.0 {
                assert_eq!(split, 2, "approximated leaf {i} at level {d}");
            } else {
                assert_eq!(split, 0, "empty leaf {i} at level {d}");
            }
        }
    }

    // surviving normals stay renormalized after the trim transposes
    for d in 2..=4 {
        let nnum = octree.keys(d).len();
        let normals = octree.avg_normals(d);
        for i in 0..nnum {
            let len = (normals[i] * normals[i]
                + normals[nnum + i] * normals[nnum + i]
                + normals[2 * nnum + i] * normals[2 * nnum + i])
                .sqrt();
            if len != 0.0 {
                assert!((len - 1.0).abs() < 1e-4, "node {i} at level {d}: |n| = {len}");
            }
        }
    }
}

#[test]
fn zero_thresholds_trim_nothing() {
    let points = random_cloud(400, 11);
    let adaptive = BuildParams {
        depth: 4,
        full_depth: 1,
        adaptive: true,
        adaptive_depth: 2,
        threshold_distance: 0.0,
        threshold_normal: 0.0,
        node_displacement: true,
        ..BuildParams::default()
    };
    let plain = BuildParams {
        adaptive: false,
        node_feature: true,
        ..adaptive.clone()
    };

    let a = build_unit_cube(&points, &adaptive);
    let b = build_unit_cube(&points, &plain);

    for d in 0..=4 {
        assert_eq!(a.keys(d), b.keys(d), "keys differ at level {d}");
        assert_eq!(a.children(d), b.children(d), "children differ at level {d}");
        assert_eq!(a.avg_normals(d), b.avg_normals(d), "normals differ at level {d}");
        assert_eq!(a.displacement(d), b.displacement(d), "displacement differs at level {d}");
    }
}

#[test]
fn huge_thresholds_trim_to_the_promoted_chain() {
    let points = random_cloud(500, 17);
    let params = BuildParams {
        depth: 4,
        full_depth: 1,
        adaptive: true,
        adaptive_depth: 2,
        threshold_distance: 1.0e10,
        threshold_normal: 1.0e10,
        node_displacement: true,
        ..BuildParams::default()
    };
    let octree = build_unit_cube(&points, &params);

    for d in 2..=3 {
        assert!(!octree.keys(d).is_empty(), "level {d} must not be emptied");
        assert_eq!(
            internal_count(&octree, d),
            1,
            "maximal trim keeps exactly one internal node at level {d}"
        );
    }
    for d in 3..=4 {
        assert_eq!(octree.keys(d).len(), 8, "level {d} should shrink to one octet");
    }
    assert!(internal_count(&octree, 4) >= 1, "occupied finest cells must stay");
}

#[test]
fn promotion_picks_the_largest_normal_error() {
    let points = random_cloud(500, 17);
    let untrimmed = BuildParams {
        depth: 4,
        full_depth: 1,
        adaptive: true,
        adaptive_depth: 2,
        threshold_distance: 0.0,
        threshold_normal: 0.0,
        node_displacement: true,
        ..BuildParams::default()
    };
    let trimmed = BuildParams {
        threshold_distance: 1.0e10,
        threshold_normal: 1.0e10,
        ..untrimmed.clone()
    };

    let a = build_unit_cube(&points, &untrimmed);
    let b = build_unit_cube(&points, &trimmed);

    // nodes of the adaptive layer itself are never dropped, so indices at
    // that level line up between the two builds
    assert_eq!(a.keys(2), b.keys(2));
    let kept = b
        .children(2)
        .iter()
        .position(|c| *c != -1)
        .expect("one internal node survives");

    let max_err = a
        .children(2)
        .iter()
        .enumerate()
        .filter(|(_, c)| **c != -1)
        .map(|(i, _)| a.normal_err(2)[i])
        .fold(f32::MIN, f32::max);
    assert_eq!(
        a.normal_err(2)[kept],
        max_err,
        "the promoted node should carry the largest normal error"
    );
}
