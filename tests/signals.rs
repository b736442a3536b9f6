use glam::Vec3;
use mortree::prelude::*;

fn unit_cube_info(params: &BuildParams, points: &Points) -> OctreeInfo {
    let mut info = OctreeInfo::initialize(params, points);
    info.set_bbox(&Aabb::new(Vec3::ZERO, Vec3::ONE));
    info
}

#[test]
fn coincident_points_at_origin() {
    // two coincident points at the origin of the unit cube, depth 2
    let points = Points::from_parts(
        vec![0.0; 6],
        vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        Vec::new(),
        Vec::new(),
        Vec::new(),
        Vec::new(),
    )
    .unwrap();
    let params = BuildParams {
        depth: 2,
        full_depth: 0,
        node_displacement: true,
        ..BuildParams::default()
    };
    let octree = Octree::build(unit_cube_info(&params, &points), &points).unwrap();

    assert_eq!(octree.keys(0).len(), 1);
    assert_eq!(octree.keys(1).len(), 8);
    assert_eq!(octree.keys(2).len(), 8);

    let children = octree.children(2);
    assert_eq!(children[0], 0, "leaf cell 0 should be occupied");
    for (i, c) in children.iter().enumerate().skip(1) {
        assert_eq!(*c, -1, "leaf cell {i} should be empty");
    }

    let nnum = octree.keys(2).len();
    let normals = octree.avg_normals(2);
    assert!((normals[0]).abs() < 1e-6);
    assert!((normals[nnum]).abs() < 1e-6);
    assert!((normals[2 * nnum] - 1.0).abs() < 1e-6);

    let dis = octree.displacement(2)[0];
    assert!(
        (dis - (-0.5 * 2.0 / 3.0f32.sqrt())).abs() < 1e-4,
        "displacement should be about -0.577, got {dis}"
    );
}

#[test]
fn eight_octants_with_radial_normals() {
    let mut pts = Vec::new();
    let mut normals = Vec::new();
    for i in 0..8 {
        let p = Vec3::new(
            if i & 1 != 0 { 0.75 } else { 0.25 },
            if i & 2 != 0 { 0.75 } else { 0.25 },
            if i & 4 != 0 { 0.75 } else { 0.25 },
        );
        let n = (p - Vec3::splat(0.5)).normalize();
        pts.extend_from_slice(&p.to_array());
        normals.extend_from_slice(&n.to_array());
    }
    let points =
        Points::from_parts(pts, normals, Vec::new(), Vec::new(), Vec::new(), Vec::new()).unwrap();
    let params = BuildParams {
        depth: 1,
        full_depth: 0,
        split_label: true,
        ..BuildParams::default()
    };
    let octree = Octree::build(unit_cube_info(&params, &points), &points).unwrap();

    assert_eq!(octree.children(0)[0], 0);
    assert!(
        octree.children(1).iter().all(|c| *c != -1),
        "every octant leaf should be occupied"
    );
    assert_eq!(octree.split_labels(0)[0], 1, "the root splits");
    for (i, s) in octree.split_labels(1).iter().enumerate() {
        assert_eq!(*s, 1, "occupied leaf {i} should carry split label 1");
    }

    // each occupied cell holds a single point, so the averaged normal is
    // that point's unit normal
    let nnum = octree.keys(1).len();
    let avg = octree.avg_normals(1);
    for i in 0..nnum {
        let len = (avg[i] * avg[i] + avg[nnum + i] * avg[nnum + i]
            + avg[2 * nnum + i] * avg[2 * nnum + i])
            .sqrt();
        assert!((len - 1.0).abs() < 1e-4, "normal of node {i} is not unit: {len}");
    }
}

#[test]
fn point_at_bbmax_maps_to_last_cell() {
    let points = Points::from_parts(
        vec![1.0, 1.0, 1.0],
        vec![0.0, 0.0, 1.0],
        Vec::new(),
        Vec::new(),
        Vec::new(),
        Vec::new(),
    )
    .unwrap();
    let params = BuildParams {
        depth: 3,
        full_depth: 1,
        ..BuildParams::default()
    };
    let octree = Octree::build(unit_cube_info(&params, &points), &points).unwrap();

    let leaf = octree
        .children(3)
        .iter()
        .position(|c| *c != -1)
        .expect("one occupied leaf");
    let key = octree.keys(3)[leaf];
    // decoded coordinates are clamped to 2^3 - 1, never 2^3
    assert_eq!(key, 0x1ff, "expected cell (7, 7, 7), got key {key:#x}");
}

#[test]
fn degenerate_bounding_box_still_builds() {
    let pts: Vec<f32> = (0..5).flat_map(|_| [2.0f32, 2.0, 2.0]).collect();
    let normals: Vec<f32> = (0..5).flat_map(|_| [0.0f32, 1.0, 0.0]).collect();
    let points =
        Points::from_parts(pts, normals, Vec::new(), Vec::new(), Vec::new(), Vec::new()).unwrap();
    let params = BuildParams {
        depth: 3,
        full_depth: 1,
        ..BuildParams::default()
    };
    let mut info = OctreeInfo::initialize(&params, &points);
    info.set_bbox(&points.bounds().cube());
    let octree = Octree::build(info, &points).unwrap();

    let occupied = octree.children(3).iter().filter(|c| **c != -1).count();
    assert_eq!(occupied, 1);
    assert!(!octree.buffer().is_empty());
}

#[test]
fn empty_cloud_with_full_tree_serializes() {
    // dense 2-level tree with no input points at all
    let points = Points::default();
    let params = BuildParams {
        depth: 2,
        full_depth: 2,
        split_label: true,
        ..BuildParams::default()
    };
    let octree = Octree::build(unit_cube_info(&params, &points), &points).unwrap();

    for d in 0..=2 {
        assert_eq!(octree.keys(d).len(), 1 << (3 * d));
        assert!(
            octree.children(d).iter().all(|c| *c == -1),
            "no node at level {d} should be occupied"
        );
        assert!(
            octree.split_labels(d).iter().all(|s| *s == 0),
            "every node at level {d} is an empty leaf"
        );
    }
    assert!(octree.avg_normals(2).is_empty());
    assert!(!octree.buffer().is_empty());
}

#[test]
fn labels_vote_by_majority() {
    // three points in one cell: labels 2, 2, 5
    let pts = vec![0.1, 0.1, 0.1, 0.12, 0.1, 0.1, 0.1, 0.12, 0.1];
    let normals = vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
    let labels = vec![2.0, 5.0, 2.0];
    let points =
        Points::from_parts(pts, normals, Vec::new(), Vec::new(), Vec::new(), labels).unwrap();
    let params = BuildParams {
        depth: 2,
        full_depth: 0,
        ..BuildParams::default()
    };
    let octree = Octree::build(unit_cube_info(&params, &points), &points).unwrap();

    let children = octree.children(2);
    for (i, c) in children.iter().enumerate() {
        let label = octree.avg_labels(2)[i];
        if *c == -1 {
            assert_eq!(label, -1.0, "empty cell {i} should carry the -1 sentinel");
        } else {
            assert_eq!(label, 2.0, "majority label should win in cell {i}");
        }
    }
}

#[test]
fn feature_channels_average_per_cell() {
    // two points in the same cell, each with the 2-channel feature
    // record [a, b] stored point-major
    let pts = vec![0.4, 0.4, 0.4, 0.42, 0.4, 0.4];
    let normals = vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
    let features = vec![1.0, 3.0, 10.0, 30.0];
    let points =
        Points::from_parts(pts, normals, features, Vec::new(), Vec::new(), Vec::new()).unwrap();
    let params = BuildParams {
        depth: 2,
        full_depth: 0,
        ..BuildParams::default()
    };
    let octree = Octree::build(unit_cube_info(&params, &points), &points).unwrap();

    let nnum = octree.keys(2).len();
    let i = octree
        .children(2)
        .iter()
        .position(|c| *c != -1)
        .expect("one occupied leaf");
    let avg = octree.avg_features(2);
    assert!((avg[i] - 5.5).abs() < 1e-4, "channel 0 should average to 5.5");
    assert!((avg[nnum + i] - 16.5).abs() < 1e-3, "channel 1 should average to 16.5");
}
