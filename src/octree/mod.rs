//! Octree construction from an oriented point cloud.
//!
//! [`Octree::build`] hashes the input points into Morton-ordered leaf
//! cells, materializes every level of the tree with explicit parent-child
//! pointers, aggregates per-node signals, optionally trims well
//! approximated subtrees and serializes the result into one contiguous
//! buffer headed by an [`info::OctreeInfo`] descriptor.

pub mod aabb;
pub mod extract;
pub mod info;
pub mod intersect;
pub mod key;
pub mod serialize;
pub mod sort;

mod signal;
mod structure;
mod trim;

use rayon::prelude::*;
use thiserror::Error;

use crate::points::Points;
use info::{OctreeInfo, PropType};

/// Guard added to denominators and squared lengths.
pub(crate) const ESP: f32 = 1.0e-10;

/// Sentinel for an error metric that was never measured.
pub(crate) const ERR_UNMEASURED: f32 = 1.0e20;

/// Sentinel distance error for a degenerate intersection polygon.
pub(crate) const ERR_DEGENERATE: f32 = 5.0e10;

const SQRT_3: f32 = 1.732_050_8;

/// Rescales an along-normal centroid offset so its range is `[-1, 1]`
/// across any cell orientation.
pub(crate) const DIS_MUL: f32 = 2.0 / SQRT_3;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid build configuration: {0}")]
    InvalidConfig(#[from] info::FormatError),
}

/// A built octree: per-level node arrays plus the serialized buffer.
///
/// All arrays are indexed `[level][...]`; the multi-channel signal arrays
/// are channel-major within a level, so channel `c` of node `i` lives at
/// `c * node_num + i`.
#[derive(Clone, Debug, Default)]
pub struct Octree {
    pub(crate) info: OctreeInfo,
    pub(crate) keys: Vec<Vec<u32>>,
    pub(crate) children: Vec<Vec<i32>>,
    pub(crate) avg_normals: Vec<Vec<f32>>,
    pub(crate) avg_features: Vec<Vec<f32>>,
    pub(crate) avg_fpfh: Vec<Vec<f32>>,
    pub(crate) avg_roughness: Vec<Vec<f32>>,
    pub(crate) avg_pts: Vec<Vec<f32>>,
    pub(crate) avg_labels: Vec<Vec<f32>>,
    pub(crate) displacement: Vec<Vec<f32>>,
    pub(crate) split_labels: Vec<Vec<u8>>,
    pub(crate) dnum: Vec<Vec<i32>>,
    pub(crate) didx: Vec<Vec<i32>>,
    pub(crate) normal_err: Vec<Vec<f32>>,
    pub(crate) distance_err: Vec<Vec<f32>>,
    pub(crate) max_label: i32,
    pub(crate) buffer: Vec<u8>,
}

#[inline]
pub(crate) fn is_leaf(child: i32) -> bool {
    child == -1
}

impl Octree {
    /// Build an octree over `points` as described by `info`.
    ///
    /// Run-to-completion: the only failure mode is an invalid descriptor.
    /// Degenerate inputs (empty cloud, flat bounding box, zero normals)
    /// produce a valid tree carrying the documented sentinel values.
    pub fn build(info: OctreeInfo, points: &Points) -> Result<Octree, BuildError> {
        info.check_format()?;

        let depth = info.depth();
        tracing::debug!(
            depth,
            full_layer = info.full_layer(),
            points = points.num_points(),
            adaptive = info.is_adaptive(),
            "building octree"
        );

        let mut octree = Octree::with_info(info);

        let pts_scaled = octree.normalize_points(points);
        let (mut node_keys, sorted_idx) = sort::sort_keys(&pts_scaled, depth);
        let mut unique_idx = Vec::new();
        sort::unique_reduce(&mut node_keys, &mut unique_idx);
        tracing::debug!(leaf_cells = node_keys.len(), "hashed points into cells");

        octree.build_structure(&mut node_keys);
        octree.calc_node_num();

        octree.calc_leaf_signal(points, &pts_scaled, &sorted_idx, &unique_idx);
        if octree.info.location(PropType::Feature) == -1 {
            octree.covered_depth_nodes();
            let calc_norm_err = octree.info.is_adaptive();
            let calc_dist_err = octree.info.is_adaptive() && octree.info.has_displace();
            octree.calc_upper_signal(calc_norm_err, calc_dist_err);
        }

        if octree.info.has_property(PropType::Split) {
            octree.compute_split_labels();
        }

        octree.serialize();
        octree.trim_octree();

        tracing::debug!(
            total_nodes = octree.info.total_node_num(),
            buffer_bytes = octree.buffer.len(),
            "octree built"
        );
        Ok(octree)
    }

    fn with_info(info: OctreeInfo) -> Self {
        let levels = info.depth() as usize + 1;
        Self {
            info,
            keys: vec![Vec::new(); levels],
            children: vec![Vec::new(); levels],
            avg_normals: vec![Vec::new(); levels],
            avg_features: vec![Vec::new(); levels],
            avg_fpfh: vec![Vec::new(); levels],
            avg_roughness: vec![Vec::new(); levels],
            avg_pts: vec![Vec::new(); levels],
            avg_labels: vec![Vec::new(); levels],
            displacement: vec![Vec::new(); levels],
            split_labels: vec![Vec::new(); levels],
            dnum: vec![Vec::new(); levels],
            didx: vec![Vec::new(); levels],
            normal_err: vec![Vec::new(); levels],
            distance_err: vec![Vec::new(); levels],
            max_label: 0,
            buffer: Vec::new(),
        }
    }

    /// Rescale raw positions into `[0, 2^depth)` over the configured
    /// bounding box.
    fn normalize_points(&self, points: &Points) -> Vec<f32> {
        let bbmin = self.info.bbox().min.to_array();
        let mul = (1i32 << self.info.depth()) as f32 / self.info.bbox_max_width();

        let mut scaled = vec![0.0f32; points.positions().len()];
        scaled
            .par_chunks_mut(3)
            .zip(points.positions().par_chunks(3))
            .for_each(|(dst, src)| {
                for j in 0..3 {
                    dst[j] = (src[j] - bbmin[j]) * mul;
                }
            });
        scaled
    }

    pub fn info(&self) -> &OctreeInfo {
        &self.info
    }

    pub fn keys(&self, depth: i32) -> &[u32] {
        &self.keys[depth as usize]
    }

    pub fn children(&self, depth: i32) -> &[i32] {
        &self.children[depth as usize]
    }

    pub fn avg_normals(&self, depth: i32) -> &[f32] {
        &self.avg_normals[depth as usize]
    }

    pub fn avg_features(&self, depth: i32) -> &[f32] {
        &self.avg_features[depth as usize]
    }

    pub fn avg_fpfh(&self, depth: i32) -> &[f32] {
        &self.avg_fpfh[depth as usize]
    }

    pub fn avg_roughness(&self, depth: i32) -> &[f32] {
        &self.avg_roughness[depth as usize]
    }

    pub fn avg_pts(&self, depth: i32) -> &[f32] {
        &self.avg_pts[depth as usize]
    }

    pub fn avg_labels(&self, depth: i32) -> &[f32] {
        &self.avg_labels[depth as usize]
    }

    pub fn displacement(&self, depth: i32) -> &[f32] {
        &self.displacement[depth as usize]
    }

    pub fn split_labels(&self, depth: i32) -> &[u8] {
        &self.split_labels[depth as usize]
    }

    pub fn normal_err(&self, depth: i32) -> &[f32] {
        &self.normal_err[depth as usize]
    }

    pub fn distance_err(&self, depth: i32) -> &[f32] {
        &self.distance_err[depth as usize]
    }

    pub fn dnum(&self, depth: i32) -> &[i32] {
        &self.dnum[depth as usize]
    }

    pub fn didx(&self, depth: i32) -> &[i32] {
        &self.didx[depth as usize]
    }

    /// The serialized transport form, refreshed after every build and trim.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}
