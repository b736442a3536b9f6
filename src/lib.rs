//! # mortree
//!
//! `mortree` converts an oriented point cloud (positions with per-point
//! normals and optional auxiliary signals) into a serialized, hierarchical
//! axis-aligned octree suitable for learning-oriented consumers.
//!
//! Points are hashed into Morton-ordered cell keys, the tree is
//! materialized level by level with explicit parent-child pointers,
//! per-node signals (averaged normals, displacements, features, labels)
//! are aggregated bottom-up, subtrees whose geometry is well approximated
//! by a plane can be trimmed adaptively, and the result is laid out into
//! one contiguous buffer headed by a fixed descriptor.
//!
//! ## Example
//!
//! ```no_run
//! use mortree::prelude::*;
//!
//! let points = Points::read_file("bunny.points").unwrap();
//! let mut params = BuildParams::default();
//! params.depth = 6;
//! let mut info = OctreeInfo::initialize(&params, &points);
//! info.set_bbox(&points.bounds().cube());
//! let octree = Octree::build(info, &points).unwrap();
//! octree.write_file("bunny.octree").unwrap();
//! ```

pub mod octree;
pub mod points;
pub mod prelude;

pub use octree::info::{BuildParams, OctreeInfo};
pub use octree::Octree;
pub use points::Points;
