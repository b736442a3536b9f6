pub use crate::octree::aabb::Aabb;
pub use crate::octree::info::{BuildParams, OctreeInfo, PropType};
pub use crate::octree::Octree;
pub use crate::points::Points;

// Error types
pub use crate::octree::info::FormatError;
pub use crate::octree::serialize::{ReadOctreeError, WriteOctreeError};
pub use crate::octree::BuildError;
pub use crate::points::{PointsError, ReadPointsError, WritePointsError};
