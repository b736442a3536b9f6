//! Layout descriptor for a serialized octree.
//!
//! `OctreeInfo` is the fixed-size header at the front of every serialized
//! octree buffer. It records the tree layout (depth, full and adaptive
//! layers), the bounding box, the adaptive thresholds, which property
//! blocks follow the header and, once the tree is built, the per-level
//! node counts and block offsets that let readers address any property of
//! any level without walking the buffer.

use binrw::binrw;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::aabb::Aabb;
use crate::points::Points;

pub const MAGIC: &[u8; 16] = b"_OCTREE_1.0_\0\0\0\0";

/// Serialized size of [`OctreeInfo`], in bytes.
pub const HEADER_SIZE: usize = 16 + 4 * 61;

/// Deepest supported octree.
pub const MAX_DEPTH: i32 = 8;

/// Property blocks of the serialized buffer, in on-buffer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PropType {
    Key = 1,
    Child = 2,
    Feature = 4,
    Label = 8,
    Split = 16,
}

pub const PROP_TYPES: [PropType; 5] = [
    PropType::Key,
    PropType::Child,
    PropType::Feature,
    PropType::Label,
    PropType::Split,
];

impl PropType {
    #[inline]
    pub(crate) fn index(self) -> usize {
        (self as u32).trailing_zeros() as usize
    }
}

/// Build-time configuration, resolved into an [`OctreeInfo`] by
/// [`OctreeInfo::initialize`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildParams {
    pub depth: i32,
    pub full_depth: i32,
    pub adaptive: bool,
    pub adaptive_depth: i32,
    pub threshold_distance: f32,
    pub threshold_normal: f32,
    pub node_displacement: bool,
    pub node_feature: bool,
    pub split_label: bool,
    pub key2xyz: bool,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            depth: 6,
            full_depth: 2,
            adaptive: false,
            adaptive_depth: 4,
            threshold_distance: 0.866,
            threshold_normal: 0.2,
            node_displacement: false,
            node_feature: false,
            split_label: false,
            key2xyz: false,
        }
    }
}

/// Diagnostic produced when a descriptor fails its consistency checks.
#[derive(Error, Debug)]
#[error("octree format check failed:\n{0}")]
pub struct FormatError(pub String);

#[binrw]
#[brw(little)]
#[derive(Clone, Debug, PartialEq)]
pub struct OctreeInfo {
    magic: [u8; 16],
    batch_size: i32,
    depth: i32,
    full_layer: i32,
    adaptive_layer: i32,
    is_adaptive: i32,
    has_displace: i32,
    key2xyz: i32,
    threshold_distance: f32,
    threshold_normal: f32,
    bbmin: [f32; 3],
    bbmax: [f32; 3],
    content_flags: u32,
    channels: [i32; 5],
    locations: [i32; 5],
    node_num: [i32; 9],
    node_num_nempty: [i32; 9],
    node_num_cum: [i32; 11],
    ptr_dis: [i32; 6],
}

impl Default for OctreeInfo {
    fn default() -> Self {
        Self {
            magic: *MAGIC,
            batch_size: 1,
            depth: 0,
            full_layer: 0,
            adaptive_layer: 0,
            is_adaptive: 0,
            has_displace: 0,
            key2xyz: 0,
            threshold_distance: 0.0,
            threshold_normal: 0.0,
            bbmin: [0.0; 3],
            bbmax: [0.0; 3],
            content_flags: 0,
            channels: [0; 5],
            locations: [0; 5],
            node_num: [0; 9],
            node_num_nempty: [0; 9],
            node_num_cum: [0; 11],
            ptr_dis: [0; 6],
        }
    }
}

impl OctreeInfo {
    /// Resolve build parameters and the input cloud's channel widths into
    /// a descriptor ready to hand to [`crate::octree::Octree::build`].
    ///
    /// The key and child blocks are always present. The feature block
    /// fuses normals, the optional displacement channel and any auxiliary
    /// point channels; it lives on every level when node features or
    /// adaptive mode are requested, and only on the finest level
    /// otherwise.
    pub fn initialize(params: &BuildParams, points: &Points) -> Self {
        let mut info = Self {
            depth: params.depth,
            full_layer: params.full_depth,
            adaptive_layer: params.adaptive_depth,
            is_adaptive: params.adaptive as i32,
            has_displace: params.node_displacement as i32,
            key2xyz: params.key2xyz as i32,
            threshold_distance: params.threshold_distance,
            threshold_normal: params.threshold_normal,
            ..Self::default()
        };

        let key_channel = if params.key2xyz && params.depth > MAX_DEPTH {
            2
        } else {
            1
        };
        info.set_property(PropType::Key, key_channel, -1);
        info.set_property(PropType::Child, 1, -1);

        if params.split_label {
            info.set_property(PropType::Split, 1, -1);
        }

        let pinfo = points.info();
        let mut channel = pinfo.normal_channel()
            + pinfo.feature_channel()
            + pinfo.fpfh_channel()
            + pinfo.roughness_channel();
        if params.node_displacement {
            channel += 1;
        }
        let location = if params.node_feature || params.adaptive {
            -1
        } else {
            params.depth
        };
        info.set_property(PropType::Feature, channel, location);

        if pinfo.label_channel() == 1 {
            info.set_property(PropType::Label, 1, location);
        }

        info
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn full_layer(&self) -> i32 {
        self.full_layer
    }

    pub fn adaptive_layer(&self) -> i32 {
        self.adaptive_layer
    }

    pub fn is_adaptive(&self) -> bool {
        self.is_adaptive != 0
    }

    pub fn has_displace(&self) -> bool {
        self.has_displace != 0
    }

    pub fn key2xyz(&self) -> bool {
        self.key2xyz != 0
    }

    pub fn threshold_distance(&self) -> f32 {
        self.threshold_distance
    }

    pub fn threshold_normal(&self) -> f32 {
        self.threshold_normal
    }

    pub fn bbox(&self) -> Aabb {
        Aabb::new(self.bbmin.into(), self.bbmax.into())
    }

    pub fn set_bbox(&mut self, bbox: &Aabb) {
        self.bbmin = bbox.min.into();
        self.bbmax = bbox.max.into();
    }

    /// Longest bounding-box side; a degenerate box is widened to `1e-10`
    /// so the normalizing division stays defined.
    pub fn bbox_max_width(&self) -> f32 {
        let width = self.bbox().max_extent();
        if width == 0.0 {
            1.0e-10
        } else {
            width
        }
    }

    pub fn has_property(&self, ptype: PropType) -> bool {
        (self.content_flags & ptype as u32) != 0
    }

    pub fn channel(&self, ptype: PropType) -> i32 {
        if !self.has_property(ptype) {
            return 0;
        }
        self.channels[ptype.index()]
    }

    pub fn location(&self, ptype: PropType) -> i32 {
        if !self.has_property(ptype) {
            return 0;
        }
        self.locations[ptype.index()]
    }

    pub fn set_property(&mut self, ptype: PropType, channel: i32, location: i32) {
        let i = ptype.index();
        if channel > 0 {
            self.channels[i] = channel;
            self.content_flags |= ptype as u32;
        } else {
            self.channels[i] = 0;
            self.content_flags &= !(ptype as u32);
        }
        self.locations[i] = location;
    }

    pub fn node_num(&self, depth: i32) -> i32 {
        self.node_num[depth as usize]
    }

    pub fn node_num_nempty(&self, depth: i32) -> i32 {
        self.node_num_nempty[depth as usize]
    }

    pub fn node_num_cum(&self, depth: i32) -> i32 {
        self.node_num_cum[depth as usize]
    }

    /// Total node count over all levels.
    pub fn total_node_num(&self) -> i32 {
        self.node_num_cum[self.depth as usize + 1]
    }

    fn total_capacity(&self) -> i32 {
        self.node_num_cum[self.depth as usize + 2]
    }

    pub fn set_node_num(&mut self, num: &[i32]) {
        self.node_num[..num.len()].copy_from_slice(num);
    }

    pub fn set_node_num_nempty(&mut self, num: &[i32]) {
        self.node_num_nempty[..num.len()].copy_from_slice(num);
    }

    pub fn set_node_num_cum(&mut self) {
        let depth = self.depth as usize;
        self.node_num_cum[0] = 0;
        for d in 1..depth + 2 {
            self.node_num_cum[d] = self.node_num_cum[d - 1] + self.node_num[d - 1];
        }
        self.node_num_cum[depth + 2] = self.node_num_cum[depth + 1];
    }

    /// Recompute the accumulated block offsets from the channels,
    /// locations and node counts. Must be called whenever node counts
    /// change; every element of each property is four bytes wide.
    pub fn set_ptr_dis(&mut self) {
        self.ptr_dis[0] = HEADER_SIZE as i32;
        for (i, ptype) in PROP_TYPES.iter().enumerate() {
            let location = self.locations[i];
            let num = if location == -1 {
                self.total_capacity()
            } else {
                self.node_num(location)
            };
            self.ptr_dis[i + 1] = self.ptr_dis[i] + 4 * num * self.channel(*ptype);
        }
    }

    /// Byte offset of a property at a given level inside the serialized
    /// buffer, or `None` if the property is absent.
    pub fn ptr_offset(&self, ptype: PropType, depth: i32) -> Option<usize> {
        if !self.has_property(ptype) {
            return None;
        }
        let mut dis = self.ptr_dis[ptype.index()] as usize;
        if self.location(ptype) == -1 {
            dis += self.node_num_cum(depth) as usize * self.channel(ptype) as usize * 4;
        }
        Some(dis)
    }

    /// Size in bytes of the full serialized buffer, header included.
    pub fn sizeof_octree(&self) -> usize {
        self.ptr_dis[PROP_TYPES.len()] as usize
    }

    /// Validate the descriptor, collecting every problem into one
    /// human-readable diagnostic.
    pub fn check_format(&self) -> Result<(), FormatError> {
        const CHANNEL_MAX: [i32; 5] = [2, 1, i32::MAX, 1, 1];

        let mut msg = String::new();
        if self.magic != *MAGIC {
            msg += "the magic string does not match _OCTREE_1.0_\n";
        }
        if self.batch_size < 1 {
            msg += "the batch_size should be larger than 0\n";
        }
        if self.depth < 1 || self.depth > MAX_DEPTH {
            msg += "the depth should be in range [1, 8]\n";
        }
        if self.full_layer < 0 || self.full_layer > self.depth {
            msg += "the full_layer should be in range [0, depth]\n";
        }
        if self.adaptive_layer < self.full_layer || self.adaptive_layer > self.depth {
            msg += "the adaptive_layer should be in range [full_layer, depth]\n";
        }
        for (i, max) in CHANNEL_MAX.iter().enumerate() {
            if self.channels[i] < 0 || self.channels[i] > *max {
                msg += &format!("channel {i} should be in range [0, {max}]\n");
            }
            if (self.channels[i] == 0) != ((self.content_flags & (1 << i)) == 0) {
                msg += &format!("the content_flags should be consistent with channel {i}\n");
            }
            if self.channels[i] != 0 && self.locations[i] != -1 && self.locations[i] != self.depth
            {
                msg += &format!("location {i} should be -1 or {}\n", self.depth);
            }
        }

        if msg.is_empty() {
            Ok(())
        } else {
            Err(FormatError(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::{BinReaderExt, BinWriterExt};
    use std::io::Cursor;

    #[test]
    fn header_size_matches_layout() {
        let info = OctreeInfo::default();
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&info).unwrap();
        assert_eq!(cursor.into_inner().len(), HEADER_SIZE);
    }

    #[test]
    fn header_roundtrip() {
        let params = BuildParams {
            depth: 5,
            adaptive: true,
            node_displacement: true,
            split_label: true,
            ..BuildParams::default()
        };
        let points = Points::from_parts(
            vec![0.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        let mut info = OctreeInfo::initialize(&params, &points);
        info.set_node_num(&[1, 8, 8, 8, 8, 8]);
        info.set_node_num_cum();
        info.set_ptr_dis();

        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&info).unwrap();
        let mut cursor = Cursor::new(cursor.into_inner());
        let back: OctreeInfo = cursor.read_le().unwrap();
        assert_eq!(back, info);
        back.check_format().unwrap();
    }

    #[test]
    fn check_format_rejects_bad_layers() {
        let mut info = OctreeInfo::default();
        info.depth = 9;
        info.full_layer = -1;
        let err = info.check_format().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("depth"), "missing depth diagnostic: {msg}");
        assert!(msg.contains("full_layer"), "missing layer diagnostic: {msg}");
    }

    #[test]
    fn feature_channel_counts_displacement() {
        let params = BuildParams {
            depth: 4,
            node_displacement: true,
            ..BuildParams::default()
        };
        let points = Points::from_parts(
            vec![0.0; 3],
            vec![0.0, 0.0, 1.0],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        let info = OctreeInfo::initialize(&params, &points);
        assert_eq!(info.channel(PropType::Feature), 4);
        assert_eq!(info.location(PropType::Feature), 4);
        assert!(!info.has_property(PropType::Label));
    }
}
