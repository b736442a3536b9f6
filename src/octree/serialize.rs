//! Transport forms of a built octree.
//!
//! The primary form is one contiguous buffer: the [`OctreeInfo`] header
//! followed by the key, child, feature, label and split blocks, each laid
//! out per level at the location the header records. The legacy stream
//! form is a narrower export kept for old consumers; it carries the tree
//! topology plus the finest-level normals, displacements and labels only.

use binrw::{BinReaderExt, BinWriterExt};
use std::io::{Cursor, Seek, Write};
use std::path::Path;
use thiserror::Error;

use super::info::{FormatError, OctreeInfo, PropType};
use super::{key, Octree};

#[derive(Error, Debug)]
pub enum ReadOctreeError {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("invalid binary data")]
    InvalidBinaryData(#[from] binrw::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("buffer holds {actual} bytes but the header announces {expected}")]
    Truncated { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum WriteOctreeError {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("invalid binary data")]
    InvalidBinaryData(#[from] binrw::Error),
}

fn push_u32s(buf: &mut Vec<u8>, values: &[u32]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn push_i32s(buf: &mut Vec<u8>, values: &[i32]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn push_f32s(buf: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn read_u32s(cursor: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<u32>, binrw::Error> {
    cursor.read_le_args(binrw::VecArgs::builder().count(count).finalize())
}

fn read_i32s(cursor: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<i32>, binrw::Error> {
    cursor.read_le_args(binrw::VecArgs::builder().count(count).finalize())
}

fn read_f32s(cursor: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<f32>, binrw::Error> {
    cursor.read_le_args(binrw::VecArgs::builder().count(count).finalize())
}

impl Octree {
    /// Lay the descriptor and every property block out into the
    /// contiguous transport buffer.
    pub(crate) fn serialize(&mut self) {
        let depth = self.info.depth();
        let size = self.info.sizeof_octree();

        let mut buf = Vec::with_capacity(size);
        {
            let mut cursor = Cursor::new(&mut buf);
            cursor
                .write_le(&self.info)
                .expect("writing a header to an in-memory buffer cannot fail");
        }

        let levels = |location: i32| -> std::ops::RangeInclusive<i32> {
            if location == -1 {
                0..=depth
            } else {
                location..=location
            }
        };

        // key block
        if self.info.key2xyz() {
            let xyz = self.key_to_xyz();
            for d in levels(self.info.location(PropType::Key)) {
                push_u32s(&mut buf, &xyz[d as usize]);
            }
        } else {
            for d in levels(self.info.location(PropType::Key)) {
                push_u32s(&mut buf, &self.keys[d as usize]);
            }
        }

        // child block
        for d in levels(self.info.location(PropType::Child)) {
            push_i32s(&mut buf, &self.children[d as usize]);
        }

        // feature block: normals, displacement and the auxiliary channels
        // fused per level
        if self.info.has_property(PropType::Feature) {
            for d in levels(self.info.location(PropType::Feature)) {
                let d = d as usize;
                push_f32s(&mut buf, &self.avg_normals[d]);
                push_f32s(&mut buf, &self.displacement[d]);
                push_f32s(&mut buf, &self.avg_features[d]);
                push_f32s(&mut buf, &self.avg_fpfh[d]);
                push_f32s(&mut buf, &self.avg_roughness[d]);
            }
        }

        // label block
        if self.info.has_property(PropType::Label) {
            for d in levels(self.info.location(PropType::Label)) {
                push_f32s(&mut buf, &self.avg_labels[d as usize]);
            }
        }

        // split block
        if self.info.has_property(PropType::Split) {
            for d in levels(self.info.location(PropType::Split)) {
                let floats: Vec<f32> =
                    self.split_labels[d as usize].iter().map(|s| *s as f32).collect();
                push_f32s(&mut buf, &floats);
            }
        }

        debug_assert_eq!(buf.len(), size);
        self.buffer = buf;
    }

    /// Decoded `(x, y, z, depth)` key words for the serialized key block.
    pub(crate) fn key_to_xyz(&self) -> Vec<Vec<u32>> {
        let depth = self.info.depth();
        let channel = self.info.channel(PropType::Key);

        let mut xyz = Vec::with_capacity(depth as usize + 1);
        for d in 0..=depth {
            let mut words = Vec::with_capacity(self.keys[d as usize].len() * channel as usize);
            for k in self.keys[d as usize].iter() {
                let pt = key::decode(*k, d);
                if channel == 1 {
                    words.push(key::pack_xyzd(pt, d));
                } else {
                    words.extend_from_slice(&key::pack_xyzd_wide(pt, d));
                }
            }
            xyz.push(words);
        }
        xyz
    }

    /// Parse a serialized buffer back into a structured octree.
    pub fn from_buffer(data: &[u8]) -> Result<Octree, ReadOctreeError> {
        let mut cursor = Cursor::new(data);
        let info: OctreeInfo = cursor.read_le()?;
        info.check_format()?;

        let expected = info.sizeof_octree();
        if data.len() < expected {
            return Err(ReadOctreeError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let depth = info.depth();
        let mut octree = Octree::with_info(info);
        let info = &octree.info;

        let levels = |location: i32| -> std::ops::RangeInclusive<i32> {
            if location == -1 {
                0..=depth
            } else {
                location..=location
            }
        };

        // key block
        let key_channel = info.channel(PropType::Key) as usize;
        let mut keys = vec![Vec::new(); depth as usize + 1];
        for d in levels(info.location(PropType::Key)) {
            let nnum = info.node_num(d) as usize;
            let words = read_u32s(&mut cursor, nnum * key_channel.max(1))?;
            keys[d as usize] = if info.key2xyz() {
                words
                    .chunks_exact(key_channel)
                    .map(|w| {
                        let (pt, _) = if key_channel == 1 {
                            key::unpack_xyzd(w[0])
                        } else {
                            key::unpack_xyzd_wide([w[0], w[1]])
                        };
                        key::encode(pt, d)
                    })
                    .collect()
            } else {
                words
            };
        }

        // child block
        let mut children = vec![Vec::new(); depth as usize + 1];
        for d in levels(info.location(PropType::Child)) {
            let nnum = info.node_num(d) as usize;
            children[d as usize] = read_i32s(&mut cursor, nnum)?;
        }

        // feature block: normals first, then the displacement channel when
        // present, the rest stays fused as auxiliary features
        let feature_channel = info.channel(PropType::Feature) as usize;
        let normal_channel = if feature_channel >= 3 { 3 } else { 0 };
        let dis_channel = if info.has_displace() && feature_channel >= 4 {
            1
        } else {
            0
        };
        let rest_channel = feature_channel - normal_channel - dis_channel;

        let mut normals = vec![Vec::new(); depth as usize + 1];
        let mut displacement = vec![Vec::new(); depth as usize + 1];
        let mut features = vec![Vec::new(); depth as usize + 1];
        if info.has_property(PropType::Feature) {
            for d in levels(info.location(PropType::Feature)) {
                let nnum = info.node_num(d) as usize;
                normals[d as usize] = read_f32s(&mut cursor, nnum * normal_channel)?;
                displacement[d as usize] = read_f32s(&mut cursor, nnum * dis_channel)?;
                features[d as usize] = read_f32s(&mut cursor, nnum * rest_channel)?;
            }
        }

        // label block
        let mut labels = vec![Vec::new(); depth as usize + 1];
        if info.has_property(PropType::Label) {
            for d in levels(info.location(PropType::Label)) {
                let nnum = info.node_num(d) as usize;
                labels[d as usize] = read_f32s(&mut cursor, nnum)?;
            }
        }

        // split block
        let mut split = vec![Vec::new(); depth as usize + 1];
        if info.has_property(PropType::Split) {
            for d in levels(info.location(PropType::Split)) {
                let nnum = info.node_num(d) as usize;
                split[d as usize] = read_f32s(&mut cursor, nnum)?
                    .into_iter()
                    .map(|s| s as u8)
                    .collect();
            }
        }

        octree.keys = keys;
        octree.children = children;
        octree.avg_normals = normals;
        octree.displacement = displacement;
        octree.avg_features = features;
        octree.avg_labels = labels;
        octree.split_labels = split;
        octree.buffer = data[..expected].to_vec();
        octree.covered_depth_nodes();
        Ok(octree)
    }

    /// Write the serialized buffer to a file.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), WriteOctreeError> {
        std::fs::write(path, &self.buffer)?;
        Ok(())
    }

    /// Read a serialized octree file.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Octree, ReadOctreeError> {
        let data = std::fs::read(path)?;
        Self::from_buffer(&data)
    }

    /// Export the narrow legacy stream: topology for every level plus the
    /// finest-level normals, displacements and labels. Writes until the
    /// stream fails.
    pub fn write_legacy<W: Write + Seek>(&self, writer: &mut W) -> Result<(), WriteOctreeError> {
        let depth = self.info.depth();
        let full_layer = self.info.full_layer();

        let node_num: Vec<i32> = self.keys.iter().map(|k| k.len() as i32).collect();
        let mut node_num_accu = vec![0i32; depth as usize + 2];
        for d in 1..node_num_accu.len() {
            node_num_accu[d] = node_num_accu[d - 1] + node_num[d - 1];
        }
        let total_node_num = node_num_accu[depth as usize + 1];
        let final_node_num = node_num[depth as usize];

        let mut packed = Vec::with_capacity(total_node_num as usize);
        let mut children = Vec::with_capacity(total_node_num as usize);
        for d in 0..=depth {
            for (k, child) in self.keys[d as usize]
                .iter()
                .zip(self.children[d as usize].iter())
            {
                packed.push(key::pack_xyzd(key::decode(*k, d), d));
                children.push(*child);
            }
        }

        writer.write_le(&total_node_num)?;
        writer.write_le(&final_node_num)?;
        writer.write_le(&depth)?;
        writer.write_le(&full_layer)?;
        writer.write_le(&node_num)?;
        writer.write_le(&node_num_accu)?;
        writer.write_le(&packed)?;
        writer.write_le(&children)?;
        writer.write_le(&self.avg_normals[depth as usize])?;
        writer.write_le(&self.displacement[depth as usize])?;
        writer.write_le(&self.avg_labels[depth as usize])?;
        Ok(())
    }
}
