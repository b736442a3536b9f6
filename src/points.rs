//! The oriented point-cloud container consumed by the octree builder.
//!
//! A [`Points`] value carries flat channel arrays (positions, optional
//! normals, auxiliary features, FPFH descriptors, roughness and labels)
//! together with a [`PointsInfo`] descriptor reporting the per-property
//! channel widths. The container is immutable from the builder's point of
//! view; the rigid transforms below produce the input, never mutate it
//! during a build.

use binrw::{binrw, BinReaderExt, BinWriterExt, VecArgs};
use glam::{Mat3, Quat, Vec3};
use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;
use thiserror::Error;

use crate::octree::aabb::Aabb;

pub const MAGIC: &[u8; 16] = b"_POINTS_1.0_\0\0\0\0";

#[derive(Error, Debug)]
pub enum PointsError {
    #[error("the position array must be a non-empty multiple of three")]
    BadPositions,

    #[error("normals must hold three channels per point")]
    BadNormals,

    #[error("the {0} array is not a whole multiple of the point count")]
    BadChannel(&'static str),

    #[error("labels must hold one value per point")]
    BadLabels,

    #[error("points must carry normals or features")]
    MissingSignal,
}

#[derive(Error, Debug)]
pub enum ReadPointsError {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("invalid binary data")]
    InvalidBinaryData(#[from] binrw::Error),

    #[error("the magic string does not match _POINTS_1.0_")]
    BadMagic,

    #[error("inconsistent channels: {0}")]
    BadChannels(#[from] PointsError),
}

#[derive(Error, Debug)]
pub enum WritePointsError {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("invalid binary data")]
    InvalidBinaryData(#[from] binrw::Error),
}

/// Per-property channel widths of a point cloud, with the same on-disk
/// layout as the front of a `.points` file.
#[binrw]
#[brw(little)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointsInfo {
    magic: [u8; 16],
    pt_num: i32,
    content_flags: i32,
    channels: [i32; 8],
    ptr_dis: [i32; 8],
}

const POINT: usize = 0;
const NORMAL: usize = 1;
const FEATURE: usize = 2;
const FPFH: usize = 3;
const ROUGHNESS: usize = 4;
const LABEL: usize = 5;

impl PointsInfo {
    pub fn pt_num(&self) -> i32 {
        self.pt_num
    }

    pub fn point_channel(&self) -> i32 {
        self.channels[POINT]
    }

    pub fn normal_channel(&self) -> i32 {
        self.channels[NORMAL]
    }

    pub fn feature_channel(&self) -> i32 {
        self.channels[FEATURE]
    }

    pub fn fpfh_channel(&self) -> i32 {
        self.channels[FPFH]
    }

    pub fn roughness_channel(&self) -> i32 {
        self.channels[ROUGHNESS]
    }

    pub fn label_channel(&self) -> i32 {
        self.channels[LABEL]
    }

    fn set_channel(&mut self, index: usize, channel: i32) {
        self.channels[index] = channel;
        if channel > 0 {
            self.content_flags |= 1 << index;
        } else {
            self.content_flags &= !(1 << index);
        }
    }

    fn set_ptr_dis(&mut self) {
        const HEADER: i32 = 16 + 4 * 18;
        self.ptr_dis[0] = HEADER;
        for i in 1..8 {
            self.ptr_dis[i] = self.ptr_dis[i - 1] + 4 * self.pt_num * self.channels[i - 1];
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Points {
    info: PointsInfo,
    pts: Vec<f32>,
    normals: Vec<f32>,
    features: Vec<f32>,
    fpfh: Vec<f32>,
    roughness: Vec<f32>,
    labels: Vec<f32>,
}

impl Points {
    /// Assemble a cloud from flat channel arrays. Every optional array may
    /// be empty; positions are mandatory, and at least one of normals or
    /// features must be present.
    pub fn from_parts(
        pts: Vec<f32>,
        normals: Vec<f32>,
        features: Vec<f32>,
        fpfh: Vec<f32>,
        roughness: Vec<f32>,
        labels: Vec<f32>,
    ) -> Result<Self, PointsError> {
        if pts.is_empty() || pts.len() % 3 != 0 {
            return Err(PointsError::BadPositions);
        }
        let npt = pts.len() / 3;
        if !normals.is_empty() && normals.len() != 3 * npt {
            return Err(PointsError::BadNormals);
        }
        if features.len() % npt != 0 {
            return Err(PointsError::BadChannel("feature"));
        }
        if fpfh.len() % npt != 0 {
            return Err(PointsError::BadChannel("fpfh"));
        }
        if roughness.len() % npt != 0 {
            return Err(PointsError::BadChannel("roughness"));
        }
        if !labels.is_empty() && labels.len() != npt {
            return Err(PointsError::BadLabels);
        }
        if normals.is_empty() && features.is_empty() {
            return Err(PointsError::MissingSignal);
        }

        let mut info = PointsInfo {
            magic: *MAGIC,
            pt_num: npt as i32,
            ..PointsInfo::default()
        };
        info.set_channel(POINT, 3);
        info.set_channel(NORMAL, if normals.is_empty() { 0 } else { 3 });
        info.set_channel(FEATURE, (features.len() / npt) as i32);
        info.set_channel(FPFH, (fpfh.len() / npt) as i32);
        info.set_channel(ROUGHNESS, (roughness.len() / npt) as i32);
        info.set_channel(LABEL, if labels.is_empty() { 0 } else { 1 });
        info.set_ptr_dis();

        Ok(Self {
            info,
            pts,
            normals,
            features,
            fpfh,
            roughness,
            labels,
        })
    }

    pub fn info(&self) -> &PointsInfo {
        &self.info
    }

    pub fn num_points(&self) -> usize {
        self.info.pt_num as usize
    }

    pub fn positions(&self) -> &[f32] {
        &self.pts
    }

    pub fn normals(&self) -> Option<&[f32]> {
        (!self.normals.is_empty()).then_some(self.normals.as_slice())
    }

    pub fn features(&self) -> Option<&[f32]> {
        (!self.features.is_empty()).then_some(self.features.as_slice())
    }

    pub fn fpfh(&self) -> Option<&[f32]> {
        (!self.fpfh.is_empty()).then_some(self.fpfh.as_slice())
    }

    pub fn roughness(&self) -> Option<&[f32]> {
        (!self.roughness.is_empty()).then_some(self.roughness.as_slice())
    }

    pub fn labels(&self) -> Option<&[f32]> {
        (!self.labels.is_empty()).then_some(self.labels.as_slice())
    }

    /// Tight axis-aligned bounds of the positions.
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&self.pts)
    }

    /// Read a binary `.points` file.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ReadPointsError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ReadPointsError> {
        let mut cursor = Cursor::new(data);
        let info: PointsInfo = cursor.read_le()?;
        if info.magic != *MAGIC {
            return Err(ReadPointsError::BadMagic);
        }

        let npt = info.pt_num.max(0) as usize;
        let mut block = |channel: i32| -> Result<Vec<f32>, binrw::Error> {
            cursor.read_le_args(VecArgs::builder().count(npt * channel.max(0) as usize).finalize())
        };
        let pts = block(info.channels[POINT])?;
        let normals = block(info.channels[NORMAL])?;
        let features = block(info.channels[FEATURE])?;
        let fpfh = block(info.channels[FPFH])?;
        let roughness = block(info.channels[ROUGHNESS])?;
        let labels = block(info.channels[LABEL])?;

        Ok(Self::from_parts(pts, normals, features, fpfh, roughness, labels)?)
    }

    /// Write the binary `.points` form.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), WritePointsError> {
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(&self.info)?;
        cursor.write_le(&self.pts)?;
        cursor.write_le(&self.normals)?;
        cursor.write_le(&self.features)?;
        cursor.write_le(&self.fpfh)?;
        cursor.write_le(&self.roughness)?;
        cursor.write_le(&self.labels)?;
        std::fs::write(path, cursor.into_inner())?;
        Ok(())
    }

    /// Export positions (and normals, when present) as ASCII PLY.
    pub fn write_ply(&self, path: impl AsRef<Path>) -> Result<(), WritePointsError> {
        let mut out = BufWriter::new(File::create(path)?);
        let has_normals = !self.normals.is_empty();

        writeln!(out, "ply")?;
        writeln!(out, "format ascii 1.0")?;
        writeln!(out, "element vertex {}", self.num_points())?;
        writeln!(out, "property float x")?;
        writeln!(out, "property float y")?;
        writeln!(out, "property float z")?;
        if has_normals {
            writeln!(out, "property float nx")?;
            writeln!(out, "property float ny")?;
            writeln!(out, "property float nz")?;
        }
        writeln!(out, "end_header")?;

        for i in 0..self.num_points() {
            let p = &self.pts[3 * i..3 * i + 3];
            if has_normals {
                let n = &self.normals[3 * i..3 * i + 3];
                writeln!(
                    out,
                    "{} {} {} {} {} {}",
                    p[0], p[1], p[2], n[0], n[1], n[2]
                )?;
            } else {
                writeln!(out, "{} {} {}", p[0], p[1], p[2])?;
            }
        }
        Ok(())
    }

    /// Translate the cloud so its bounds are centered about `center`.
    pub fn center_about(&mut self, center: Vec3) {
        let offset = center - self.bounds().center();
        for p in self.pts.chunks_exact_mut(3) {
            p[0] += offset.x;
            p[1] += offset.y;
            p[2] += offset.z;
        }
    }

    /// Push every point along its normal by `dis`. A no-op for clouds
    /// without normals.
    pub fn displace(&mut self, dis: f32) {
        if self.normals.is_empty() {
            return;
        }
        for (p, n) in self
            .pts
            .chunks_exact_mut(3)
            .zip(self.normals.chunks_exact(3))
        {
            p[0] += dis * n[0];
            p[1] += dis * n[1];
            p[2] += dis * n[2];
        }
    }

    /// Rotate positions and normals by `angle` radians about `axis`.
    pub fn rotate(&mut self, angle: f32, axis: Vec3) {
        let rot = Mat3::from_quat(Quat::from_axis_angle(axis.normalize(), angle));
        self.transform(&rot);
    }

    /// Apply a linear transform to positions and normals.
    pub fn transform(&mut self, mat: &Mat3) {
        for p in self.pts.chunks_exact_mut(3) {
            let v = *mat * Vec3::new(p[0], p[1], p[2]);
            p.copy_from_slice(&v.to_array());
        }
        for n in self.normals.chunks_exact_mut(3) {
            let v = (*mat * Vec3::new(n[0], n[1], n[2])).normalize_or_zero();
            n.copy_from_slice(&v.to_array());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Points {
        Points::from_parts(
            vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0],
            vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            vec![1.0, 2.0],
        )
        .unwrap()
    }

    #[test]
    fn channel_widths_are_derived() {
        let p = sample();
        assert_eq!(p.num_points(), 2);
        assert_eq!(p.info().normal_channel(), 3);
        assert_eq!(p.info().label_channel(), 1);
        assert_eq!(p.info().feature_channel(), 0);
    }

    #[test]
    fn rejects_cloud_without_signal() {
        let err = Points::from_parts(
            vec![0.0; 3],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PointsError::MissingSignal));
    }

    #[test]
    fn binary_roundtrip() {
        let p = sample();
        let dir = std::env::temp_dir().join("mortree_points_roundtrip.points");
        p.write_file(&dir).unwrap();
        let q = Points::read_file(&dir).unwrap();
        assert_eq!(p.positions(), q.positions());
        assert_eq!(p.normals(), q.normals());
        assert_eq!(p.labels(), q.labels());
        assert_eq!(p.info(), q.info());
    }

    #[test]
    fn displace_moves_along_normals() {
        let mut p = sample();
        p.displace(2.0);
        assert_eq!(&p.positions()[..3], &[0.0, 0.0, 2.0]);
        assert_eq!(&p.positions()[3..], &[3.0, 2.0, 3.0]);
    }
}
