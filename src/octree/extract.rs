//! Reconstruction of an oriented point set from a built octree.

use glam::Vec3;

use super::{key, Octree, DIS_MUL};
use crate::points::{Points, PointsError};

impl Octree {
    /// Emit one oriented point per signal-carrying node of the levels in
    /// `[depth_start, depth_end]`, mapped back to world coordinates.
    ///
    /// A node contributes when its averaged normal is non-zero; the point
    /// sits at the cell center, pushed along the normal by the stored
    /// displacement when the octree carries one.
    pub fn extract_points(
        &self,
        depth_start: i32,
        depth_end: i32,
    ) -> Result<Points, PointsError> {
        let depth = self.info.depth();
        let d0 = depth_start.clamp(0, depth);
        let d1 = depth_end.clamp(0, depth);
        let bbmin = self.info.bbox().min;
        let width = self.info.bbox_max_width();

        let emit_labels = (d0..=d1)
            .all(|d| self.avg_normals[d as usize].is_empty() || !self.avg_labels[d as usize].is_empty());

        let mut pts = Vec::new();
        let mut normals = Vec::new();
        let mut labels = Vec::new();

        for d in d0..=d1 {
            let du = d as usize;
            let normals_d = &self.avg_normals[du];
            if normals_d.is_empty() {
                continue;
            }
            let nnum = self.info.node_num(d) as usize;
            let cell_width = width / (1i32 << d) as f32;

            for i in 0..nnum {
                let n = Vec3::new(normals_d[i], normals_d[nnum + i], normals_d[2 * nnum + i]);
                if n.x.abs() + n.y.abs() + n.z.abs() == 0.0 {
                    continue;
                }

                let base = key::decode(self.keys[du][i], d).as_vec3();
                let dis = self.displacement[du].get(i).copied().unwrap_or(0.0);
                let local = base + Vec3::splat(0.5) + (dis / DIS_MUL) * n;
                let world = local * cell_width + bbmin;

                pts.extend_from_slice(&world.to_array());
                normals.extend_from_slice(&n.to_array());
                if emit_labels {
                    labels.push(self.avg_labels[du][i]);
                }
            }
        }

        Points::from_parts(pts, normals, Vec::new(), Vec::new(), Vec::new(), labels)
    }
}
