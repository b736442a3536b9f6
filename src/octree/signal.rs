//! Per-node signal aggregation.
//!
//! The leaf pass averages the raw point signals falling into each occupied
//! cell of the finest level. The upper pass then re-aggregates those leaf
//! averages over every internal node's coverage range, level by level, and
//! in adaptive mode derives the normal and distance error metrics that
//! drive trimming.

use glam::Vec3;
use rayon::prelude::*;

use super::{intersect, is_leaf, key, Octree, DIS_MUL, ERR_DEGENERATE, ERR_UNMEASURED, ESP};
use crate::points::Points;

/// Channel-major average of a per-point signal over the points of each
/// occupied leaf cell, divided by `count + ESP`.
fn average_channels(
    data: &[f32],
    channel: usize,
    nnum: usize,
    children: &[i32],
    sorted_idx: &[u32],
    unique_idx: &[u32],
) -> Vec<f32> {
    let sums: Vec<Option<Vec<f32>>> = (0..nnum)
        .into_par_iter()
        .map(|i| {
            let t = children[i];
            if is_leaf(t) {
                return None;
            }
            let t = t as usize;
            let mut sum = vec![0.0f32; channel];
            for j in unique_idx[t]..unique_idx[t + 1] {
                let h = sorted_idx[j as usize] as usize;
                for c in 0..channel {
                    sum[c] += data[channel * h + c];
                }
            }
            let factor = (unique_idx[t + 1] - unique_idx[t]) as f32 + ESP;
            for s in sum.iter_mut() {
                *s /= factor;
            }
            Some(sum)
        })
        .collect();

    let mut out = vec![0.0f32; channel * nnum];
    for (i, sum) in sums.iter().enumerate() {
        if let Some(sum) = sum {
            for c in 0..channel {
                out[c * nnum + i] = sum[c];
            }
        }
    }
    out
}

/// First-maximum index of a label histogram.
fn majority_label(hist: &[i32]) -> f32 {
    let mut best = 0;
    for (k, count) in hist.iter().enumerate() {
        if *count > hist[best] {
            best = k;
        }
    }
    best as f32
}

impl Octree {
    /// Average the input signals into the finest level.
    pub(crate) fn calc_leaf_signal(
        &mut self,
        points: &Points,
        pts_scaled: &[f32],
        sorted_idx: &[u32],
        unique_idx: &[u32],
    ) {
        let depth = self.info.depth();
        let dd = depth as usize;
        let nnum = self.info.node_num(depth) as usize;
        let children = &self.children[dd];

        if let Some(normals) = points.normals() {
            let channel = points.info().normal_channel() as usize;
            let sums: Vec<Option<Vec<f32>>> = (0..nnum)
                .into_par_iter()
                .map(|i| {
                    let t = children[i];
                    if is_leaf(t) {
                        return None;
                    }
                    let t = t as usize;
                    let mut sum = vec![0.0f32; channel];
                    for j in unique_idx[t]..unique_idx[t + 1] {
                        let h = sorted_idx[j as usize] as usize;
                        for c in 0..channel {
                            sum[c] += normals[channel * h + c];
                        }
                    }
                    let mut len = ESP;
                    for s in sum.iter() {
                        len += s * s;
                    }
                    let len = len.sqrt();
                    for s in sum.iter_mut() {
                        *s /= len;
                    }
                    Some(sum)
                })
                .collect();

            let mut out = vec![0.0f32; channel * nnum];
            for (i, sum) in sums.iter().enumerate() {
                if let Some(sum) = sum {
                    for c in 0..channel {
                        out[c * nnum + i] = sum[c];
                    }
                }
            }
            self.avg_normals[dd] = out;
        }

        if let Some(features) = points.features() {
            let channel = points.info().feature_channel() as usize;
            self.avg_features[dd] =
                average_channels(features, channel, nnum, children, sorted_idx, unique_idx);
        }

        if let Some(fpfh) = points.fpfh() {
            let channel = points.info().fpfh_channel() as usize;
            self.avg_fpfh[dd] =
                average_channels(fpfh, channel, nnum, children, sorted_idx, unique_idx);
        }

        if let Some(roughness) = points.roughness() {
            let channel = points.info().roughness_channel() as usize;
            self.avg_roughness[dd] =
                average_channels(roughness, channel, nnum, children, sorted_idx, unique_idx);
        }

        if let Some(labels) = points.labels() {
            self.max_label = labels.iter().fold(0.0f32, |m, l| m.max(*l)) as i32 + 1;
            let max_label = self.max_label as usize;

            let votes: Vec<Option<f32>> = (0..nnum)
                .into_par_iter()
                .map(|i| {
                    let t = children[i];
                    if is_leaf(t) {
                        return None;
                    }
                    let t = t as usize;
                    let mut hist = vec![0i32; max_label];
                    for j in unique_idx[t]..unique_idx[t + 1] {
                        let h = sorted_idx[j as usize] as usize;
                        hist[labels[h] as usize] += 1;
                    }
                    Some(majority_label(&hist))
                })
                .collect();

            self.avg_labels[dd] = votes.iter().map(|v| v.unwrap_or(-1.0)).collect();
        }

        if self.info.has_displace() && points.normals().is_some() {
            let avg_normals = &self.avg_normals[dd];
            let results: Vec<Option<([f32; 3], f32)>> = (0..nnum)
                .into_par_iter()
                .map(|i| {
                    let t = children[i];
                    if is_leaf(t) {
                        return None;
                    }
                    let t = t as usize;
                    let mut avg_pt = [0.0f32; 3];
                    for j in unique_idx[t]..unique_idx[t + 1] {
                        let h = sorted_idx[j as usize] as usize;
                        for c in 0..3 {
                            avg_pt[c] += pts_scaled[3 * h + c];
                        }
                    }
                    let factor = (unique_idx[t + 1] - unique_idx[t]) as f32 + ESP;
                    let mut dis = 0.0f32;
                    for c in 0..3 {
                        avg_pt[c] /= factor;
                        let fract = avg_pt[c] - avg_pt[c].floor();
                        dis += (fract - 0.5) * avg_normals[c * nnum + i];
                    }
                    Some((avg_pt, dis * DIS_MUL))
                })
                .collect();

            let mut pts_out = vec![0.0f32; 3 * nnum];
            let mut dis_out = vec![0.0f32; nnum];
            for (i, r) in results.iter().enumerate() {
                if let Some((pt, dis)) = r {
                    for c in 0..3 {
                        pts_out[c * nnum + i] = pt[c];
                    }
                    dis_out[i] = *dis;
                }
            }
            self.avg_pts[dd] = pts_out;
            self.displacement[dd] = dis_out;
        }
    }

    /// Aggregate the leaf-level averages into every coarser level, and
    /// measure the approximation errors where adaptive trimming applies.
    pub(crate) fn calc_upper_signal(&mut self, calc_norm_err: bool, calc_dist_err: bool) {
        let depth = self.info.depth();
        let dd = depth as usize;
        let depth_adp = self.info.adaptive_layer();
        let nnum_depth = self.info.node_num(depth) as usize;

        let channel_of = |len: usize| if nnum_depth == 0 { 0 } else { len / nnum_depth };
        let channel_normal = channel_of(self.avg_normals[dd].len());
        let channel_pt = channel_of(self.avg_pts[dd].len());
        let channel_feature = channel_of(self.avg_features[dd].len());
        let channel_fpfh = channel_of(self.avg_fpfh[dd].len());
        let channel_roughness = channel_of(self.avg_roughness[dd].len());

        let has_normal = !self.avg_normals[dd].is_empty();
        let has_pt = !self.avg_pts[dd].is_empty();
        let has_dis = !self.displacement[dd].is_empty();
        let has_feature = !self.avg_features[dd].is_empty();
        let has_fpfh = !self.avg_fpfh[dd].is_empty();
        let has_roughness = !self.avg_roughness[dd].is_empty();
        let has_label = !self.avg_labels[dd].is_empty();
        let max_label = self.max_label.max(0) as usize;

        if calc_norm_err {
            self.normal_err[dd] = vec![ERR_UNMEASURED; nnum_depth];
        }
        if calc_dist_err {
            self.distance_err[dd] = vec![ERR_UNMEASURED; nnum_depth];
        }

        struct NodeOut {
            normal: Vec<f32>,
            pt: Vec<f32>,
            feature: Vec<f32>,
            fpfh: Vec<f32>,
            roughness: Vec<f32>,
            label: f32,
            dis: f32,
            normal_err: f32,
            distance_err: f32,
        }

        for d in (0..dd).rev() {
            let nnum_d = self.info.node_num(d as i32) as usize;
            let scale = (1i32 << (dd - d)) as f32;
            let measure_err = d as i32 >= depth_adp;

            let children_d = &self.children[d];
            let children_depth = &self.children[dd];
            let didx_d = &self.didx[d];
            let dnum_d = &self.dnum[d];
            let keys_d = &self.keys[d];
            let normal_depth = &self.avg_normals[dd];
            let pt_depth = &self.avg_pts[dd];
            let feature_depth = &self.avg_features[dd];
            let fpfh_depth = &self.avg_fpfh[dd];
            let roughness_depth = &self.avg_roughness[dd];
            let label_depth = &self.avg_labels[dd];

            let outs: Vec<Option<NodeOut>> = (0..nnum_d)
                .into_par_iter()
                .map(|i| {
                    if is_leaf(children_d[i]) {
                        return None;
                    }
                    let j0 = didx_d[i] as usize;
                    let j1 = j0 + dnum_d[i] as usize;

                    let mut n_avg = vec![0.0f32; channel_normal];
                    if has_normal {
                        for j in j0..j1 {
                            if is_leaf(children_depth[j]) {
                                continue;
                            }
                            for c in 0..channel_normal {
                                n_avg[c] += normal_depth[c * nnum_depth + j];
                            }
                        }
                        let mut len = ESP;
                        for v in n_avg.iter() {
                            len += v * v;
                        }
                        let len = len.sqrt();
                        for v in n_avg.iter_mut() {
                            *v /= len;
                        }
                    }

                    // non-empty leaf cells covered by this node
                    let mut count = ESP;
                    for j in j0..j1 {
                        if !is_leaf(children_depth[j]) {
                            count += 1.0;
                        }
                    }

                    let mut pt_avg = vec![0.0f32; channel_pt];
                    if has_pt {
                        for j in j0..j1 {
                            if is_leaf(children_depth[j]) {
                                continue;
                            }
                            for c in 0..channel_pt {
                                pt_avg[c] += pt_depth[c * nnum_depth + j];
                            }
                        }
                        // re-express in level-d cell units
                        for v in pt_avg.iter_mut() {
                            *v /= count * scale;
                        }
                    }

                    let sum_over = |data: &[f32], channel: usize| -> Vec<f32> {
                        let mut avg = vec![0.0f32; channel];
                        for j in j0..j1 {
                            if is_leaf(children_depth[j]) {
                                continue;
                            }
                            for c in 0..channel {
                                avg[c] += data[c * nnum_depth + j];
                            }
                        }
                        for v in avg.iter_mut() {
                            *v /= count;
                        }
                        avg
                    };
                    let feature = if has_feature {
                        sum_over(feature_depth, channel_feature)
                    } else {
                        Vec::new()
                    };
                    let fpfh = if has_fpfh {
                        sum_over(fpfh_depth, channel_fpfh)
                    } else {
                        Vec::new()
                    };
                    let roughness = if has_roughness {
                        sum_over(roughness_depth, channel_roughness)
                    } else {
                        Vec::new()
                    };

                    let mut label = -1.0f32;
                    if has_label {
                        let mut hist = vec![0i32; max_label];
                        for j in j0..j1 {
                            if is_leaf(children_depth[j]) {
                                continue;
                            }
                            hist[label_depth[j] as usize] += 1;
                        }
                        label = majority_label(&hist);
                    }

                    let pt_base = key::decode(keys_d[i], d as i32).as_vec3();

                    let mut dis = 0.0f32;
                    if has_dis {
                        for c in 0..3 {
                            let fract = pt_avg[c] - pt_base[c];
                            dis += (fract - 0.5) * n_avg[c];
                        }
                        dis *= DIS_MUL;
                    }

                    let mut normal_err = ERR_UNMEASURED;
                    if calc_norm_err && has_normal && measure_err {
                        let mut nm_err = 0.0f32;
                        for j in j0..j1 {
                            if is_leaf(children_depth[j]) {
                                continue;
                            }
                            for c in 0..3 {
                                let diff = normal_depth[c * nnum_depth + j] - n_avg[c];
                                nm_err += diff * diff;
                            }
                        }
                        normal_err = nm_err / count;
                    }

                    let mut distance_err = ERR_UNMEASURED;
                    if calc_dist_err && has_pt && measure_err {
                        // geometry -> plane: worst covered-leaf centroid
                        // distance to the averaged plane, in leaf units
                        let mut dist_fwd = -1.0f32;
                        let pt_avg1 = [pt_avg[0] * scale, pt_avg[1] * scale, pt_avg[2] * scale];
                        for j in j0..j1 {
                            if is_leaf(children_depth[j]) {
                                continue;
                            }
                            let mut dot = 0.0f32;
                            for c in 0..3 {
                                dot += (pt_depth[c * nnum_depth + j] - pt_avg1[c]) * n_avg[c];
                            }
                            dist_fwd = dist_fwd.max(dot.abs());
                        }

                        // plane -> geometry: worst plane-polygon vertex
                        // distance to its nearest covered-leaf centroid
                        let polygon = intersect::intersect_cube(
                            Vec3::new(pt_avg[0], pt_avg[1], pt_avg[2]),
                            pt_base,
                            Vec3::new(n_avg[0], n_avg[1], n_avg[2]),
                        );
                        let mut dist_rev = if polygon.is_empty() {
                            ERR_DEGENERATE
                        } else {
                            -1.0f32
                        };
                        for v in polygon {
                            let v = v * scale;
                            let mut dist_min = f32::MAX;
                            for j in j0..j1 {
                                if is_leaf(children_depth[j]) {
                                    continue;
                                }
                                let leaf = Vec3::new(
                                    pt_depth[j],
                                    pt_depth[nnum_depth + j],
                                    pt_depth[2 * nnum_depth + j],
                                );
                                dist_min = dist_min.min(leaf.distance(v));
                            }
                            dist_rev = dist_rev.max(dist_min);
                        }

                        distance_err = dist_fwd.max(dist_rev);
                    }

                    Some(NodeOut {
                        normal: n_avg,
                        pt: pt_avg,
                        feature,
                        fpfh,
                        roughness,
                        label,
                        dis,
                        normal_err,
                        distance_err,
                    })
                })
                .collect();

            let mut normal_d = if has_normal {
                vec![0.0f32; nnum_d * channel_normal]
            } else {
                Vec::new()
            };
            let mut pt_d = if has_pt {
                vec![0.0f32; nnum_d * channel_pt]
            } else {
                Vec::new()
            };
            let mut feature_d = if has_feature {
                vec![0.0f32; nnum_d * channel_feature]
            } else {
                Vec::new()
            };
            let mut fpfh_d = if has_fpfh {
                vec![0.0f32; nnum_d * channel_fpfh]
            } else {
                Vec::new()
            };
            let mut roughness_d = if has_roughness {
                vec![0.0f32; nnum_d * channel_roughness]
            } else {
                Vec::new()
            };
            let mut label_d = if has_label {
                vec![-1.0f32; nnum_d]
            } else {
                Vec::new()
            };
            let mut dis_d = if has_dis { vec![0.0f32; nnum_d] } else { Vec::new() };
            let mut normal_err_d = if calc_norm_err {
                vec![ERR_UNMEASURED; nnum_d]
            } else {
                Vec::new()
            };
            let mut distance_err_d = if calc_dist_err {
                vec![ERR_UNMEASURED; nnum_d]
            } else {
                Vec::new()
            };

            for (i, out) in outs.into_iter().enumerate() {
                let Some(out) = out else { continue };
                for c in 0..channel_normal {
                    normal_d[c * nnum_d + i] = out.normal[c];
                }
                for c in 0..channel_pt {
                    pt_d[c * nnum_d + i] = out.pt[c];
                }
                for c in 0..channel_feature {
                    feature_d[c * nnum_d + i] = out.feature[c];
                }
                for c in 0..channel_fpfh {
                    fpfh_d[c * nnum_d + i] = out.fpfh[c];
                }
                for c in 0..channel_roughness {
                    roughness_d[c * nnum_d + i] = out.roughness[c];
                }
                if has_label {
                    label_d[i] = out.label;
                }
                if has_dis {
                    dis_d[i] = out.dis;
                }
                if calc_norm_err {
                    normal_err_d[i] = out.normal_err;
                }
                if calc_dist_err {
                    distance_err_d[i] = out.distance_err;
                }
            }

            self.avg_normals[d] = normal_d;
            self.avg_pts[d] = pt_d;
            self.avg_features[d] = feature_d;
            self.avg_fpfh[d] = fpfh_d;
            self.avg_roughness[d] = roughness_d;
            self.avg_labels[d] = label_d;
            self.displacement[d] = dis_d;
            self.normal_err[d] = normal_err_d;
            self.distance_err[d] = distance_err_d;
        }
    }
}
