//! Adaptive trimming and split-label assignment.

use super::info::PropType;
use super::{is_leaf, Octree};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrimType {
    /// The node's subtree was already cut at an ancestor.
    Drop,
    /// The node stays but becomes a leaf carrying the surface approximation.
    DropChildren,
    Keep,
}

/// Remove the entries flagged `Drop` from a channel-major signal array,
/// then restore the channel-major layout under the new node count.
fn trim_channel_major(signal: &mut Vec<f32>, nnum: usize, drop: &[TrimType]) {
    if signal.is_empty() {
        return;
    }
    let channel = signal.len() / nnum;

    let mut data = Vec::with_capacity(signal.len());
    for i in 0..nnum {
        if drop[i] == TrimType::Drop {
            continue;
        }
        for c in 0..channel {
            data.push(signal[c * nnum + i]);
        }
    }

    let num = data.len() / channel;
    signal.truncate(data.len());
    for i in 0..num {
        for c in 0..channel {
            signal[c * num + i] = data[i * channel + c];
        }
    }
}

impl Octree {
    /// Cut subtrees whose geometry is well approximated by their parent,
    /// per the configured error thresholds, then rebuild the bookkeeping
    /// and the serialized buffer. A no-op outside adaptive mode.
    pub(crate) fn trim_octree(&mut self) {
        if !self.info.is_adaptive() {
            return;
        }
        let depth = self.info.depth();
        // nothing was measured for a signal-less tree
        if self.normal_err[depth as usize].is_empty() {
            return;
        }
        let depth_adp = self.info.adaptive_layer();
        let th_dist = self.info.threshold_distance();
        let th_norm = self.info.threshold_normal();
        let has_dis = self.info.has_displace();

        let mut drop: Vec<Vec<TrimType>> = (0..=depth)
            .map(|d| vec![TrimType::Keep; self.info.node_num(d) as usize])
            .collect();

        for d in depth_adp.max(1)..=depth {
            let d = d as usize;
            let nnum_dp = self.info.node_num(d as i32 - 1) as usize;
            let (head, tail) = drop.split_at_mut(d);
            let drop_dp = &head[d - 1];
            let drop_d = &mut tail[0];

            let mut all_drop = true;
            for i in 0..nnum_dp {
                let t = self.children[d - 1][i];
                if is_leaf(t) {
                    continue;
                }
                for j in 0..8 {
                    let idx = (t * 8) as usize + j;
                    if drop_dp[i] == TrimType::Keep {
                        // leaves and finest-level nodes keep the unmeasured
                        // sentinel, so only internal nodes can pass here
                        let dist_ok = !has_dis || self.distance_err[d][idx] < th_dist;
                        if dist_ok && self.normal_err[d][idx] < th_norm {
                            drop_d[idx] = TrimType::DropChildren;
                        }
                    } else {
                        drop_d[idx] = TrimType::Drop;
                    }

                    if all_drop {
                        all_drop =
                            !(drop_d[idx] == TrimType::Keep && !is_leaf(self.children[d][idx]));
                    }
                }
            }

            // keep at least one internal node per level: promote the kept
            // candidate with the largest normal error
            if all_drop {
                let mut max_idx = 0;
                let mut max_err = -1.0f32;
                for i in 0..nnum_dp {
                    let t = self.children[d - 1][i];
                    if is_leaf(t) || drop_dp[i] != TrimType::Keep {
                        continue;
                    }
                    for j in 0..8 {
                        let idx = (t * 8) as usize + j;
                        if !is_leaf(self.children[d][idx]) && self.normal_err[d][idx] > max_err {
                            max_err = self.normal_err[d][idx];
                            max_idx = idx;
                        }
                    }
                }
                drop_d[max_idx] = TrimType::Keep;
            }
        }

        for d in depth_adp..=depth {
            let d = d as usize;
            let nnum_d = self.info.node_num(d as i32) as usize;
            let drop_d = &drop[d];

            let keys: Vec<u32> = (0..nnum_d)
                .filter(|i| drop_d[*i] != TrimType::Drop)
                .map(|i| self.keys[d][i])
                .collect();
            self.keys[d] = keys;

            let mut children = Vec::new();
            let mut id = 0;
            for i in 0..nnum_d {
                if drop_d[i] == TrimType::Drop {
                    continue;
                }
                let internal = drop_d[i] == TrimType::Keep && !is_leaf(self.children[d][i]);
                children.push(if internal {
                    id += 1;
                    id - 1
                } else {
                    -1
                });
            }
            self.children[d] = children;

            trim_channel_major(&mut self.displacement[d], nnum_d, drop_d);
            trim_channel_major(&mut self.avg_normals[d], nnum_d, drop_d);
            trim_channel_major(&mut self.avg_pts[d], nnum_d, drop_d);
            trim_channel_major(&mut self.avg_features[d], nnum_d, drop_d);
            trim_channel_major(&mut self.avg_fpfh[d], nnum_d, drop_d);
            trim_channel_major(&mut self.avg_roughness[d], nnum_d, drop_d);
            trim_channel_major(&mut self.avg_labels[d], nnum_d, drop_d);
            trim_channel_major(&mut self.normal_err[d], nnum_d, drop_d);
            trim_channel_major(&mut self.distance_err[d], nnum_d, drop_d);
        }

        self.calc_node_num();
        self.covered_depth_nodes();
        if self.info.has_property(PropType::Split) {
            self.compute_split_labels();
        }
        self.serialize();

        tracing::debug!(
            total_nodes = self.info.total_node_num(),
            "trimmed adaptive octree"
        );
    }

    /// Ternary split tag per node: 1 internal, 0 empty leaf, 2 adaptive
    /// leaf still carrying a surface approximation.
    pub(crate) fn compute_split_labels(&mut self) {
        let depth = self.info.depth();
        let adaptive = self.info.is_adaptive();

        for d in 0..=depth as usize {
            let nnum_d = self.info.node_num(d as i32) as usize;
            let normals = &self.avg_normals[d];
            let has_normal = !normals.is_empty();

            let mut labels = vec![1u8; nnum_d];
            for i in 0..nnum_d {
                if !is_leaf(self.children[d][i]) {
                    continue;
                }
                labels[i] = 0;
                if adaptive && has_normal {
                    let t = normals[i].abs()
                        + normals[nnum_d + i].abs()
                        + normals[2 * nnum_d + i].abs();
                    if t != 0.0 {
                        labels[i] = 2;
                    }
                }
            }
            self.split_labels[d] = labels;
        }
    }
}
