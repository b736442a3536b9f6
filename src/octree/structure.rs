//! Level-wise materialization of the tree from the sorted leaf keys.

use rayon::prelude::*;

use super::sort::unique_reduce;
use super::{is_leaf, Octree};

impl Octree {
    /// Fill `keys` and `children` for every level.
    ///
    /// Levels `0..=full_layer` are dense. Above the full layer the tree is
    /// rebuilt from the distinct leaf keys in `node_keys`, one level at a
    /// time from the bottom: the keys are grouped under their parents,
    /// every parent is expanded into a full sibling octet, and occupied
    /// slots point back at the pre-expansion node index. On return
    /// `node_keys` holds the distinct keys of the full layer.
    pub(crate) fn build_structure(&mut self, node_keys: &mut Vec<u32>) {
        let depth = self.info.depth();
        let full_layer = self.info.full_layer();

        for d in 0..=full_layer {
            let n = 1usize << (3 * d);
            self.keys[d as usize] = (0..n as u32).collect();
            self.children[d as usize] = if d != full_layer {
                (0..n as i32).collect()
            } else {
                vec![-1; n]
            };
        }

        for d in ((full_layer + 1)..=depth).rev() {
            let n = node_keys.len();
            let mut parent_keys: Vec<u32> = node_keys.par_iter().map(|k| k >> 3).collect();
            let mut parent_pidx = Vec::new();
            unique_reduce(&mut parent_keys, &mut parent_pidx);

            let np = parent_keys.len();
            let nch = np << 3;

            self.keys[d as usize] = (0..nch)
                .into_par_iter()
                .map(|i| (parent_keys[i >> 3] << 3) | (i as u32 & 7))
                .collect();

            // base slot of each pre-expansion node's sibling octet
            let mut addr = vec![0u32; n];
            for j in 0..np {
                for i in parent_pidx[j]..parent_pidx[j + 1] {
                    addr[i as usize] = (j as u32) << 3;
                }
            }

            let children = &mut self.children[d as usize];
            *children = vec![-1; nch];
            for (i, k) in node_keys.iter().enumerate() {
                let slot = (k & 7) | addr[i];
                children[slot as usize] = i as i32;
            }

            *node_keys = parent_keys;
        }

        // node_keys is now the occupied-key list of the full layer
        let children = &mut self.children[full_layer as usize];
        for (i, k) in node_keys.iter().enumerate() {
            children[*k as usize] = i as i32;
        }
    }

    /// Record per-level node counts in the descriptor and refresh the
    /// serialized block offsets.
    pub(crate) fn calc_node_num(&mut self) {
        let depth = self.info.depth();

        let node_num: Vec<i32> = self.keys.iter().map(|k| k.len() as i32).collect();

        // children pointers are monotone, so the last internal node's
        // pointer + 1 is the non-empty count
        let mut node_num_nempty = vec![0i32; depth as usize + 1];
        for d in 0..=depth as usize {
            for child in self.children[d].iter().rev() {
                if !is_leaf(*child) {
                    node_num_nempty[d] = child + 1;
                    break;
                }
            }
        }

        self.info.set_node_num(&node_num);
        self.info.set_node_num_nempty(&node_num_nempty);
        self.info.set_node_num_cum();
        self.info.set_ptr_dis();
    }

    /// Fill the coverage map: `dnum[d][i]` leaf-level slots covered by the
    /// subtree under node `i`, `didx[d][i]` the first covered slot.
    pub(crate) fn covered_depth_nodes(&mut self) {
        let depth = self.info.depth() as usize;

        for d in 0..=depth {
            let nnum = self.info.node_num(d as i32) as usize;
            self.dnum[d] = vec![0; nnum];
            self.didx[d] = vec![-1; nnum];
        }

        let nnum = self.info.node_num(depth as i32) as usize;
        for i in 0..nnum {
            self.dnum[depth][i] = 1;
            self.didx[depth][i] = i as i32;
        }
        if depth == 0 {
            return;
        }

        let nnum = self.info.node_num(depth as i32 - 1) as usize;
        for i in 0..nnum {
            let t = self.children[depth - 1][i];
            if is_leaf(t) {
                continue;
            }
            self.dnum[depth - 1][i] = 8;
            self.didx[depth - 1][i] = t * 8;
        }

        for d in (0..depth.saturating_sub(1)).rev() {
            let nnum = self.info.node_num(d as i32) as usize;
            for i in 0..nnum {
                let t = self.children[d][i];
                if is_leaf(t) {
                    continue;
                }
                let t = (t * 8) as usize;
                let mut covered = 0;
                let mut first = -1;
                for j in 0..8 {
                    covered += self.dnum[d + 1][t + j];
                    if first == -1 {
                        first = self.didx[d + 1][t + j];
                    }
                }
                self.dnum[d][i] = covered;
                self.didx[d][i] = first;
            }
        }
    }
}
