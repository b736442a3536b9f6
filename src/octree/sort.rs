//! Key computation, sorting and unique-reduction for the leaf level.

use glam::UVec3;
use rayon::prelude::*;

use super::key;

/// Compute the leaf-level Morton key of every scaled point, sort the keys
/// ascending and return `(sorted_keys, sorted_idx)` where `sorted_idx[j]`
/// is the original input index of the j-th key.
///
/// Keys and indices travel together through the sort packed as
/// `(key << 32) | index`, so the result is deterministic even though the
/// sort itself is unstable.
pub fn sort_keys(pts_scaled: &[f32], depth: i32) -> (Vec<u32>, Vec<u32>) {
    let npt = pts_scaled.len() / 3;
    let max_coord = ((1u32 << depth) - 1) as f32;

    let mut codes: Vec<u64> = (0..npt)
        .into_par_iter()
        .map(|i| {
            let cell = UVec3::new(
                pts_scaled[3 * i].floor().clamp(0.0, max_coord) as u32,
                pts_scaled[3 * i + 1].floor().clamp(0.0, max_coord) as u32,
                pts_scaled[3 * i + 2].floor().clamp(0.0, max_coord) as u32,
            );
            ((key::encode(cell, depth) as u64) << 32) | i as u64
        })
        .collect();

    codes.par_sort_unstable();

    let sorted_keys = codes.par_iter().map(|c| (c >> 32) as u32).collect();
    let sorted_idx = codes.par_iter().map(|c| *c as u32).collect();
    (sorted_keys, sorted_idx)
}

/// Collapse runs of identical keys in place and fill `idx` with the start
/// of every run, terminated by a sentinel equal to the input length.
///
/// After the call, `idx[t]..idx[t + 1]` is the range of sorted positions
/// that share the t-th distinct key.
pub fn unique_reduce(keys: &mut Vec<u32>, idx: &mut Vec<u32>) {
    idx.clear();
    idx.push(0);

    let n = keys.len();
    let mut j = 1;
    for i in 1..n {
        if keys[i] != keys[i - 1] {
            idx.push(i as u32);
            keys[j] = keys[i];
            j += 1;
        }
    }

    keys.truncate(if n == 0 { 0 } else { j });
    idx.push(n as u32);
}
