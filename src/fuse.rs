//! Mode fusion for the transposition iteration space.
//!
//! Consecutive modes that are contiguous in both the input and the output
//! walk memory exactly like a single, longer mode, so they are merged before
//! planning. Size-1 modes contribute nothing to iteration and are dropped.

/// Bilateral mode fusion over `src` + `dst` stride patterns.
///
/// Modes `i` and `i+1` merge when BOTH strides continue the previous fused
/// mode contiguously. Returns the fused `(dims, src_strides, dst_strides)`.
pub fn fuse_dims_bilateral(
    dims: &[usize],
    src_strides: &[isize],
    dst_strides: &[isize],
) -> (Vec<usize>, Vec<isize>, Vec<isize>) {
    let n = dims.len();
    if n <= 1 {
        return (dims.to_vec(), src_strides.to_vec(), dst_strides.to_vec());
    }

    let mut fused_dims = Vec::with_capacity(n);
    let mut fused_src = Vec::with_capacity(n);
    let mut fused_dst = Vec::with_capacity(n);

    fused_dims.push(dims[0]);
    fused_src.push(src_strides[0]);
    fused_dst.push(dst_strides[0]);

    for i in 1..n {
        let last = fused_dims.len() - 1;
        let d_prev = fused_dims[last] as isize;

        let src_contiguous = src_strides[i] == fused_src[last] * d_prev;
        let dst_contiguous = dst_strides[i] == fused_dst[last] * d_prev;

        if src_contiguous && dst_contiguous {
            fused_dims[last] *= dims[i];
        } else {
            fused_dims.push(dims[i]);
            fused_src.push(src_strides[i]);
            fused_dst.push(dst_strides[i]);
        }
    }

    (fused_dims, fused_src, fused_dst)
}

/// Drop size-1 modes, keeping a single trivial mode when nothing else is left.
pub fn drop_unit_dims(
    dims: &[usize],
    src_strides: &[isize],
    dst_strides: &[isize],
) -> (Vec<usize>, Vec<isize>, Vec<isize>) {
    let kept: Vec<usize> = (0..dims.len()).filter(|&i| dims[i] != 1).collect();
    if kept.is_empty() {
        return (vec![1], vec![src_strides[0]], vec![dst_strides[0]]);
    }
    (
        kept.iter().map(|&i| dims[i]).collect(),
        kept.iter().map(|&i| src_strides[i]).collect(),
        kept.iter().map(|&i| dst_strides[i]).collect(),
    )
}
