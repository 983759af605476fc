//! Macro-kernel: processes one `block_a × block_b` tile.
//!
//! The tile spans the input-fast mode `a` and the output-fast mode `b`.
//! Element `(i, j)` is read at `src + i*sa + j*lda` and written at
//! `dst + j*sb + i*ldb`. With unit `sa`/`sb` the tile is cut into a grid
//! of micro-kernel calls plus element-wise edges.

use crate::kernel::micro_kernel::{MicroKernel, ScalarKernel};
use crate::kernel::Update;
use crate::scalar::TransposeScalar;

/// Tile with unit fast strides, using micro-kernels for full sub-tiles.
///
/// # Safety
/// `src`/`dst` must be valid for the given block sizes and strides.
#[inline]
pub unsafe fn tile_micro<T: TransposeScalar, U: Update<T>>(
    src: *const T,
    lda: isize,
    block_a: usize,
    dst: *mut T,
    ldb: isize,
    block_b: usize,
    u: U,
) {
    let micro = <ScalarKernel as MicroKernel<T>>::MICRO;

    let full_a = block_a / micro;
    let rem_a = block_a % micro;
    let full_b = block_b / micro;
    let rem_b = block_b % micro;
    let m = micro as isize;

    for jb in 0..full_b {
        let j = jb as isize * m;
        for ia in 0..full_a {
            let i = ia as isize * m;
            ScalarKernel::transpose_micro(src.offset(i + j * lda), lda, dst.offset(j + i * ldb), ldb, u);
        }
        // right edge along a
        if rem_a > 0 {
            let i = full_a as isize * m;
            edge(src.offset(i + j * lda), lda, rem_a, dst.offset(j + i * ldb), ldb, micro, u);
        }
    }

    // bottom edge along b, including the corner
    if rem_b > 0 {
        let j = full_b as isize * m;
        edge(src.offset(j * lda), lda, block_a, dst.offset(j), ldb, rem_b, u);
    }
}

#[inline(always)]
unsafe fn edge<T: TransposeScalar, U: Update<T>>(
    src: *const T,
    lda: isize,
    len_a: usize,
    dst: *mut T,
    ldb: isize,
    len_b: usize,
    u: U,
) {
    for i in 0..len_a as isize {
        for j in 0..len_b as isize {
            u.apply(src.offset(i + j * lda), dst.offset(j + i * ldb));
        }
    }
}

/// Element-wise tile with arbitrary strides on every side.
///
/// # Safety
/// `src`/`dst` must be valid for the given block sizes and strides.
#[allow(clippy::too_many_arguments)]
#[inline]
pub unsafe fn tile_strided<T: TransposeScalar, U: Update<T>>(
    src: *const T,
    sa: isize,
    lda: isize,
    block_a: usize,
    dst: *mut T,
    sb: isize,
    ldb: isize,
    block_b: usize,
    u: U,
) {
    for i in 0..block_a as isize {
        let s = src.offset(i * sa);
        let d = dst.offset(i * ldb);
        for j in 0..block_b as isize {
            u.apply(s.offset(j * lda), d.offset(j * sb));
        }
    }
}
