//! Run kernels: the leaf when one mode is fastest in both operands.

use crate::kernel::Update;
use crate::scalar::TransposeScalar;

/// Unit-stride run; the update's `apply_run` is written over slices so the
/// loop vectorizes (and degenerates to `memcpy` for plain copies).
///
/// # Safety
/// `src[..count]` readable, `dst[..count]` writable, no overlap.
#[inline(always)]
pub unsafe fn run_contiguous<T: TransposeScalar, U: Update<T>>(
    src: *const T,
    dst: *mut T,
    count: usize,
    u: U,
) {
    u.apply_run(src, dst, count);
}

/// Element-wise strided run.
///
/// # Safety
/// `src`/`dst` must be valid for `count` elements at the given strides.
#[inline(always)]
pub unsafe fn run_strided<T: TransposeScalar, U: Update<T>>(
    src: *const T,
    dst: *mut T,
    count: usize,
    src_stride: isize,
    dst_stride: isize,
    u: U,
) {
    let mut s = src;
    let mut d = dst;
    if dst_stride == 1 {
        for _ in 0..count {
            u.apply(s, d);
            s = s.offset(src_stride);
            d = d.add(1);
        }
    } else if src_stride == 1 {
        for _ in 0..count {
            u.apply(s, d);
            s = s.add(1);
            d = d.offset(dst_stride);
        }
    } else {
        for _ in 0..count {
            u.apply(s, d);
            s = s.offset(src_stride);
            d = d.offset(dst_stride);
        }
    }
}
