//! Micro-kernel: an in-register MICRO × MICRO transpose-and-update.
//!
//! MICRO is one 256-bit register's worth of elements (4 for f64, 8 for f32,
//! 2 for Complex64, 4 for Complex32). The scalar implementation is a fixed
//! trip-count nest that LLVM fully unrolls and vectorizes.

use crate::kernel::Update;
use crate::scalar::TransposeScalar;

pub trait MicroKernel<T: TransposeScalar> {
    /// Micro-tile side length.
    const MICRO: usize;

    /// Transpose-and-update one full MICRO × MICRO tile:
    /// `dst[j + i*ldb] <- src[i + j*lda]` for `i, j in 0..MICRO`.
    ///
    /// # Safety
    /// - `src` readable for MICRO unit-stride elements in MICRO columns of stride `lda`
    /// - `dst` writable for MICRO unit-stride elements in MICRO rows of stride `ldb`
    unsafe fn transpose_micro<U: Update<T>>(src: *const T, lda: isize, dst: *mut T, ldb: isize, u: U);
}

/// Portable (auto-vectorized) micro-kernels.
pub struct ScalarKernel;

impl<T: TransposeScalar> MicroKernel<T> for ScalarKernel {
    const MICRO: usize = T::MICRO;

    #[inline(always)]
    unsafe fn transpose_micro<U: Update<T>>(src: *const T, lda: isize, dst: *mut T, ldb: isize, u: U) {
        let m = <Self as MicroKernel<T>>::MICRO as isize;
        for i in 0..m {
            for j in 0..m {
                u.apply(src.offset(i + j * lda), dst.offset(j + i * ldb));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element_op::Identity;
    use crate::kernel::{Accumulate, Overwrite};

    #[test]
    fn test_f64_4x4() {
        let src: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let mut dst = vec![0.0f64; 16];
        unsafe {
            ScalarKernel::transpose_micro(src.as_ptr(), 4, dst.as_mut_ptr(), 4, Overwrite::<Identity>::new());
        }
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(dst[j + i * 4], src[i + j * 4], "mismatch at i={i}, j={j}");
            }
        }
    }

    #[test]
    fn test_f32_8x8_padded_strides() {
        let lda = 11isize;
        let ldb = 9isize;
        let src: Vec<f32> = (0..8 * 11).map(|i| i as f32).collect();
        let mut dst = vec![1.0f32; 8 * 9];
        unsafe {
            ScalarKernel::transpose_micro(
                src.as_ptr(),
                lda,
                dst.as_mut_ptr(),
                ldb,
                Accumulate::<f32, Identity>::new(2.0, 1.0),
            );
        }
        for i in 0..8 {
            for j in 0..8 {
                let s = src[i + j * lda as usize];
                assert_eq!(dst[j + i * ldb as usize], 2.0 * s + 1.0, "mismatch at i={i}, j={j}");
            }
        }
        // padding columns untouched
        assert_eq!(dst[8], 1.0);
    }
}
