//! Leaf kernels and the scaled-update operators they apply.
//!
//! Every kernel writes `dst = alpha * op(src) + beta * dst` through an
//! [`Update`] chosen once per execution, so the arithmetic is identical no
//! matter which kernel, blocking or thread partition moves the element.

pub(crate) mod macro_kernel;
pub(crate) mod micro_kernel;
pub(crate) mod run;

use std::marker::PhantomData;

use crate::element_op::ElementOp;
use crate::scalar::TransposeScalar;

/// Per-element write rule.
pub trait Update<T: TransposeScalar>: Copy + Send + Sync {
    /// Whether the prior output value is read. Write-only updates never
    /// touch uninitialized output memory.
    const READS_OUTPUT: bool;

    /// # Safety
    /// `src` must be readable and `dst` writable (and readable when
    /// `READS_OUTPUT`).
    unsafe fn apply(self, src: *const T, dst: *mut T);

    /// Apply to `count` consecutive elements.
    ///
    /// # Safety
    /// `src[..count]` readable, `dst[..count]` writable, no overlap.
    #[inline(always)]
    unsafe fn apply_run(self, src: *const T, dst: *mut T, count: usize) {
        let s = std::slice::from_raw_parts(src, count);
        let d = std::slice::from_raw_parts_mut(dst, count);
        for (d, s) in d.iter_mut().zip(s) {
            self.apply(s, d);
        }
    }
}

/// `dst = op(src)`: used when `alpha == 1` and `beta == 0`.
#[derive(Debug)]
pub struct Overwrite<Op>(PhantomData<Op>);

/// `dst = alpha * op(src)`: used when `beta == 0`.
#[derive(Debug)]
pub struct Scale<T, Op> {
    alpha: T,
    _op: PhantomData<Op>,
}

/// `dst = alpha * op(src) + beta * dst`.
#[derive(Debug)]
pub struct Accumulate<T, Op> {
    alpha: T,
    beta: T,
    _op: PhantomData<Op>,
}

impl<Op> Overwrite<Op> {
    pub fn new() -> Self {
        Overwrite(PhantomData)
    }
}

impl<Op> Default for Overwrite<Op> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, Op> Scale<T, Op> {
    pub fn new(alpha: T) -> Self {
        Scale {
            alpha,
            _op: PhantomData,
        }
    }
}

impl<T, Op> Accumulate<T, Op> {
    pub fn new(alpha: T, beta: T) -> Self {
        Accumulate {
            alpha,
            beta,
            _op: PhantomData,
        }
    }
}

// Manual impls: derives would put `Copy` bounds on the phantom parameter.
impl<Op> Clone for Overwrite<Op> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<Op> Copy for Overwrite<Op> {}

impl<T: Copy, Op> Clone for Scale<T, Op> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: Copy, Op> Copy for Scale<T, Op> {}

impl<T: Copy, Op> Clone for Accumulate<T, Op> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: Copy, Op> Copy for Accumulate<T, Op> {}

impl<T: TransposeScalar, Op: ElementOp> Update<T> for Overwrite<Op> {
    const READS_OUTPUT: bool = false;

    #[inline(always)]
    unsafe fn apply(self, src: *const T, dst: *mut T) {
        *dst = Op::apply(*src);
    }

    #[inline(always)]
    unsafe fn apply_run(self, src: *const T, dst: *mut T, count: usize) {
        if Op::IS_IDENTITY {
            std::ptr::copy_nonoverlapping(src, dst, count);
        } else {
            let s = std::slice::from_raw_parts(src, count);
            let d = std::slice::from_raw_parts_mut(dst, count);
            for (d, &s) in d.iter_mut().zip(s) {
                *d = Op::apply(s);
            }
        }
    }
}

impl<T: TransposeScalar, Op: ElementOp> Update<T> for Scale<T, Op> {
    const READS_OUTPUT: bool = false;

    #[inline(always)]
    unsafe fn apply(self, src: *const T, dst: *mut T) {
        *dst = self.alpha * Op::apply(*src);
    }
}

impl<T: TransposeScalar, Op: ElementOp> Update<T> for Accumulate<T, Op> {
    const READS_OUTPUT: bool = true;

    #[inline(always)]
    unsafe fn apply(self, src: *const T, dst: *mut T) {
        *dst = self.alpha * Op::apply(*src) + self.beta * *dst;
    }
}
