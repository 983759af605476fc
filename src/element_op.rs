//! Type-level operations applied to each input element before scaling.
//!
//! Resolving conjugation at the type level keeps the branch out of the
//! innermost loops: the executor picks `Identity` or `Conj` once per call.

use crate::scalar::TransposeScalar;

/// An element-wise operation on input values.
pub trait ElementOp: Copy + Send + Sync + 'static {
    /// True when `apply` returns its argument unchanged for every kind.
    const IS_IDENTITY: bool;

    fn apply<T: TransposeScalar>(x: T) -> T;
}

/// Pass input values through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

/// Complex-conjugate input values (identity on real kinds).
#[derive(Debug, Clone, Copy, Default)]
pub struct Conj;

impl ElementOp for Identity {
    const IS_IDENTITY: bool = true;

    #[inline(always)]
    fn apply<T: TransposeScalar>(x: T) -> T {
        x
    }
}

impl ElementOp for Conj {
    const IS_IDENTITY: bool = false;

    #[inline(always)]
    fn apply<T: TransposeScalar>(x: T) -> T {
        x.conj()
    }
}
