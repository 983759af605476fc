//! Element kinds supported by the transposition engine.
//!
//! The engine is generic over a small capability set (add, multiply,
//! conjugate, zero, one) rather than duplicated per kind. Only the four
//! BLAS kinds implement it: `f32`, `f64`, `Complex32` and `Complex64`.

use num_complex::{Complex32, Complex64};
use std::fmt::Debug;

mod sealed {
    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for num_complex::Complex32 {}
    impl Sealed for num_complex::Complex64 {}
}

/// Runtime tag for the numeric kind of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    F32,
    F64,
    C32,
    C64,
}

/// Width of the register file the micro-kernels are sized for.
const REGISTER_BITS: usize = 256;

/// Scalar capability set used by every kernel.
pub trait TransposeScalar:
    sealed::Sealed
    + Copy
    + Send
    + Sync
    + Debug
    + PartialEq
    + std::ops::Add<Output = Self>
    + std::ops::Mul<Output = Self>
    + num_traits::Zero
    + num_traits::One
    + 'static
{
    const KIND: ElementKind;

    /// Side length of the square micro-tile: one register's worth of elements.
    const MICRO: usize = REGISTER_BITS / 8 / std::mem::size_of::<Self>();

    /// Complex conjugate; identity for real kinds.
    fn conj(self) -> Self;
}

impl TransposeScalar for f32 {
    const KIND: ElementKind = ElementKind::F32;

    #[inline(always)]
    fn conj(self) -> Self {
        self
    }
}

impl TransposeScalar for f64 {
    const KIND: ElementKind = ElementKind::F64;

    #[inline(always)]
    fn conj(self) -> Self {
        self
    }
}

impl TransposeScalar for Complex32 {
    const KIND: ElementKind = ElementKind::C32;

    #[inline(always)]
    fn conj(self) -> Self {
        Complex32::conj(&self)
    }
}

impl TransposeScalar for Complex64 {
    const KIND: ElementKind = ElementKind::C64;

    #[inline(always)]
    fn conj(self) -> Self {
        Complex64::conj(&self)
    }
}

/// Kinds that accept a conjugate-input flag.
pub trait ComplexScalar: TransposeScalar {}

impl ComplexScalar for Complex32 {}
impl ComplexScalar for Complex64 {}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::{One, Zero};

    #[test]
    fn test_micro_widths() {
        assert_eq!(<f64 as TransposeScalar>::MICRO, 4);
        assert_eq!(<f32 as TransposeScalar>::MICRO, 8);
        assert_eq!(<Complex32 as TransposeScalar>::MICRO, 4);
        assert_eq!(<Complex64 as TransposeScalar>::MICRO, 2);
    }

    #[test]
    fn test_conj() {
        assert_eq!(TransposeScalar::conj(3.0f64), 3.0);
        let z = Complex64::new(1.0, -2.0);
        assert_eq!(TransposeScalar::conj(z), Complex64::new(1.0, 2.0));
        assert_eq!(Complex32::zero() + Complex32::one(), Complex32::new(1.0, 0.0));
    }
}
