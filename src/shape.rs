//! Shape Descriptor: validated description of a transposition's layouts.
//!
//! A descriptor records, for both buffers, the logical extents, the physical
//! (leading-dimension) extents of the surrounding allocation, per-mode base
//! offsets and the innermost stride. Whatever order the caller declared, it
//! also carries a canonical column-major form (first mode fastest) so that
//! the planner never has to special-case layout.

use crate::error::{Operand, Result, TransposeError};

/// Mode numbering convention of the caller's arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutOrder {
    /// First mode varies fastest.
    #[default]
    ColumnMajor,
    /// Last mode varies fastest.
    RowMajor,
}

/// Column-major normalized layout of both operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalLayout {
    /// Logical input extents.
    pub extents: Vec<usize>,
    /// `permutation[k]` is the input mode that output mode `k` reads.
    pub permutation: Vec<usize>,
    /// `output_extents[k] == extents[permutation[k]]`.
    pub output_extents: Vec<usize>,
    /// Element strides of the input modes.
    pub input_strides: Vec<isize>,
    /// Element strides of the output modes.
    pub output_strides: Vec<isize>,
    /// Element offset of the first logical input element.
    pub input_base: usize,
    /// Element offset of the first logical output element.
    pub output_base: usize,
    /// Minimum input buffer length.
    pub input_span: usize,
    /// Minimum output buffer length.
    pub output_span: usize,
}

/// Immutable, validated description of a transposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeDescriptor {
    layout: LayoutOrder,
    extents: Vec<usize>,
    permutation: Vec<usize>,
    output_extents: Vec<usize>,
    input_physical: Vec<usize>,
    output_physical: Vec<usize>,
    input_offsets: Vec<usize>,
    output_offsets: Vec<usize>,
    input_inner_stride: usize,
    output_inner_stride: usize,
    canonical: CanonicalLayout,
}

/// Builder for [`ShapeDescriptor`].
///
/// Only the input extents and the permutation are required. Physical extents
/// default to the logical ones (dense buffers), offsets to zero and inner
/// strides to one.
#[derive(Debug, Clone, Default)]
pub struct ShapeBuilder {
    extents: Vec<usize>,
    permutation: Vec<usize>,
    input_physical: Option<Vec<usize>>,
    output_physical: Option<Vec<usize>>,
    input_offsets: Option<Vec<usize>>,
    output_offsets: Option<Vec<usize>>,
    input_inner_stride: Option<usize>,
    output_inner_stride: Option<usize>,
    layout: LayoutOrder,
}

impl ShapeBuilder {
    pub fn new(extents: &[usize], permutation: &[usize]) -> Self {
        Self {
            extents: extents.to_vec(),
            permutation: permutation.to_vec(),
            ..Self::default()
        }
    }

    /// Leading-dimension extents of the input allocation.
    pub fn input_physical_extents(mut self, physical: &[usize]) -> Self {
        self.input_physical = Some(physical.to_vec());
        self
    }

    /// Leading-dimension extents of the output allocation, in output mode order.
    pub fn output_physical_extents(mut self, physical: &[usize]) -> Self {
        self.output_physical = Some(physical.to_vec());
        self
    }

    pub fn input_offsets(mut self, offsets: &[usize]) -> Self {
        self.input_offsets = Some(offsets.to_vec());
        self
    }

    pub fn output_offsets(mut self, offsets: &[usize]) -> Self {
        self.output_offsets = Some(offsets.to_vec());
        self
    }

    pub fn input_inner_stride(mut self, stride: usize) -> Self {
        self.input_inner_stride = Some(stride);
        self
    }

    pub fn output_inner_stride(mut self, stride: usize) -> Self {
        self.output_inner_stride = Some(stride);
        self
    }

    pub fn layout(mut self, layout: LayoutOrder) -> Self {
        self.layout = layout;
        self
    }

    pub fn build(self) -> Result<ShapeDescriptor> {
        let n = self.extents.len();
        if n == 0 {
            return Err(TransposeError::InvalidModeCount(0));
        }
        check_len("permutation", n, self.permutation.len())?;
        validate_permutation(&self.permutation)?;
        if let Some(mode) = self.extents.iter().position(|&e| e == 0) {
            return Err(TransposeError::ZeroExtent { mode });
        }

        let output_extents: Vec<usize> = self.permutation.iter().map(|&p| self.extents[p]).collect();

        let input_physical = self.input_physical.unwrap_or_else(|| self.extents.clone());
        let output_physical = self.output_physical.unwrap_or_else(|| output_extents.clone());
        let input_offsets = self.input_offsets.unwrap_or_else(|| vec![0; n]);
        let output_offsets = self.output_offsets.unwrap_or_else(|| vec![0; n]);
        check_len("input physical extents", n, input_physical.len())?;
        check_len("output physical extents", n, output_physical.len())?;
        check_len("input offsets", n, input_offsets.len())?;
        check_len("output offsets", n, output_offsets.len())?;

        let input_inner_stride = self.input_inner_stride.unwrap_or(1);
        let output_inner_stride = self.output_inner_stride.unwrap_or(1);
        if input_inner_stride == 0 {
            return Err(TransposeError::ZeroInnerStride {
                operand: Operand::Input,
            });
        }
        if output_inner_stride == 0 {
            return Err(TransposeError::ZeroInnerStride {
                operand: Operand::Output,
            });
        }

        check_fits(Operand::Input, &self.extents, &input_physical, &input_offsets)?;
        check_fits(Operand::Output, &output_extents, &output_physical, &output_offsets)?;

        let canonical = canonicalize(
            self.layout,
            &self.extents,
            &self.permutation,
            &input_physical,
            &output_physical,
            &input_offsets,
            &output_offsets,
            input_inner_stride,
            output_inner_stride,
        )?;

        Ok(ShapeDescriptor {
            layout: self.layout,
            extents: self.extents,
            permutation: self.permutation,
            output_extents,
            input_physical,
            output_physical,
            input_offsets,
            output_offsets,
            input_inner_stride,
            output_inner_stride,
            canonical,
        })
    }
}

impl ShapeDescriptor {
    pub fn builder(extents: &[usize], permutation: &[usize]) -> ShapeBuilder {
        ShapeBuilder::new(extents, permutation)
    }

    /// Dense descriptor with default offsets and strides.
    pub fn dense(extents: &[usize], permutation: &[usize], layout: LayoutOrder) -> Result<Self> {
        ShapeBuilder::new(extents, permutation).layout(layout).build()
    }

    pub fn mode_count(&self) -> usize {
        self.extents.len()
    }

    pub fn layout(&self) -> LayoutOrder {
        self.layout
    }

    /// Logical input extents, in declared order.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Logical output extents, in declared order.
    pub fn output_extents(&self) -> &[usize] {
        &self.output_extents
    }

    pub fn input_physical_extents(&self) -> &[usize] {
        &self.input_physical
    }

    pub fn output_physical_extents(&self) -> &[usize] {
        &self.output_physical
    }

    pub fn input_offsets(&self) -> &[usize] {
        &self.input_offsets
    }

    pub fn output_offsets(&self) -> &[usize] {
        &self.output_offsets
    }

    pub fn input_inner_stride(&self) -> usize {
        self.input_inner_stride
    }

    pub fn output_inner_stride(&self) -> usize {
        self.output_inner_stride
    }

    /// Total number of logical elements.
    pub fn len(&self) -> usize {
        self.extents.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn canonical(&self) -> &CanonicalLayout {
        &self.canonical
    }

    /// Inverse descriptor: transposes the output of `self` back into a buffer
    /// laid out like the input. Physical extents, offsets and inner strides
    /// swap sides.
    pub fn inverse(&self) -> Result<Self> {
        let mut inverse = vec![0; self.permutation.len()];
        for (k, &p) in self.permutation.iter().enumerate() {
            inverse[p] = k;
        }
        ShapeBuilder::new(&self.output_extents, &inverse)
            .input_physical_extents(&self.output_physical)
            .input_offsets(&self.output_offsets)
            .input_inner_stride(self.output_inner_stride)
            .output_physical_extents(&self.input_physical)
            .output_offsets(&self.input_offsets)
            .output_inner_stride(self.input_inner_stride)
            .layout(self.layout)
            .build()
    }
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(TransposeError::LengthMismatch {
            what,
            expected,
            got,
        });
    }
    Ok(())
}

fn validate_permutation(perm: &[usize]) -> Result<()> {
    let mut seen = vec![false; perm.len()];
    for &p in perm {
        if p >= perm.len() || seen[p] {
            return Err(TransposeError::InvalidPermutation(perm.to_vec()));
        }
        seen[p] = true;
    }
    Ok(())
}

fn check_fits(operand: Operand, extents: &[usize], physical: &[usize], offsets: &[usize]) -> Result<()> {
    for (mode, ((&extent, &phys), &offset)) in
        extents.iter().zip(physical).zip(offsets).enumerate()
    {
        if phys == 0 {
            return Err(TransposeError::ZeroPhysicalExtent { operand, mode });
        }
        if offset.checked_add(extent).map_or(true, |end| end > phys) {
            return Err(TransposeError::ExceedsPhysicalExtent {
                operand,
                mode,
                extent,
                offset,
                physical: phys,
            });
        }
    }
    Ok(())
}

/// Column-major strides over a padded allocation, scaled by the inner stride.
fn padded_strides(operand: Operand, physical: &[usize], inner: usize) -> Result<Vec<isize>> {
    let overflow = || TransposeError::OffsetOverflow { operand };
    let mut strides = Vec::with_capacity(physical.len());
    let mut acc = isize::try_from(inner).map_err(|_| overflow())?;
    for &p in physical {
        strides.push(acc);
        let p = isize::try_from(p).map_err(|_| overflow())?;
        // The product past the last mode is never used as a stride.
        acc = acc.checked_mul(p).unwrap_or(isize::MAX);
    }
    Ok(strides)
}

/// Returns `(base, span)`: first addressed element and required buffer length.
fn base_and_span(
    operand: Operand,
    extents: &[usize],
    strides: &[isize],
    offsets: &[usize],
) -> Result<(usize, usize)> {
    let overflow = || TransposeError::OffsetOverflow { operand };
    let mut base = 0usize;
    let mut last = 0usize;
    for ((&e, &s), &o) in extents.iter().zip(strides).zip(offsets) {
        let s = s as usize;
        base = o
            .checked_mul(s)
            .and_then(|v| base.checked_add(v))
            .ok_or_else(overflow)?;
        last = (e - 1)
            .checked_mul(s)
            .and_then(|v| last.checked_add(v))
            .ok_or_else(overflow)?;
    }
    let span = base
        .checked_add(last)
        .and_then(|v| v.checked_add(1))
        .filter(|&v| v <= isize::MAX as usize)
        .ok_or_else(overflow)?;
    Ok((base, span))
}

#[allow(clippy::too_many_arguments)]
fn canonicalize(
    layout: LayoutOrder,
    extents: &[usize],
    permutation: &[usize],
    input_physical: &[usize],
    output_physical: &[usize],
    input_offsets: &[usize],
    output_offsets: &[usize],
    input_inner: usize,
    output_inner: usize,
) -> Result<CanonicalLayout> {
    let n = extents.len();
    let rev = |v: &[usize]| -> Vec<usize> { v.iter().rev().copied().collect() };

    let (extents, permutation, in_phys, out_phys, in_off, out_off) = match layout {
        LayoutOrder::ColumnMajor => (
            extents.to_vec(),
            permutation.to_vec(),
            input_physical.to_vec(),
            output_physical.to_vec(),
            input_offsets.to_vec(),
            output_offsets.to_vec(),
        ),
        // Reversing the mode numbering turns row-major into column-major;
        // output mode n-1-k then reads input mode n-1-perm[k].
        LayoutOrder::RowMajor => (
            rev(extents),
            (0..n).map(|k| n - 1 - permutation[n - 1 - k]).collect(),
            rev(input_physical),
            rev(output_physical),
            rev(input_offsets),
            rev(output_offsets),
        ),
    };

    let output_extents: Vec<usize> = permutation.iter().map(|&p| extents[p]).collect();
    let input_strides = padded_strides(Operand::Input, &in_phys, input_inner)?;
    let output_strides = padded_strides(Operand::Output, &out_phys, output_inner)?;
    let (input_base, input_span) = base_and_span(Operand::Input, &extents, &input_strides, &in_off)?;
    let (output_base, output_span) =
        base_and_span(Operand::Output, &output_extents, &output_strides, &out_off)?;

    Ok(CanonicalLayout {
        extents,
        permutation,
        output_extents,
        input_strides,
        output_strides,
        input_base,
        output_base,
        input_span,
        output_span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Problem;

    #[test]
    fn test_dense_column_major() {
        let shape = ShapeDescriptor::dense(&[2, 3, 4], &[2, 0, 1], LayoutOrder::ColumnMajor).unwrap();
        assert_eq!(shape.output_extents(), &[4, 2, 3]);
        let c = shape.canonical();
        assert_eq!(c.input_strides, vec![1, 2, 6]);
        assert_eq!(c.output_strides, vec![1, 4, 8]);
        assert_eq!(c.input_span, 24);
        assert_eq!(c.output_span, 24);
        assert_eq!(c.input_base, 0);
    }

    #[test]
    fn test_row_major_canonicalization() {
        let shape = ShapeDescriptor::dense(&[2, 3, 4], &[2, 0, 1], LayoutOrder::RowMajor).unwrap();
        assert_eq!(shape.output_extents(), &[4, 2, 3]);
        let c = shape.canonical();
        assert_eq!(c.extents, vec![4, 3, 2]);
        assert_eq!(c.permutation, vec![1, 2, 0]);
        assert_eq!(c.output_extents, vec![3, 2, 4]);
    }

    #[test]
    fn test_padded_offsets_and_inner_stride() {
        let shape = ShapeDescriptor::builder(&[2, 3], &[1, 0])
            .input_physical_extents(&[4, 5])
            .input_offsets(&[1, 2])
            .input_inner_stride(2)
            .build()
            .unwrap();
        let c = shape.canonical();
        assert_eq!(c.input_strides, vec![2, 8]);
        assert_eq!(c.input_base, 2 + 16);
        // last element at base + 1*2 + 2*8
        assert_eq!(c.input_span, 18 + 2 + 16 + 1);
    }

    #[test]
    fn test_rejects_invalid_configurations() {
        assert!(matches!(
            ShapeBuilder::new(&[], &[]).build(),
            Err(TransposeError::InvalidModeCount(0))
        ));
        assert!(matches!(
            ShapeBuilder::new(&[2, 3], &[0, 0]).build(),
            Err(TransposeError::InvalidPermutation(_))
        ));
        assert!(matches!(
            ShapeBuilder::new(&[2, 3], &[0, 2]).build(),
            Err(TransposeError::InvalidPermutation(_))
        ));
        assert!(matches!(
            ShapeBuilder::new(&[2, 0], &[1, 0]).build(),
            Err(TransposeError::ZeroExtent { mode: 1 })
        ));
        assert!(matches!(
            ShapeBuilder::new(&[2, 3], &[1, 0, 2]).build(),
            Err(TransposeError::LengthMismatch { .. })
        ));
        assert!(matches!(
            ShapeBuilder::new(&[2, 3], &[1, 0]).input_inner_stride(0).build(),
            Err(TransposeError::ZeroInnerStride { operand: Operand::Input })
        ));
        assert!(matches!(
            ShapeBuilder::new(&[2, 3], &[1, 0])
                .output_physical_extents(&[3, 0])
                .build(),
            Err(TransposeError::ZeroPhysicalExtent { operand: Operand::Output, mode: 1 })
        ));
        assert!(matches!(
            ShapeBuilder::new(&[2, 3], &[1, 0])
                .input_physical_extents(&[2, 3])
                .input_offsets(&[1, 0])
                .build(),
            Err(TransposeError::ExceedsPhysicalExtent { .. })
        ));
    }

    #[test]
    fn test_inverse() {
        let shape = ShapeDescriptor::dense(&[2, 3, 4], &[2, 0, 1], LayoutOrder::RowMajor).unwrap();
        let inv = shape.inverse().unwrap();
        assert_eq!(inv.extents(), &[4, 2, 3]);
        assert_eq!(inv.permutation(), &[1, 2, 0]);
        assert_eq!(inv.output_extents(), &[2, 3, 4]);
    }

    #[test]
    fn test_inverse_keeps_padded_layout() {
        let shape = ShapeBuilder::new(&[3, 4], &[1, 0])
            .input_physical_extents(&[5, 6])
            .input_offsets(&[1, 1])
            .input_inner_stride(2)
            .output_physical_extents(&[6, 4])
            .output_offsets(&[2, 0])
            .output_inner_stride(3)
            .build()
            .unwrap();
        let inv = shape.inverse().unwrap();
        assert_eq!(inv.extents(), &[4, 3]);
        assert_eq!(inv.input_physical_extents(), &[6, 4]);
        assert_eq!(inv.input_offsets(), &[2, 0]);
        assert_eq!(inv.input_inner_stride(), 3);
        assert_eq!(inv.output_physical_extents(), &[5, 6]);
        assert_eq!(inv.output_offsets(), &[1, 1]);
        assert_eq!(inv.output_inner_stride(), 2);
        let (fwd, back) = (Problem::from_shape(&shape), Problem::from_shape(&inv));
        assert_eq!((back.src_base, back.src_span), (fwd.dst_base, fwd.dst_span));
        assert_eq!((back.dst_base, back.dst_span), (fwd.src_base, fwd.src_span));
    }
}
