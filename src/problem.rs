//! The fused iteration space of a transposition.
//!
//! Iteration runs over the output modes. For output mode `k` the source
//! stride is the input stride of mode `perm[k]`; after bilateral fusion and
//! dropping unit modes, every strategy is expressed in terms of this space.

use crate::fuse::{drop_unit_dims, fuse_dims_bilateral};
use crate::shape::ShapeDescriptor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Fused extents (never empty).
    pub dims: Vec<usize>,
    /// Fused input strides.
    pub src_strides: Vec<isize>,
    /// Fused output strides.
    pub dst_strides: Vec<isize>,
    /// Element offset of the first input element.
    pub src_base: usize,
    /// Element offset of the first output element.
    pub dst_base: usize,
    /// Input elements addressed, counted from the buffer start.
    pub src_span: usize,
    /// Output elements addressed, counted from the buffer start.
    pub dst_span: usize,
    /// Total number of elements moved.
    pub len: usize,
}

impl Problem {
    pub fn from_shape(shape: &ShapeDescriptor) -> Self {
        let c = shape.canonical();
        let src: Vec<isize> = c.permutation.iter().map(|&p| c.input_strides[p]).collect();
        let (dims, src, dst) = fuse_dims_bilateral(&c.output_extents, &src, &c.output_strides);
        let (dims, src_strides, dst_strides) = drop_unit_dims(&dims, &src, &dst);
        let len = dims.iter().product();
        Problem {
            dims,
            src_strides,
            dst_strides,
            src_base: c.input_base,
            dst_base: c.output_base,
            src_span: c.input_span,
            dst_span: c.output_span,
            len,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Mode with the smallest input stride.
    pub fn src_fast_dim(&self) -> usize {
        find_stride1_dim(&self.dims, &self.src_strides)
    }

    /// Mode with the smallest output stride.
    pub fn dst_fast_dim(&self) -> usize {
        find_stride1_dim(&self.dims, &self.dst_strides)
    }
}

/// Find the mode with the smallest absolute stride among non-trivial modes.
pub(crate) fn find_stride1_dim(dims: &[usize], strides: &[isize]) -> usize {
    dims.iter()
        .zip(strides.iter())
        .enumerate()
        .filter(|(_, (&d, _))| d > 1)
        .min_by_key(|(_, (_, &s))| s.unsigned_abs())
        .map(|(i, _)| i)
        .unwrap_or(0)
}
