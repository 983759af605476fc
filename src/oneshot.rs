//! Single-shot transposition: build a heuristic plan, execute it, drop it.

use crate::error::Result;
use crate::plan::{PlanOptions, Scaling, TransposePlan};
use crate::scalar::{ComplexScalar, TransposeScalar};
use crate::shape::ShapeDescriptor;

/// `output = alpha * permute(input) + beta * output` in one call.
///
/// When `beta == 0` the prior contents of `output` are never read.
pub fn transpose<T: TransposeScalar>(
    shape: &ShapeDescriptor,
    alpha: T,
    input: &[T],
    beta: T,
    output: &mut [T],
    num_threads: usize,
) -> Result<()> {
    run(shape, Scaling::new(alpha, beta), input, output, num_threads)
}

/// Like [`transpose`], optionally conjugating the input first.
pub fn transpose_conj<T: ComplexScalar>(
    shape: &ShapeDescriptor,
    alpha: T,
    input: &[T],
    beta: T,
    output: &mut [T],
    conj: bool,
    num_threads: usize,
) -> Result<()> {
    run(shape, Scaling::new(alpha, beta).with_conj_input(conj), input, output, num_threads)
}

fn run<T: TransposeScalar>(
    shape: &ShapeDescriptor,
    scaling: Scaling<T>,
    input: &[T],
    output: &mut [T],
    num_threads: usize,
) -> Result<()> {
    let options = PlanOptions::default().num_threads(num_threads);
    TransposePlan::new(shape.clone(), scaling, options, input, output)?.execute()
}
