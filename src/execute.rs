//! Parallel executor: walks an [`ExecutionStrategy`] over bound buffers.
//!
//! The update rule is resolved once per call from the scaling parameters and
//! monomorphized into the loop nest. Each worker owns a disjoint block of
//! iterations (see [`ThreadPartition::ranges_for`]), so workers never write
//! the same output element.
//!
//! [`ThreadPartition::ranges_for`]: crate::ThreadPartition::ranges_for

use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::element_op::{Conj, Identity};
use crate::error::{Operand, Result, TransposeError};
use crate::kernel::macro_kernel::{tile_micro, tile_strided};
use crate::kernel::run::{run_contiguous, run_strided};
use crate::kernel::{Accumulate, Overwrite, Scale, Update};
use crate::plan::{Scaling, UpdateMode};
use crate::pool::{SendPtr, WorkerPool};
use crate::problem::Problem;
use crate::scalar::TransposeScalar;
use crate::strategy::{ExecutionStrategy, KernelVariant, Leaf, LevelRole, LoopLevel};

/// Execute `strategy` once: `output = alpha * op(permute(input)) + beta * output`.
///
/// `strategy` must have passed [`ExecutionStrategy::check`] against `problem`.
pub(crate) fn execute_strategy<T: TransposeScalar>(
    strategy: &ExecutionStrategy,
    problem: &Problem,
    scaling: &Scaling<T>,
    input: &[T],
    output: &mut [T],
    pool: &WorkerPool,
) -> Result<()> {
    debug_assert!(strategy.check(problem).is_ok());
    if input.len() < problem.src_span {
        return Err(TransposeError::BufferTooSmall {
            operand: Operand::Input,
            required: problem.src_span,
            len: input.len(),
        });
    }
    if output.len() < problem.dst_span {
        return Err(TransposeError::BufferTooSmall {
            operand: Operand::Output,
            required: problem.dst_span,
            len: output.len(),
        });
    }

    let (alpha, beta) = (scaling.alpha, scaling.beta);
    match (scaling.update_mode(), scaling.conj_input) {
        (UpdateMode::Overwrite, false) => run(strategy, problem, input, output, pool, Overwrite::<Identity>::new()),
        (UpdateMode::Overwrite, true) => run(strategy, problem, input, output, pool, Overwrite::<Conj>::new()),
        (UpdateMode::Scale, false) => run(strategy, problem, input, output, pool, Scale::<T, Identity>::new(alpha)),
        (UpdateMode::Scale, true) => run(strategy, problem, input, output, pool, Scale::<T, Conj>::new(alpha)),
        (UpdateMode::Accumulate, false) => {
            run(strategy, problem, input, output, pool, Accumulate::<T, Identity>::new(alpha, beta))
        }
        (UpdateMode::Accumulate, true) => {
            run(strategy, problem, input, output, pool, Accumulate::<T, Conj>::new(alpha, beta))
        }
    }
}

fn run<T: TransposeScalar, U: Update<T>>(
    strategy: &ExecutionStrategy,
    problem: &Problem,
    input: &[T],
    output: &mut [T],
    pool: &WorkerPool,
    u: U,
) -> Result<()> {
    // SAFETY: both bases lie inside the buffers (span > base was checked).
    let src = SendPtr(unsafe { input.as_ptr().add(problem.src_base) }.cast_mut());
    let dst = SendPtr(unsafe { output.as_mut_ptr().add(problem.dst_base) });
    let levels = &strategy.levels;
    let workers = strategy.workers();

    let work = |worker: usize| {
        let ranges = strategy.partition.ranges_for(levels, worker);
        // SAFETY: the strategy walks every element of the problem exactly
        // once, within the validated spans, and workers own disjoint ranges.
        unsafe {
            walk(levels, &ranges, strategy.leaf, strategy.kernel, src.as_const(), dst.as_ptr(), 1, 1, u);
        }
    };

    if workers == 1 && !pool.is_pinned() {
        return catch_unwind(AssertUnwindSafe(|| work(0))).map_err(worker_failed);
    }

    let threads = pool.threads();
    let outcomes = pool.broadcast(|thread| {
        catch_unwind(AssertUnwindSafe(|| {
            for worker in (thread..workers).step_by(threads) {
                work(worker);
            }
        }))
    });
    for outcome in outcomes {
        outcome.map_err(worker_failed)?;
    }
    Ok(())
}

fn worker_failed(payload: Box<dyn std::any::Any + Send>) -> TransposeError {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    };
    TransposeError::WorkerFailed(msg)
}

/// Recursive loop nest. `a`/`b` carry the current extent of the leaf along
/// the tile (or run) modes, set by the levels that block them.
#[allow(clippy::too_many_arguments)]
unsafe fn walk<T: TransposeScalar, U: Update<T>>(
    levels: &[LoopLevel],
    ranges: &[Range<usize>],
    leaf: Leaf,
    kernel: KernelVariant,
    src: *const T,
    dst: *mut T,
    a: usize,
    b: usize,
    u: U,
) {
    let Some((level, inner)) = levels.split_first() else {
        apply_leaf(leaf, kernel, src, dst, a, b, u);
        return;
    };
    let step = level.step as isize;
    for it in ranges[0].clone() {
        let pos = it as isize * step;
        let s = src.offset(pos * level.src_stride);
        let d = dst.offset(pos * level.dst_stride);
        let span = level.span_at(it);
        let (a, b) = match level.role {
            LevelRole::Outer => (a, b),
            LevelRole::TileA | LevelRole::Run => (span, b),
            LevelRole::TileB => (a, span),
        };
        walk(inner, &ranges[1..], leaf, kernel, s, d, a, b, u);
    }
}

#[inline(always)]
unsafe fn apply_leaf<T: TransposeScalar, U: Update<T>>(
    leaf: Leaf,
    kernel: KernelVariant,
    src: *const T,
    dst: *mut T,
    a: usize,
    b: usize,
    u: U,
) {
    match (kernel, leaf) {
        (KernelVariant::MicroTile, Leaf::Tile { lda, ldb, .. }) => tile_micro(src, lda, a, dst, ldb, b, u),
        (
            KernelVariant::StridedTile,
            Leaf::Tile {
                src_stride_a,
                lda,
                ldb,
                dst_stride_b,
                ..
            },
        ) => tile_strided(src, src_stride_a, lda, a, dst, dst_stride_b, ldb, b, u),
        (KernelVariant::ContiguousRun, Leaf::Run { .. }) => run_contiguous(src, dst, a, u),
        (
            KernelVariant::StridedRun,
            Leaf::Run {
                src_stride,
                dst_stride,
            },
        ) => run_strided(src, dst, a, src_stride, dst_stride, u),
        _ => debug_assert!(false, "{kernel:?} cannot serve {leaf:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{enumerate_candidates, heuristic};
    use crate::shape::{LayoutOrder, ShapeDescriptor};

    fn reference(extents: &[usize], perm: &[usize], input: &[f64]) -> Vec<f64> {
        // column-major dense: output mode k walks input mode perm[k]
        let n = extents.len();
        let out_ext: Vec<usize> = perm.iter().map(|&p| extents[p]).collect();
        let total: usize = extents.iter().product();
        let mut out = vec![0.0; total];
        let mut idx = vec![0usize; n];
        for lin in 0..total {
            let mut r = lin;
            for k in 0..n {
                idx[k] = r % out_ext[k];
                r /= out_ext[k];
            }
            let mut src = 0;
            let mut stride = 1;
            for m in 0..n {
                let k = perm.iter().position(|&p| p == m).unwrap();
                src += idx[k] * stride;
                stride *= extents[m];
            }
            out[lin] = input[src];
        }
        out
    }

    #[test]
    fn test_every_candidate_matches_reference() {
        let extents = [3, 5, 4, 2];
        let perm = [2, 0, 3, 1];
        let shape = ShapeDescriptor::dense(&extents, &perm, LayoutOrder::ColumnMajor).unwrap();
        let problem = Problem::from_shape(&shape);
        let input: Vec<f64> = (0..shape.len()).map(|i| i as f64).collect();
        let expected = reference(&extents, &perm, &input);
        let pool = WorkerPool::new(3, &[]);
        let scaling = Scaling::new(1.0, 0.0);
        for strategy in enumerate_candidates::<f64>(&problem, 3, Some(60)) {
            let mut out = vec![f64::NAN; shape.len()];
            execute_strategy(&strategy, &problem, &scaling, &input, &mut out, &pool).unwrap();
            assert_eq!(out, expected, "{strategy:?}");
        }
    }

    #[test]
    fn test_accumulate() {
        let shape = ShapeDescriptor::dense(&[4, 6], &[1, 0], LayoutOrder::ColumnMajor).unwrap();
        let problem = Problem::from_shape(&shape);
        let input: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let mut out = vec![1.0; 24];
        let pool = WorkerPool::new(1, &[]);
        let strategy = heuristic::<f64>(&problem, 1);
        execute_strategy(&strategy, &problem, &Scaling::new(2.0, 3.0), &input, &mut out, &pool).unwrap();
        let expected = reference(&[4, 6], &[1, 0], &input);
        for (o, e) in out.iter().zip(&expected) {
            assert_eq!(*o, 2.0 * e + 3.0);
        }
    }

    #[test]
    fn test_short_buffers_are_rejected() {
        let shape = ShapeDescriptor::dense(&[4, 6], &[1, 0], LayoutOrder::ColumnMajor).unwrap();
        let problem = Problem::from_shape(&shape);
        let strategy = heuristic::<f64>(&problem, 1);
        let pool = WorkerPool::new(1, &[]);
        let input = vec![0.0; 23];
        let mut out = vec![0.0; 24];
        let err = execute_strategy(&strategy, &problem, &Scaling::new(1.0, 0.0), &input, &mut out, &pool)
            .unwrap_err();
        assert!(matches!(
            err,
            TransposeError::BufferTooSmall {
                operand: Operand::Input,
                ..
            }
        ));
    }
}
