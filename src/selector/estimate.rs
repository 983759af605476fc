//! Fast heuristic strategy selection.
//!
//! Fixed rules, no timing:
//! 1. the leaf works on the input-fast and output-fast modes (a 2D tile when
//!    they differ, a 1D run when they coincide);
//! 2. remaining modes loop outside, largest strides outermost;
//! 3. tiles are `4 × MICRO` per side, roughly an L1-resident working set;
//! 4. threads are dealt to the outermost loops that can absorb them.

use crate::problem::Problem;
use crate::scalar::TransposeScalar;
use crate::strategy::{ExecutionStrategy, KernelVariant, Leaf, LevelRole, LoopLevel, ThreadPartition};
use crate::CACHE_LINE_SIZE;

/// Minimum number of elements to justify multi-threaded execution.
pub(crate) const MIN_PARALLEL_LEN: usize = 1 << 15;

/// Which modes feed the leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeafShape {
    Tile { dim_a: usize, dim_b: usize },
    Run { dim: usize },
}

pub(crate) fn classify(problem: &Problem) -> LeafShape {
    let dim_a = problem.src_fast_dim();
    let dim_b = problem.dst_fast_dim();
    if dim_a == dim_b {
        LeafShape::Run { dim: dim_a }
    } else {
        LeafShape::Tile { dim_a, dim_b }
    }
}

pub(crate) fn leaf_for<T: TransposeScalar>(problem: &Problem, shape: LeafShape) -> Leaf {
    match shape {
        LeafShape::Tile { dim_a, dim_b } => Leaf::Tile {
            src_stride_a: problem.src_strides[dim_a],
            lda: problem.src_strides[dim_b],
            ldb: problem.dst_strides[dim_a],
            dst_stride_b: problem.dst_strides[dim_b],
            micro: T::MICRO,
        },
        LeafShape::Run { dim } => Leaf::Run {
            src_stride: problem.src_strides[dim],
            dst_stride: problem.dst_strides[dim],
        },
    }
}

/// Kernels able to serve `leaf`, preferred first.
pub(crate) fn kernels_for(leaf: Leaf) -> Vec<KernelVariant> {
    match leaf {
        Leaf::Tile {
            src_stride_a: 1,
            dst_stride_b: 1,
            ..
        } => vec![KernelVariant::MicroTile, KernelVariant::StridedTile],
        Leaf::Tile { .. } => vec![KernelVariant::StridedTile],
        Leaf::Run {
            src_stride: 1,
            dst_stride: 1,
        } => vec![KernelVariant::ContiguousRun, KernelVariant::StridedRun],
        Leaf::Run { .. } => vec![KernelVariant::StridedRun],
    }
}

/// Default tile side for an element kind.
pub(crate) fn tile_block<T: TransposeScalar>() -> usize {
    T::MICRO * 4
}

/// Loop order as `(mode, role)`, outermost first.
pub(crate) fn heuristic_order(problem: &Problem, shape: LeafShape) -> Vec<(usize, LevelRole)> {
    let dims = &problem.dims;
    let src = &problem.src_strides;
    let dst = &problem.dst_strides;
    match shape {
        LeafShape::Tile { dim_a, dim_b } => {
            let mut order: Vec<usize> = (0..dims.len()).filter(|&d| d != dim_a && d != dim_b).collect();
            order.sort_by(|&a, &b| {
                let cost_a = src[a].unsigned_abs() + dst[a].unsigned_abs();
                let cost_b = src[b].unsigned_abs() + dst[b].unsigned_abs();
                cost_b.cmp(&cost_a)
            });
            let mut levels: Vec<(usize, LevelRole)> = order.into_iter().map(|d| (d, LevelRole::Outer)).collect();
            levels.push((dim_b, LevelRole::TileB));
            levels.push((dim_a, LevelRole::TileA));
            levels
        }
        // Largest output stride outermost so consecutive runs land next to
        // each other in the output.
        LeafShape::Run { dim } => {
            let mut order: Vec<usize> = (0..dims.len()).filter(|&d| d != dim).collect();
            order.sort_by(|&a, &b| dst[b].unsigned_abs().cmp(&dst[a].unsigned_abs()));
            let mut levels: Vec<(usize, LevelRole)> = order.into_iter().map(|d| (d, LevelRole::Outer)).collect();
            levels.push((dim, LevelRole::Run));
            levels
        }
    }
}

/// Materialize loop levels for an order, with `block` on tile levels and
/// `run_step` on the run level.
pub(crate) fn make_levels(
    problem: &Problem,
    order: &[(usize, LevelRole)],
    block: usize,
    run_step: usize,
) -> Vec<LoopLevel> {
    order
        .iter()
        .map(|&(dim, role)| {
            let extent = problem.dims[dim];
            let step = match role {
                LevelRole::Outer => 1,
                LevelRole::TileA | LevelRole::TileB => block.min(extent).max(1),
                LevelRole::Run => run_step.min(extent).max(1),
            };
            LoopLevel {
                dim,
                role,
                extent,
                step,
                src_stride: problem.src_strides[dim],
                dst_stride: problem.dst_strides[dim],
            }
        })
        .collect()
}

/// Run chunk length: the whole mode, unless the outer loops alone cannot
/// feed every thread. Chunks are whole cache lines to avoid false sharing.
pub(crate) fn run_step<T: TransposeScalar>(problem: &Problem, shape: LeafShape, threads: usize) -> usize {
    let LeafShape::Run { dim } = shape else {
        return 1;
    };
    let extent = problem.dims[dim];
    let outer: usize = problem
        .dims
        .iter()
        .enumerate()
        .filter(|&(d, _)| d != dim)
        .map(|(_, &e)| e)
        .product();
    if threads <= 1 || outer >= threads {
        return extent;
    }
    let line = (CACHE_LINE_SIZE / std::mem::size_of::<T>()).max(1);
    let chunk = extent.div_ceil(threads);
    chunk.div_ceil(line) * line
}

/// Prime factors of `n`, largest first.
pub(crate) fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors.reverse();
    factors
}

/// Deal thread factors to the outermost level that can still absorb them.
pub(crate) fn partition_outermost(levels: &[LoopLevel], threads: usize) -> ThreadPartition {
    let mut per = vec![1usize; levels.len()];
    for f in prime_factors(threads.max(1)) {
        if let Some(l) = (0..levels.len()).find(|&l| per[l] * f <= levels[l].iterations()) {
            per[l] *= f;
        }
    }
    ThreadPartition {
        threads_per_level: per,
    }
}

/// Deal thread factors to the level with the most iterations per thread.
pub(crate) fn partition_balanced(levels: &[LoopLevel], threads: usize) -> ThreadPartition {
    let mut per = vec![1usize; levels.len()];
    for f in prime_factors(threads.max(1)) {
        let best = (0..levels.len())
            .filter(|&l| per[l] * f <= levels[l].iterations())
            .max_by(|&x, &y| {
                let wx = levels[x].iterations() as f64 / (per[x] * f) as f64;
                let wy = levels[y].iterations() as f64 / (per[y] * f) as f64;
                // ties go to the outer level
                wx.total_cmp(&wy).then(y.cmp(&x))
            });
        if let Some(l) = best {
            per[l] *= f;
        }
    }
    ThreadPartition {
        threads_per_level: per,
    }
}

/// Heuristic strategy for `problem` on `threads` workers.
pub fn heuristic<T: TransposeScalar>(problem: &Problem, threads: usize) -> ExecutionStrategy {
    let threads = if problem.len < MIN_PARALLEL_LEN { 1 } else { threads.max(1) };
    let shape = classify(problem);
    let leaf = leaf_for::<T>(problem, shape);
    let kernel = kernels_for(leaf)[0];
    let order = heuristic_order(problem, shape);
    let levels = make_levels(problem, &order, tile_block::<T>(), run_step::<T>(problem, shape, threads));
    let partition = partition_outermost(&levels, threads);
    ExecutionStrategy {
        levels,
        leaf,
        kernel,
        partition,
    }
}
