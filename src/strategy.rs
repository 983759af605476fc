//! Execution Strategy: a concrete recipe for walking one iteration space.
//!
//! A strategy is a loop nest (outermost first) over the fused modes of a
//! [`Problem`], a leaf that moves one tile or one run of elements, the
//! kernel used at that leaf, and a thread partition assigning each worker
//! a disjoint, contiguous range of iterations on some of the loops.

use smallvec::SmallVec;
use std::ops::Range;

use crate::problem::Problem;

/// Per-worker ranges, one per loop level.
pub type LevelRanges = SmallVec<[Range<usize>; 8]>;

/// Kernel used at the leaf of the loop nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelVariant {
    /// Register-sized micro-tiles with element-wise edges. Needs unit strides
    /// along both fast modes.
    MicroTile,
    /// Element-wise tile transpose with arbitrary strides.
    StridedTile,
    /// Vectorizable copy-scale over a run with unit strides on both sides.
    ContiguousRun,
    /// Element-wise scale-and-store over a strided run.
    StridedRun,
}

impl KernelVariant {
    pub fn is_tile(self) -> bool {
        matches!(self, KernelVariant::MicroTile | KernelVariant::StridedTile)
    }
}

/// What a loop level iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelRole {
    /// Plain loop over one mode.
    Outer,
    /// Tiles along the input-fast mode.
    TileA,
    /// Tiles along the output-fast mode.
    TileB,
    /// Chunks of the shared fast mode of a run leaf.
    Run,
}

/// One loop of the nest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoopLevel {
    /// Fused mode this level walks.
    pub dim: usize,
    pub role: LevelRole,
    /// Extent of the mode.
    pub extent: usize,
    /// Elements advanced per iteration (block size; 1 for outer loops).
    pub step: usize,
    pub src_stride: isize,
    pub dst_stride: isize,
}

impl LoopLevel {
    pub fn iterations(&self) -> usize {
        self.extent.div_ceil(self.step)
    }

    /// Elements covered by iteration `it` (the last one may be partial).
    #[inline(always)]
    pub fn span_at(&self, it: usize) -> usize {
        self.step.min(self.extent - it * self.step)
    }
}

/// Innermost unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leaf {
    /// 2D tile over the input-fast mode `a` and the output-fast mode `b`.
    Tile {
        /// Input stride along `a`.
        src_stride_a: isize,
        /// Input stride along `b` (leading dimension of the source tile).
        lda: isize,
        /// Output stride along `a` (leading dimension of the destination tile).
        ldb: isize,
        /// Output stride along `b`.
        dst_stride_b: isize,
        /// Micro-tile side length of the element kind.
        micro: usize,
    },
    /// 1D run along a mode that is fastest in both operands.
    Run { src_stride: isize, dst_stride: isize },
}

/// Number of workers assigned to each loop level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadPartition {
    pub threads_per_level: Vec<usize>,
}

impl ThreadPartition {
    pub fn serial(levels: usize) -> Self {
        ThreadPartition {
            threads_per_level: vec![1; levels],
        }
    }

    /// Number of worker slots.
    pub fn workers(&self) -> usize {
        self.threads_per_level.iter().product()
    }

    /// Iteration ranges owned by `worker`, one per level.
    ///
    /// Worker ids are decoded in mixed radix over `threads_per_level`, and
    /// each level's iterations are split into that many contiguous chunks
    /// whose sizes differ by at most one.
    pub fn ranges_for(&self, levels: &[LoopLevel], worker: usize) -> LevelRanges {
        let mut ranges: LevelRanges = levels.iter().map(|l| 0..l.iterations()).collect();
        let mut w = worker;
        for (l, &t) in self.threads_per_level.iter().enumerate().rev() {
            let chunk = w % t;
            w /= t;
            let n = levels[l].iterations();
            ranges[l] = (n * chunk / t)..(n * (chunk + 1) / t);
        }
        ranges
    }
}

/// A complete recipe for one transposition shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionStrategy {
    /// Loop nest, outermost first.
    pub levels: Vec<LoopLevel>,
    pub leaf: Leaf,
    pub kernel: KernelVariant,
    pub partition: ThreadPartition,
}

impl ExecutionStrategy {
    pub fn workers(&self) -> usize {
        self.partition.workers()
    }

    /// Modes in loop order, outermost first.
    pub fn loop_order(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.dim).collect()
    }

    /// Block size of each level, in loop order.
    pub fn block_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.step).collect()
    }

    /// Number of distinct kernels invoked while executing.
    ///
    /// Micro-tiles leave element-wise edges whenever a fast mode is not a
    /// multiple of the micro-tile width.
    pub fn kernel_switches(&self) -> usize {
        match (self.kernel, self.leaf) {
            (KernelVariant::MicroTile, Leaf::Tile { micro, .. }) => {
                let ragged = self
                    .levels
                    .iter()
                    .filter(|l| matches!(l.role, LevelRole::TileA | LevelRole::TileB))
                    .any(|l| l.extent % micro != 0 || l.step % micro != 0);
                1 + usize::from(ragged)
            }
            _ => 1,
        }
    }

    /// Check that the strategy walks `problem` exactly once with a kernel
    /// its strides allow.
    pub fn check(&self, problem: &Problem) -> Result<(), String> {
        let rank = problem.rank();
        let mut seen = vec![false; rank];
        let mut tiles = (0, 0, 0);
        for level in &self.levels {
            if level.dim >= rank || seen[level.dim] {
                return Err(format!("mode {} walked twice or out of range", level.dim));
            }
            seen[level.dim] = true;
            if level.step == 0 || level.extent != problem.dims[level.dim] {
                return Err(format!("level over mode {} is malformed", level.dim));
            }
            if level.role == LevelRole::Outer && level.step != 1 {
                return Err(format!("outer level over mode {} is blocked", level.dim));
            }
            match level.role {
                LevelRole::TileA => tiles.0 += 1,
                LevelRole::TileB => tiles.1 += 1,
                LevelRole::Run => tiles.2 += 1,
                LevelRole::Outer => {}
            }
        }
        if seen.iter().any(|&s| !s) {
            return Err("some modes are never walked".to_string());
        }

        match self.leaf {
            Leaf::Tile {
                src_stride_a,
                dst_stride_b,
                ..
            } => {
                if tiles != (1, 1, 0) || !self.kernel.is_tile() {
                    return Err("tile leaf needs exactly one A and one B tile level".to_string());
                }
                if self.kernel == KernelVariant::MicroTile && (src_stride_a != 1 || dst_stride_b != 1)
                {
                    return Err("micro-tiles need unit fast strides".to_string());
                }
            }
            Leaf::Run {
                src_stride,
                dst_stride,
            } => {
                if tiles != (0, 0, 1) || self.kernel.is_tile() {
                    return Err("run leaf needs exactly one run level".to_string());
                }
                if self.kernel == KernelVariant::ContiguousRun && (src_stride != 1 || dst_stride != 1) {
                    return Err("contiguous runs need unit strides".to_string());
                }
            }
        }

        let parts = &self.partition.threads_per_level;
        if parts.len() != self.levels.len() {
            return Err("partition does not match the loop nest".to_string());
        }
        for (level, &t) in self.levels.iter().zip(parts) {
            if t == 0 || t > level.iterations() {
                return Err(format!("{t} threads cannot split mode {}", level.dim));
            }
        }
        Ok(())
    }
}
