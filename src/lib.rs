//! Out-of-place tensor transposition with reusable, tuned plans.
//!
//! Computes `output = alpha * permute(op(input)) + beta * output` for dense
//! or padded tensors of any mode count, where `op` is the identity or (for
//! complex kinds) the complex conjugate. Element kinds are `f32`, `f64`,
//! `Complex32` and `Complex64`.
//!
//! # Core Types
//!
//! - [`ShapeDescriptor`] / [`ShapeBuilder`]: validated extents, permutation,
//!   physical extents, offsets, inner strides and layout order
//! - [`TransposePlan`]: binds a shape, [`Scaling`] and two buffers; selects an
//!   [`ExecutionStrategy`] once and executes it any number of times
//! - [`SelectionPolicy`]: fast heuristic, or timed search over candidates
//!   (`Measure`, `Patient`, `Exhaustive`)
//!
//! # Example
//!
//! ```rust
//! use strided_transpose::{LayoutOrder, PlanOptions, Scaling, ShapeDescriptor, TransposePlan};
//!
//! // [2, 3, 4] -> [4, 2, 3] in row-major order
//! let shape = ShapeDescriptor::dense(&[2, 3, 4], &[2, 0, 1], LayoutOrder::RowMajor).unwrap();
//! let input: Vec<f64> = (0..24).map(|i| i as f64).collect();
//! let mut output = vec![0.0; 24];
//!
//! let mut plan =
//!     TransposePlan::new(shape, Scaling::new(1.0, 0.0), PlanOptions::default(), &input, &mut output)
//!         .unwrap();
//! plan.execute().unwrap();
//! // output[k, i, j] = input[i, j, k]
//! assert_eq!(plan.output()[1], 4.0);
//! ```
//!
//! For one-off calls, [`transpose`] builds a heuristic plan, runs it and
//! drops it.

pub mod element_op;
pub mod error;
mod execute;
pub mod fuse;
pub mod kernel;
pub mod oneshot;
pub mod plan;
pub mod pool;
pub mod problem;
pub mod scalar;
pub mod selector;
pub mod shape;
pub mod strategy;

pub use element_op::{Conj, ElementOp, Identity};
pub use error::{Operand, Result, TransposeError};
pub use oneshot::{transpose, transpose_conj};
pub use plan::{PlanOptions, PlanState, Scaling, TransposePlan};
pub use pool::WorkerPool;
pub use problem::Problem;
pub use scalar::{ComplexScalar, ElementKind, TransposeScalar};
pub use selector::{enumerate_candidates, heuristic, search, search_with, SearchReport, SelectionPolicy};
pub use shape::{CanonicalLayout, LayoutOrder, ShapeBuilder, ShapeDescriptor};
pub use strategy::{ExecutionStrategy, KernelVariant, Leaf, LevelRanges, LevelRole, LoopLevel, ThreadPartition};

// Constants
pub const CACHE_LINE_SIZE: usize = 64;
