use std::fmt;

/// Which of the two buffers of a transposition an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Input,
    Output,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Input => f.write_str("input"),
            Operand::Output => f.write_str("output"),
        }
    }
}

/// Errors raised while describing, planning or executing a transposition.
#[derive(Debug, thiserror::Error)]
pub enum TransposeError {
    /// A tensor needs at least one mode.
    #[error("invalid mode count {0}: at least one mode is required")]
    InvalidModeCount(usize),

    /// A per-mode array does not have one entry per mode.
    #[error("{what} has {got} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// The permutation is not a bijection on `0..mode_count`.
    #[error("permutation {0:?} is not a bijection")]
    InvalidPermutation(Vec<usize>),

    /// Logical extents must be positive.
    #[error("extent of mode {mode} is zero")]
    ZeroExtent { mode: usize },

    /// Physical (leading-dimension) extents must be positive.
    #[error("physical extent of {operand} mode {mode} is zero")]
    ZeroPhysicalExtent { operand: Operand, mode: usize },

    /// Inner strides must be positive.
    #[error("inner stride of {operand} is zero")]
    ZeroInnerStride { operand: Operand },

    /// A logical sub-block does not fit inside its physical layout.
    #[error(
        "{operand} mode {mode}: offset {offset} + extent {extent} exceeds physical extent {physical}"
    )]
    ExceedsPhysicalExtent {
        operand: Operand,
        mode: usize,
        extent: usize,
        offset: usize,
        physical: usize,
    },

    /// Address arithmetic does not fit in `isize`.
    #[error("offset overflow while computing {operand} layout")]
    OffsetOverflow { operand: Operand },

    /// A bound buffer is shorter than the addressed region.
    #[error("{operand} buffer holds {len} elements but the layout addresses {required}")]
    BufferTooSmall {
        operand: Operand,
        required: usize,
        len: usize,
    },

    /// `execute` was called before a strategy was synthesized.
    #[error("plan has no execution strategy; call synthesize() first")]
    NotSynthesized,

    /// A previous synthesis failed; the plan cannot be used any more.
    #[error("plan is unusable after a failed synthesis")]
    PlanFailed,

    /// Empirical search could not execute a single candidate.
    #[error("no viable execution strategy among {tried} candidates")]
    NoViableCandidate { tried: usize },

    /// A worker thread panicked while executing a strategy.
    #[error("worker failed: {0}")]
    WorkerFailed(String),
}

/// Convenience alias for `Result<T, TransposeError>`.
pub type Result<T> = std::result::Result<T, TransposeError>;
