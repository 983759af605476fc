//! Strategy selection: a fast heuristic, or a timed search over candidates.

mod autotune;
mod estimate;

use std::time::Duration;

pub use autotune::{enumerate_candidates, search, search_with};
pub use estimate::heuristic;

/// How a plan picks its [`ExecutionStrategy`](crate::ExecutionStrategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Fixed rules, no timing. Synthesized when the plan is built.
    #[default]
    Heuristic,
    /// Time up to `max_candidates` strategies and keep the fastest.
    Measure { max_candidates: usize },
    /// Time up to 1000 strategies.
    Patient,
    /// Time every structurally distinct strategy.
    Exhaustive,
}

impl SelectionPolicy {
    pub const DEFAULT_CANDIDATES: usize = 10;
    pub const PATIENT_CANDIDATES: usize = 1000;

    /// `Measure` with the default budget.
    pub fn measure() -> Self {
        SelectionPolicy::Measure {
            max_candidates: Self::DEFAULT_CANDIDATES,
        }
    }

    /// Maximum number of timed candidates; `None` means unbounded.
    /// A zero budget still times one candidate.
    pub fn candidate_budget(self) -> Option<usize> {
        match self {
            SelectionPolicy::Heuristic => Some(1),
            SelectionPolicy::Measure { max_candidates } => Some(max_candidates.max(1)),
            SelectionPolicy::Patient => Some(Self::PATIENT_CANDIDATES),
            SelectionPolicy::Exhaustive => None,
        }
    }

    /// Whether synthesis times candidates (and so must be requested explicitly).
    pub fn is_empirical(self) -> bool {
        !matches!(self, SelectionPolicy::Heuristic)
    }
}

/// Outcome of an empirical search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    /// Candidates enumerated.
    pub candidates: usize,
    /// Candidates that ran to completion.
    pub timed: usize,
    /// Candidates skipped because they were invalid, errored or panicked.
    pub skipped: usize,
    /// Wall-clock time of the winner.
    pub best: Option<Duration>,
    /// Index of the winner among the enumerated candidates.
    pub chosen: usize,
}
