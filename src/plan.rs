//! Transpose Plan: a reusable, synthesized transposition job.
//!
//! A plan binds a [`ShapeDescriptor`], the scaling parameters and the two
//! buffers, owns its worker pool, and holds the [`ExecutionStrategy`] chosen
//! by its [`SelectionPolicy`]. Heuristic plans are synthesized on
//! construction; empirical plans time candidates when [`TransposePlan::synthesize`]
//! is called. Once synthesized, [`TransposePlan::execute`] can run any number
//! of times without re-deriving anything. [`TransposePlan::resynthesize`]
//! discards the strategy and selects a new one.

use crate::error::{Operand, Result, TransposeError};
use crate::execute::execute_strategy;
use crate::pool::WorkerPool;
use crate::problem::Problem;
use crate::scalar::{ComplexScalar, TransposeScalar};
use crate::selector::{enumerate_candidates, heuristic, search, search_with, SearchReport, SelectionPolicy};
use crate::shape::ShapeDescriptor;
use crate::strategy::ExecutionStrategy;

/// `output = alpha * op(permute(input)) + beta * output`, where `op` is the
/// complex conjugate when `conj_input` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling<T> {
    pub alpha: T,
    pub beta: T,
    pub(crate) conj_input: bool,
}

/// Write rule derived from the scaling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateMode {
    /// `alpha == 1`, `beta == 0`: plain (possibly conjugated) copy.
    Overwrite,
    /// `beta == 0`: the output is write-only.
    Scale,
    Accumulate,
}

impl<T: TransposeScalar> Scaling<T> {
    pub fn new(alpha: T, beta: T) -> Self {
        Scaling {
            alpha,
            beta,
            conj_input: false,
        }
    }

    pub fn conj_input(&self) -> bool {
        self.conj_input
    }

    /// Whether execution reads the prior output contents.
    pub fn reads_output(&self) -> bool {
        self.update_mode() == UpdateMode::Accumulate
    }

    pub(crate) fn update_mode(&self) -> UpdateMode {
        if self.beta != T::zero() {
            UpdateMode::Accumulate
        } else if self.alpha == T::one() {
            UpdateMode::Overwrite
        } else {
            UpdateMode::Scale
        }
    }
}

impl<T: ComplexScalar> Scaling<T> {
    /// Conjugate every input element before scaling.
    pub fn with_conj_input(mut self, conj: bool) -> Self {
        self.conj_input = conj;
        self
    }
}

impl<T: TransposeScalar> Default for Scaling<T> {
    fn default() -> Self {
        Scaling::new(T::one(), T::zero())
    }
}

/// Plan construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub policy: SelectionPolicy,
    /// Requested worker count. The pool may end up with fewer threads.
    pub num_threads: usize,
    /// CPU for each worker, in worker order. Workers past the end of the list
    /// run unpinned.
    pub affinity: Vec<usize>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        PlanOptions {
            policy: SelectionPolicy::Heuristic,
            num_threads: 1,
            affinity: Vec::new(),
        }
    }
}

impl PlanOptions {
    pub fn policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn affinity(mut self, affinity: Vec<usize>) -> Self {
        self.affinity = affinity;
        self
    }
}

/// Lifecycle of a [`TransposePlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanState {
    /// Built, no strategy yet (empirical policies only).
    Unsynthesized,
    Synthesizing,
    /// Ready to execute.
    Synthesized,
    Executing,
    /// Synthesis failed; the plan refuses further use.
    Failed,
}

/// A reusable transposition over two bound buffers.
pub struct TransposePlan<'a, T: TransposeScalar> {
    shape: ShapeDescriptor,
    problem: Problem,
    scaling: Scaling<T>,
    policy: SelectionPolicy,
    input: &'a [T],
    output: &'a mut [T],
    pool: WorkerPool,
    strategy: Option<ExecutionStrategy>,
    state: PlanState,
    report: Option<SearchReport>,
}

impl<'a, T: TransposeScalar> TransposePlan<'a, T> {
    /// Bind `shape`, `scaling` and the buffers.
    ///
    /// Buffers must cover every element the shape addresses. With the
    /// heuristic policy the strategy is synthesized immediately.
    pub fn new(
        shape: ShapeDescriptor,
        scaling: Scaling<T>,
        options: PlanOptions,
        input: &'a [T],
        output: &'a mut [T],
    ) -> Result<Self> {
        let problem = Problem::from_shape(&shape);
        check_buffers(&problem, input.len(), output.len())?;
        let pool = WorkerPool::new(options.num_threads, &options.affinity);
        if pool.is_degraded() {
            log::warn!(
                "plan runs on {} threads instead of {}",
                pool.threads(),
                pool.requested()
            );
        }

        let mut plan = TransposePlan {
            shape,
            problem,
            scaling,
            policy: options.policy,
            input,
            output,
            pool,
            strategy: None,
            state: PlanState::Unsynthesized,
            report: None,
        };
        if !plan.policy.is_empirical() {
            plan.synthesize()?;
        }
        Ok(plan)
    }

    /// Select the execution strategy. Idempotent once it succeeded.
    ///
    /// Empirical policies execute every candidate once: against the bound
    /// output when `beta == 0` (the next `execute` overwrites it anyway) and
    /// against a scratch copy otherwise. A failed search leaves the plan in
    /// [`PlanState::Failed`].
    pub fn synthesize(&mut self) -> Result<&ExecutionStrategy> {
        if self.state == PlanState::Failed {
            return Err(TransposeError::PlanFailed);
        }
        if self.strategy.is_none() {
            self.state = PlanState::Synthesizing;
            match self.select() {
                Ok(strategy) => {
                    log::debug!(
                        "strategy for {:?} perm {:?}: order {:?}, blocks {:?}, {:?}, {} workers",
                        self.shape.extents(),
                        self.shape.permutation(),
                        strategy.loop_order(),
                        strategy.block_sizes(),
                        strategy.kernel,
                        strategy.workers(),
                    );
                    self.strategy = Some(strategy);
                    self.state = PlanState::Synthesized;
                }
                Err(err) => {
                    self.state = PlanState::Failed;
                    return Err(err);
                }
            }
        }
        self.strategy.as_ref().ok_or(TransposeError::NotSynthesized)
    }

    /// Discard the current strategy and search report, then synthesize again.
    ///
    /// Empirical policies re-time their candidates; the bound output is left
    /// as `synthesize` would leave it.
    pub fn resynthesize(&mut self) -> Result<&ExecutionStrategy> {
        if self.state == PlanState::Failed {
            return Err(TransposeError::PlanFailed);
        }
        self.strategy = None;
        self.report = None;
        self.state = PlanState::Unsynthesized;
        self.synthesize()
    }

    fn select(&mut self) -> Result<ExecutionStrategy> {
        let threads = self.pool.threads();
        if !self.policy.is_empirical() {
            return Ok(heuristic::<T>(&self.problem, threads));
        }

        let candidates = enumerate_candidates::<T>(&self.problem, threads, self.policy.candidate_budget());
        let (problem, scaling, input, pool) = (&self.problem, &self.scaling, self.input, &self.pool);
        let report = if scaling.reads_output() {
            // Every candidate accumulates into the same prior output.
            let prior = &self.output[..problem.dst_span];
            let mut scratch = prior.to_vec();
            search_with(
                &candidates,
                problem,
                &mut scratch,
                |scratch| scratch.copy_from_slice(prior),
                |c, scratch| execute_strategy(c, problem, scaling, input, scratch, pool),
            )?
        } else {
            let output = &mut *self.output;
            search(&candidates, problem, |c| execute_strategy(c, problem, scaling, input, output, pool))?
        };
        let strategy = candidates[report.chosen].clone();
        self.report = Some(report);
        Ok(strategy)
    }

    /// Run the synthesized strategy once over the bound buffers.
    pub fn execute(&mut self) -> Result<()> {
        if self.state == PlanState::Failed {
            return Err(TransposeError::PlanFailed);
        }
        let Some(strategy) = self.strategy.as_ref() else {
            return Err(TransposeError::NotSynthesized);
        };
        self.state = PlanState::Executing;
        let result = execute_strategy(
            strategy,
            &self.problem,
            &self.scaling,
            self.input,
            &mut *self.output,
            &self.pool,
        );
        self.state = PlanState::Synthesized;
        result
    }

    /// Replace both buffers, keeping the synthesized strategy.
    pub fn rebind(&mut self, input: &'a [T], output: &'a mut [T]) -> Result<()> {
        check_buffers(&self.problem, input.len(), output.len())?;
        self.input = input;
        self.output = output;
        Ok(())
    }

    /// The bound output buffer.
    pub fn output(&self) -> &[T] {
        &*self.output
    }

    pub fn strategy(&self) -> Option<&ExecutionStrategy> {
        self.strategy.as_ref()
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    /// Timing summary of the last empirical synthesis.
    pub fn search_report(&self) -> Option<&SearchReport> {
        self.report.as_ref()
    }

    pub fn shape(&self) -> &ShapeDescriptor {
        &self.shape
    }

    pub fn scaling(&self) -> &Scaling<T> {
        &self.scaling
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Worker threads actually available to this plan.
    pub fn threads(&self) -> usize {
        self.pool.threads()
    }
}

impl<T: TransposeScalar> std::fmt::Debug for TransposePlan<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransposePlan")
            .field("shape", &self.shape)
            .field("policy", &self.policy)
            .field("pool", &self.pool)
            .field("state", &self.state)
            .field("strategy", &self.strategy)
            .finish()
    }
}

fn check_buffers(problem: &Problem, input: usize, output: usize) -> Result<()> {
    if input < problem.src_span {
        return Err(TransposeError::BufferTooSmall {
            operand: Operand::Input,
            required: problem.src_span,
            len: input,
        });
    }
    if output < problem.dst_span {
        return Err(TransposeError::BufferTooSmall {
            operand: Operand::Output,
            required: problem.dst_span,
            len: output,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::LayoutOrder;
    use num_complex::Complex64;

    #[test]
    fn test_update_mode() {
        assert_eq!(Scaling::new(1.0f64, 0.0).update_mode(), UpdateMode::Overwrite);
        assert_eq!(Scaling::new(2.0f64, 0.0).update_mode(), UpdateMode::Scale);
        assert_eq!(Scaling::new(1.0f64, -0.0).update_mode(), UpdateMode::Overwrite);
        assert_eq!(Scaling::new(1.0f64, 1.0).update_mode(), UpdateMode::Accumulate);
        assert!(!Scaling::<f32>::default().reads_output());
        let c = Scaling::new(Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)).with_conj_input(true);
        assert!(c.conj_input());
    }

    #[test]
    fn test_heuristic_plan_synthesizes_on_construction() {
        let shape = ShapeDescriptor::dense(&[3, 4], &[1, 0], LayoutOrder::ColumnMajor).unwrap();
        let input: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let mut output = vec![0.0; 12];
        let mut plan =
            TransposePlan::new(shape, Scaling::default(), PlanOptions::default(), &input, &mut output).unwrap();
        assert_eq!(plan.state(), PlanState::Synthesized);
        assert!(plan.strategy().is_some());
        plan.execute().unwrap();
        assert_eq!(plan.state(), PlanState::Synthesized);
        assert_eq!(plan.output()[..4], [0.0, 3.0, 6.0, 9.0]);
    }

    #[test]
    fn test_empirical_plan_needs_synthesis() {
        let shape = ShapeDescriptor::dense(&[3, 4], &[1, 0], LayoutOrder::ColumnMajor).unwrap();
        let input = vec![1.0f32; 12];
        let mut output = vec![0.0f32; 12];
        let options = PlanOptions::default().policy(SelectionPolicy::measure());
        let mut plan = TransposePlan::new(shape, Scaling::default(), options, &input, &mut output).unwrap();
        assert_eq!(plan.state(), PlanState::Unsynthesized);
        assert!(matches!(plan.execute(), Err(TransposeError::NotSynthesized)));
        plan.synthesize().unwrap();
        let report = plan.search_report().unwrap();
        assert!(report.timed >= 1);
        assert!(report.timed <= 10);
        plan.execute().unwrap();
        assert!(plan.output().iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_scratch_timing_leaves_output_untouched() {
        let shape = ShapeDescriptor::dense(&[4, 4], &[1, 0], LayoutOrder::ColumnMajor).unwrap();
        let input = vec![1.0f64; 16];
        let mut output = vec![5.0f64; 16];
        let options = PlanOptions::default().policy(SelectionPolicy::Measure { max_candidates: 4 });
        let mut plan = TransposePlan::new(shape, Scaling::new(1.0, 1.0), options, &input, &mut output).unwrap();
        plan.synthesize().unwrap();
        assert!(plan.output().iter().all(|&x| x == 5.0));
        plan.execute().unwrap();
        assert!(plan.output().iter().all(|&x| x == 6.0));
    }

    #[test]
    fn test_resynthesize_replaces_strategy() {
        let shape = ShapeDescriptor::dense(&[6, 5, 4], &[2, 0, 1], LayoutOrder::ColumnMajor).unwrap();
        let input: Vec<f64> = (0..120).map(|i| i as f64).collect();
        let mut output = vec![0.0f64; 120];
        let options = PlanOptions::default().policy(SelectionPolicy::Measure { max_candidates: 6 });
        let mut plan = TransposePlan::new(shape, Scaling::default(), options, &input, &mut output).unwrap();
        plan.synthesize().unwrap();
        let first = plan.search_report().cloned().unwrap();
        assert!(first.timed >= 1);

        plan.resynthesize().unwrap();
        assert_eq!(plan.state(), PlanState::Synthesized);
        let second = plan.search_report().cloned().unwrap();
        assert!(second.timed >= 1);
        assert_eq!(second.candidates, first.candidates);
        assert!(plan.strategy().is_some());

        plan.execute().unwrap();
        // [6,5,4] -> [4,6,5], column-major
        for k in 0..4 {
            for i in 0..6 {
                for j in 0..5 {
                    assert_eq!(plan.output()[k + 4 * (i + 6 * j)], input[i + 6 * (j + 5 * k)]);
                }
            }
        }
    }

    #[test]
    fn test_resynthesize_heuristic_plan() {
        let shape = ShapeDescriptor::dense(&[3, 4], &[1, 0], LayoutOrder::RowMajor).unwrap();
        let input: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let mut output = vec![0.0f64; 12];
        let mut plan = TransposePlan::new(shape, Scaling::default(), PlanOptions::default(), &input, &mut output).unwrap();
        let before = plan.strategy().cloned();
        let after = plan.resynthesize().unwrap().clone();
        assert_eq!(Some(after), before);
        assert!(plan.search_report().is_none());
        plan.execute().unwrap();
        assert_eq!(plan.output()[1], 4.0);
    }

    #[test]
    fn test_accumulate_search_keeps_output_normal() {
        let shape = ShapeDescriptor::dense(&[4, 3, 2], &[2, 0, 1], LayoutOrder::ColumnMajor).unwrap();
        let input = vec![1.0f32; 24];
        let mut output = vec![3.0f32; 24];
        let options = PlanOptions::default().policy(SelectionPolicy::Exhaustive);
        let mut plan = TransposePlan::new(shape, Scaling::new(2.0, 0.5), options, &input, &mut output).unwrap();
        plan.synthesize().unwrap();
        assert!(plan.search_report().unwrap().timed >= 1);
        assert!(plan.output().iter().all(|&x| x == 3.0));
        plan.execute().unwrap();
        assert!(plan.output().iter().all(|&x| x == 3.5));
    }

    #[test]
    fn test_short_buffers_rejected() {
        let shape = ShapeDescriptor::dense(&[3, 4], &[1, 0], LayoutOrder::ColumnMajor).unwrap();
        let input = vec![0.0f64; 11];
        let mut output = vec![0.0f64; 12];
        let err = TransposePlan::new(shape, Scaling::default(), PlanOptions::default(), &input, &mut output)
            .unwrap_err();
        assert!(matches!(
            err,
            TransposeError::BufferTooSmall {
                operand: Operand::Input,
                required: 12,
                len: 11
            }
        ));
    }

    #[test]
    fn test_rebind_keeps_strategy() {
        let shape = ShapeDescriptor::dense(&[2, 3], &[1, 0], LayoutOrder::RowMajor).unwrap();
        let a: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..6).map(|i| 10.0 * i as f64).collect();
        let mut out_a = vec![0.0; 6];
        let mut out_b = vec![0.0; 6];
        let mut plan = TransposePlan::new(shape, Scaling::default(), PlanOptions::default(), &a, &mut out_a).unwrap();
        let before = plan.strategy().cloned();
        plan.execute().unwrap();
        plan.rebind(&b, &mut out_b).unwrap();
        assert_eq!(plan.strategy().cloned(), before);
        plan.execute().unwrap();
        // row-major [2,3] -> [3,2]
        assert_eq!(plan.output(), &[0.0, 30.0, 10.0, 40.0, 20.0, 50.0]);
        drop(plan);
        assert_eq!(out_a, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }
}
