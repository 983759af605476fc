//! Empirical strategy search.
//!
//! Candidates vary the loop order, the kernel, the blocking and the thread
//! partition of the heuristic strategy. Each one is executed once and timed;
//! the fastest wins. Candidates that fail are skipped, not fatal.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use super::estimate::{
    classify, heuristic, heuristic_order, kernels_for, leaf_for, make_levels, partition_balanced,
    partition_outermost, run_step, tile_block, LeafShape,
};
use super::SearchReport;
use crate::error::{Result, TransposeError};
use crate::problem::Problem;
use crate::scalar::TransposeScalar;
use crate::strategy::{ExecutionStrategy, KernelVariant, Leaf, LevelRole, ThreadPartition};

/// Cap on the loop orders explored (6! orders).
const MAX_LOOP_ORDERS: usize = 720;

#[derive(Debug, Clone, Copy)]
enum PartitionKind {
    Outermost,
    Balanced,
    Serial,
}

const PARTITIONS: [PartitionKind; 3] = [PartitionKind::Outermost, PartitionKind::Balanced, PartitionKind::Serial];

/// Tile side and run step pairs to try.
fn blockings<T: TransposeScalar>(problem: &Problem, shape: LeafShape, threads: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    match shape {
        LeafShape::Tile { .. } => {
            let b = tile_block::<T>();
            let mut sides = vec![b, b / 2, 2 * b, T::MICRO];
            sides.retain(|&s| s >= T::MICRO);
            for s in sides {
                if !out.contains(&(s, 1)) {
                    out.push((s, 1));
                }
            }
        }
        LeafShape::Run { dim } => {
            out.push((1, usize::MAX));
            let chunked = run_step::<T>(problem, shape, threads);
            if chunked < problem.dims[dim] {
                out.push((1, chunked));
            }
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn build(
    problem: &Problem,
    order: &[(usize, LevelRole)],
    leaf: Leaf,
    kernel: KernelVariant,
    (block, step): (usize, usize),
    partition: PartitionKind,
    threads: usize,
) -> ExecutionStrategy {
    let levels = make_levels(problem, order, block, step);
    let partition = match partition {
        PartitionKind::Outermost => partition_outermost(&levels, threads),
        PartitionKind::Balanced => partition_balanced(&levels, threads),
        PartitionKind::Serial => ThreadPartition::serial(levels.len()),
    };
    ExecutionStrategy {
        levels,
        leaf,
        kernel,
        partition,
    }
}

fn next_permutation(p: &mut [usize]) -> bool {
    if p.len() < 2 {
        return false;
    }
    let mut i = p.len() - 1;
    while i > 0 && p[i - 1] >= p[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = p.len() - 1;
    while p[j] <= p[i - 1] {
        j -= 1;
    }
    p.swap(i - 1, j);
    p[i..].reverse();
    true
}

fn loop_orders(base: &[(usize, LevelRole)]) -> Vec<Vec<(usize, LevelRole)>> {
    let mut idx: Vec<usize> = (0..base.len()).collect();
    let mut orders = vec![base.to_vec()];
    while orders.len() < MAX_LOOP_ORDERS && next_permutation(&mut idx) {
        orders.push(idx.iter().map(|&i| base[i]).collect());
    }
    orders
}

/// Structurally distinct, valid strategies for `problem`, heuristic first.
///
/// After the heuristic come single-axis variations of it (kernel, blocking,
/// partition), then the full product with every loop order. Enumeration
/// stops at `limit` candidates when one is given.
pub fn enumerate_candidates<T: TransposeScalar>(
    problem: &Problem,
    threads: usize,
    limit: Option<usize>,
) -> Vec<ExecutionStrategy> {
    let threads = threads.max(1);
    let limit = limit.unwrap_or(usize::MAX).max(1);
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |s: ExecutionStrategy, out: &mut Vec<ExecutionStrategy>| {
        if out.len() < limit && s.check(problem).is_ok() && seen.insert(s.clone()) {
            out.push(s);
        }
        out.len() >= limit
    };

    if push(heuristic::<T>(problem, threads), &mut out) {
        return out;
    }

    let shape = classify(problem);
    let leaf = leaf_for::<T>(problem, shape);
    let kernels = kernels_for(leaf);
    let blocks = blockings::<T>(problem, shape, threads);
    let base = heuristic_order(problem, shape);

    for &kernel in &kernels {
        for &blocking in &blocks {
            for partition in PARTITIONS {
                let s = build(problem, &base, leaf, kernel, blocking, partition, threads);
                if push(s, &mut out) {
                    return out;
                }
            }
        }
    }

    for order in loop_orders(&base) {
        for &kernel in &kernels {
            for &blocking in &blocks {
                for partition in PARTITIONS {
                    let s = build(problem, &order, leaf, kernel, blocking, partition, threads);
                    if push(s, &mut out) {
                        return out;
                    }
                }
            }
        }
    }
    out
}

/// Timings within this fraction of the best count as a tie.
const TIE_TOLERANCE: f64 = 0.02;

/// Whether a finished candidate displaces the current best.
///
/// Timings within [`TIE_TOLERANCE`] of each other are equal; the candidate
/// with fewer kernel switches then wins, and the earlier one after that.
fn beats(elapsed: Duration, switches: usize, best: (Duration, usize)) -> bool {
    let (best_elapsed, best_switches) = best;
    let slack = best_elapsed.mul_f64(TIE_TOLERANCE);
    if elapsed + slack < best_elapsed {
        true
    } else if elapsed > best_elapsed + slack {
        false
    } else {
        switches < best_switches
    }
}

/// Time every candidate with `run` and report the fastest.
///
/// Ties go to the candidate with fewer kernel switches, then to the earlier
/// one. A candidate that fails validation, returns an error or panics is
/// skipped. If none completes the search fails.
pub fn search<F>(candidates: &[ExecutionStrategy], problem: &Problem, mut run: F) -> Result<SearchReport>
where
    F: FnMut(&ExecutionStrategy) -> Result<()>,
{
    search_with(candidates, problem, &mut (), |_| {}, |c, _| run(c))
}

/// Like [`search`], with untimed `prepare` run on `state` before each
/// candidate. Accumulating searches use it to restore their scratch output.
pub fn search_with<S, P, F>(
    candidates: &[ExecutionStrategy],
    problem: &Problem,
    state: &mut S,
    mut prepare: P,
    mut run: F,
) -> Result<SearchReport>
where
    S: ?Sized,
    P: FnMut(&mut S),
    F: FnMut(&ExecutionStrategy, &mut S) -> Result<()>,
{
    let mut best: Option<(Duration, usize, usize)> = None;
    let mut timed = 0;
    let mut skipped = 0;

    for (i, candidate) in candidates.iter().enumerate() {
        if let Err(reason) = candidate.check(problem) {
            log::warn!("skipping candidate {i}: {reason}");
            skipped += 1;
            continue;
        }
        prepare(&mut *state);
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| run(candidate, &mut *state)));
        let elapsed = start.elapsed();
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!("skipping candidate {i}: {err}");
                skipped += 1;
                continue;
            }
            Err(_) => {
                log::warn!("skipping candidate {i}: execution panicked");
                skipped += 1;
                continue;
            }
        }
        timed += 1;
        let switches = candidate.kernel_switches();
        if best.map_or(true, |(t, k, _)| beats(elapsed, switches, (t, k))) {
            best = Some((elapsed, switches, i));
        }
    }

    let (elapsed, _, chosen) = best.ok_or(TransposeError::NoViableCandidate {
        tried: candidates.len(),
    })?;
    log::info!(
        "fastest of {timed} candidates: #{chosen} in {elapsed:?} (order {:?}, blocks {:?}, {:?})",
        candidates[chosen].loop_order(),
        candidates[chosen].block_sizes(),
        candidates[chosen].kernel,
    );
    Ok(SearchReport {
        candidates: candidates.len(),
        timed,
        skipped,
        best: Some(elapsed),
        chosen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{LayoutOrder, ShapeDescriptor};

    fn problem(extents: &[usize], perm: &[usize]) -> Problem {
        Problem::from_shape(&ShapeDescriptor::dense(extents, perm, LayoutOrder::ColumnMajor).unwrap())
    }

    #[test]
    fn test_next_permutation() {
        let mut p = vec![0, 1, 2];
        let mut n = 1;
        while next_permutation(&mut p) {
            n += 1;
        }
        assert_eq!(n, 6);
        assert_eq!(p, vec![2, 1, 0]);
    }

    #[test]
    fn test_heuristic_is_first_candidate() {
        let p = problem(&[6, 7, 8], &[2, 0, 1]);
        let all = enumerate_candidates::<f64>(&p, 2, Some(1));
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], heuristic::<f64>(&p, 2));
    }

    #[test]
    fn test_candidates_are_distinct_and_valid() {
        let p = problem(&[5, 9, 3, 4], &[3, 1, 0, 2]);
        let all = enumerate_candidates::<f32>(&p, 4, None);
        assert!(all.len() > 1);
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(unique.len(), all.len());
        assert!(all.iter().all(|s| s.check(&p).is_ok()));
    }

    #[test]
    fn test_limit_is_respected() {
        let p = problem(&[5, 9, 3, 4], &[3, 1, 0, 2]);
        assert_eq!(enumerate_candidates::<f64>(&p, 1, Some(7)).len(), 7);
    }

    #[test]
    fn test_search_skips_failures() {
        let p = problem(&[8, 8], &[1, 0]);
        let all = enumerate_candidates::<f64>(&p, 1, Some(3));
        assert!(all.len() >= 2);
        let mut calls = 0;
        let report = search(&all, &p, |_| {
            calls += 1;
            if calls == 1 {
                panic!("candidate failure");
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.timed, all.len() - 1);
        assert_ne!(report.chosen, 0);
    }

    #[test]
    fn test_tie_prefers_fewer_kernel_switches() {
        let ms = Duration::from_millis;
        let us = Duration::from_micros;
        // within 2%: fewer switches wins, equal switches keeps the earlier
        assert!(beats(us(1010), 1, (ms(1), 2)));
        assert!(!beats(us(990), 2, (ms(1), 1)));
        assert!(!beats(us(990), 1, (ms(1), 1)));
        // outside the tolerance the time decides
        assert!(beats(us(950), 2, (ms(1), 1)));
        assert!(!beats(us(1050), 1, (ms(1), 2)));
    }

    #[test]
    fn test_search_restores_state_before_each_candidate() {
        use crate::execute::execute_strategy;
        use crate::plan::Scaling;
        use crate::pool::WorkerPool;

        let p = problem(&[5, 9, 3, 4], &[3, 1, 0, 2]);
        let all = enumerate_candidates::<f32>(&p, 1, None);
        assert!(all.len() >= 24);
        let pool = WorkerPool::new(1, &[]);
        let scaling = Scaling::new(2.0f32, 0.5);
        let input = vec![1.0f32; p.src_span];
        let prior = vec![3.0f32; p.dst_span];
        let mut scratch = prior.clone();
        let mut runs = 0;
        let report = search_with(
            &all,
            &p,
            &mut scratch,
            |scratch| scratch.copy_from_slice(&prior),
            |c, scratch| {
                assert!(scratch.iter().all(|&x| x == 3.0));
                execute_strategy(c, &p, &scaling, &input, scratch, &pool)?;
                runs += 1;
                assert!(scratch.iter().all(|&x| x == 3.5));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(report.timed, all.len());
        assert_eq!(runs, all.len());
        assert!(scratch.iter().all(|x| x.is_normal()));
    }

    #[test]
    fn test_search_without_survivors_fails() {
        let p = problem(&[8, 8], &[1, 0]);
        let all = enumerate_candidates::<f64>(&p, 1, Some(2));
        let err = search(&all, &p, |_| Err(TransposeError::PlanFailed)).unwrap_err();
        assert!(matches!(err, TransposeError::NoViableCandidate { .. }));
    }
}
