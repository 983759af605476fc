//! Worker pool for the parallel executor.
//!
//! Wraps a [`rayon::ThreadPool`] sized to the requested thread count, with
//! optional per-worker CPU pinning. If the pool cannot be built with the
//! requested number of threads it degrades to fewer workers instead of
//! failing: correctness never depends on the thread count.

/// A raw pointer wrapper that is `Send` + `Sync`.
///
/// # Safety
/// The caller must guarantee that the pointed-to data outlives every parallel
/// use and that workers write to disjoint regions.
pub(crate) struct SendPtr<T>(pub(crate) *mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    pub(crate) fn as_ptr(self) -> *mut T {
        self.0
    }

    pub(crate) fn as_const(self) -> *const T {
        self.0 as *const T
    }
}

/// Fixed-size set of worker threads owned by one plan.
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
    threads: usize,
    requested: usize,
    pinned: bool,
}

impl WorkerPool {
    /// Build a pool of `requested` workers. Worker `i` is pinned to CPU
    /// `affinity[i]` when that entry exists; the rest run unpinned.
    pub fn new(requested: usize, affinity: &[usize]) -> Self {
        let requested = requested.max(1);
        if requested == 1 && affinity.is_empty() {
            return Self::inline(requested);
        }

        let mut n = requested;
        loop {
            match build_pool(n, affinity) {
                Ok(pool) => {
                    if n < requested {
                        log::warn!("worker pool degraded from {requested} to {n} threads");
                    }
                    return WorkerPool {
                        pool: Some(pool),
                        threads: n,
                        requested,
                        pinned: !affinity.is_empty(),
                    };
                }
                Err(err) if n > 1 => {
                    log::warn!("cannot start {n} worker threads ({err}); retrying with fewer");
                    n /= 2;
                }
                Err(err) => {
                    log::warn!("cannot start worker threads ({err}); running on the calling thread");
                    return Self::inline(requested);
                }
            }
        }
    }

    fn inline(requested: usize) -> Self {
        WorkerPool {
            pool: None,
            threads: 1,
            requested,
            pinned: false,
        }
    }

    /// Number of threads actually available.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Thread count the caller asked for.
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// True when the pool has fewer threads than requested.
    pub fn is_degraded(&self) -> bool {
        self.threads < self.requested
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Run `f(thread_index)` once on every pool thread and collect the results.
    /// Without a pool, runs `f(0)` on the calling thread.
    pub fn broadcast<R, F>(&self, f: F) -> Vec<R>
    where
        F: Fn(usize) -> R + Sync,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.broadcast(|ctx| f(ctx.index())),
            None => vec![f(0)],
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("requested", &self.requested)
            .field("pinned", &self.pinned)
            .finish()
    }
}

fn build_pool(
    threads: usize,
    affinity: &[usize],
) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    let affinity = affinity.to_vec();
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|idx| format!("transpose-{idx}"))
        .start_handler(move |idx| {
            log::trace!("worker {idx} started");
            if let Some(&cpu) = affinity.get(idx) {
                pin_current_thread(cpu);
            }
        })
        .build()
}

/// Best-effort pinning of the calling thread via `sched_setaffinity`.
fn pin_current_thread(cpu: usize) {
    #[cfg(target_os = "linux")]
    {
        if cpu >= libc::CPU_SETSIZE as usize {
            log::warn!("cpu {cpu} is out of range; worker left unpinned");
            return;
        }
        // SAFETY: a zeroed cpu_set_t is a valid empty set, `cpu` is in range,
        // and pid 0 targets the calling thread.
        let rc = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(cpu, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if rc != 0 {
            log::warn!("failed to pin worker to cpu {cpu}");
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        log::debug!("thread pinning unsupported on this platform (cpu {cpu})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_single_thread_runs_inline() {
        let pool = WorkerPool::new(1, &[]);
        assert_eq!(pool.threads(), 1);
        assert_eq!(pool.broadcast(|i| i), vec![0]);
    }

    #[test]
    fn test_broadcast_reaches_every_thread() {
        let pool = WorkerPool::new(3, &[]);
        assert!(pool.threads() >= 1);
        let hits = AtomicUsize::new(0);
        let mut ids = pool.broadcast(|i| {
            hits.fetch_add(1, Ordering::Relaxed);
            i
        });
        ids.sort_unstable();
        assert_eq!(ids, (0..pool.threads()).collect::<Vec<_>>());
        assert_eq!(hits.load(Ordering::Relaxed), pool.threads());
    }

    #[test]
    fn test_partial_affinity_list() {
        // one pinned worker, one unpinned
        let pool = WorkerPool::new(2, &[0]);
        assert!(pool.is_pinned());
        assert_eq!(pool.broadcast(|_| 1usize).iter().sum::<usize>(), pool.threads());
    }
}
