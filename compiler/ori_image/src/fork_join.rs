//! Fork-join over shard indices.

use rayon::prelude::*;

/// Run `f(0) .. f(n - 1)` on `n` worker threads and collect the results in
/// index order. Returns after every worker has finished.
///
/// With `n <= 1` the work runs on the calling thread. If the pool cannot be
/// created the indices run sequentially on the calling thread instead.
pub fn run_indexed<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    if n <= 1 {
        return (0..n).map(&f).collect();
    }

    // A scoped pool is torn down before this returns, so no worker outlives
    // the borrowed shard inputs.
    rayon::ThreadPoolBuilder::new()
        .num_threads(n)
        .thread_name(|i| format!("ori-image-{i}"))
        .build_scoped(rayon::ThreadBuilder::run, |pool| {
            pool.install(|| (0..n).into_par_iter().map(&f).collect::<Vec<_>>())
        })
        .unwrap_or_else(|e| {
            tracing::warn!("failed to create image thread pool ({e}), running shards sequentially");
            (0..n).map(&f).collect()
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::run_indexed;

    #[test]
    fn results_come_back_in_index_order() {
        let out = run_indexed(6, |i| i * 10);
        assert_eq!(out, vec![0, 10, 20, 30, 40, 50]);
    }

    #[test]
    fn zero_and_one_workers() {
        assert!(run_indexed(0, |i| i).is_empty());
        assert_eq!(run_indexed(1, |i| i + 7), vec![7]);
    }

    #[test]
    fn single_worker_runs_on_caller() {
        let caller = std::thread::current().id();
        let ids = run_indexed(1, |_| std::thread::current().id());
        assert_eq!(ids, vec![caller]);
    }

    #[test]
    fn every_index_runs_once() {
        let seen = Mutex::new(Vec::new());
        run_indexed(8, |i| {
            if let Ok(mut seen) = seen.lock() {
                seen.push(i);
            }
        });
        let seen = seen.into_inner().unwrap_or_default();
        assert_eq!(seen.len(), 8);
        assert_eq!(seen.into_iter().collect::<HashSet<_>>().len(), 8);
    }
}
