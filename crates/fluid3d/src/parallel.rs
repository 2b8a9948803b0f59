//! Process-wide worker pool shared by all solver loops.
//!
//! The pool size is configured once, before the first parallel operation
//! runs. After the pool has started, the size is fixed for the lifetime of
//! the process and further configuration calls are ignored with a warning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use rayon::ThreadPool;

static REQUESTED_THREADS: AtomicUsize = AtomicUsize::new(0);
static POOL: OnceLock<ThreadPool> = OnceLock::new();

/// Set the maximum number of worker threads.
///
/// Takes effect only if called before the first parallel operation; a
/// count of zero means one thread per logical CPU.
pub fn set_max_number_of_threads(count: usize) {
    if POOL.get().is_some() {
        log::warn!(
            "worker pool already started; ignoring requested thread count {}",
            count
        );
        return;
    }
    REQUESTED_THREADS.store(count, Ordering::SeqCst);
}

/// Number of worker threads the pool runs with (or will run with once
/// started).
pub fn max_number_of_threads() -> usize {
    if let Some(pool) = POOL.get() {
        return pool.current_num_threads();
    }
    let requested = REQUESTED_THREADS.load(Ordering::SeqCst);
    if requested > 0 {
        requested
    } else {
        rayon::current_num_threads()
    }
}

/// The shared pool, started on first use.
pub(crate) fn pool() -> &'static ThreadPool {
    POOL.get_or_init(|| {
        let requested = REQUESTED_THREADS.load(Ordering::SeqCst);
        let mut builder = rayon::ThreadPoolBuilder::new();
        if requested > 0 {
            builder = builder.num_threads(requested);
        }
        builder.build().expect("failed to start worker pool")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_count_is_frozen_after_pool_start() {
        let running = pool().current_num_threads();
        assert!(running >= 1);

        // Late configuration must not change the running pool.
        set_max_number_of_threads(running + 7);
        assert_eq!(max_number_of_threads(), running);
    }
}
