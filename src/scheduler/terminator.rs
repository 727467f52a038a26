use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::utils::Backoff;

/// Termination detection for a gang of workers that steal from each other.
///
/// A worker that runs out of work offers termination.  The task is over once every worker has
/// offered.  While waiting, an offering worker keeps peeking for new work and withdraws its
/// offer if it sees any, unless the others have all offered already.
pub struct ParallelTaskTerminator {
    n_threads: usize,
    offered: AtomicUsize,
    aborted: AtomicBool,
}

impl ParallelTaskTerminator {
    pub fn new(n_threads: usize) -> Self {
        assert!(n_threads > 0);
        ParallelTaskTerminator {
            n_threads,
            offered: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Offer termination.  `peek_work` reports whether any work is visible to this worker (peer
    /// queues, the overflow list).  Returns true if the task is over, false if the caller should
    /// look for work again.
    pub fn offer_termination<F: Fn() -> bool>(&self, peek_work: F) -> bool {
        if self.is_aborted() {
            return true;
        }
        if self.n_threads == 1 {
            return !peek_work();
        }
        self.offered.fetch_add(1, Ordering::SeqCst);
        let backoff = Backoff::new();
        loop {
            if self.offered.load(Ordering::SeqCst) == self.n_threads || self.is_aborted() {
                return true;
            }
            if peek_work() {
                let mut cur = self.offered.load(Ordering::SeqCst);
                loop {
                    if cur == self.n_threads {
                        return true;
                    }
                    match self.offered.compare_exchange(
                        cur,
                        cur - 1,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => return false,
                        Err(actual) => cur = actual,
                    }
                }
            }
            if backoff.is_completed() {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Make every current and future offer succeed.  Used when the workers have to stop early,
    /// e.g. to yield to a stop-the-world request.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn reset_for_reuse(&self) {
        self.offered.store(0, Ordering::SeqCst);
        self.aborted.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::panic_after;
    use std::sync::Arc;

    #[test]
    fn all_workers_terminate_once_the_work_is_gone() {
        panic_after(5000, || {
            let terminator = Arc::new(ParallelTaskTerminator::new(4));
            let work = Arc::new(AtomicUsize::new(1000));
            std::thread::scope(|s| {
                for _ in 0..4 {
                    let terminator = &terminator;
                    let work = &work;
                    s.spawn(move || loop {
                        while work
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| w.checked_sub(1))
                            .is_ok()
                        {}
                        if terminator.offer_termination(|| work.load(Ordering::SeqCst) > 0) {
                            break;
                        }
                    });
                }
            });
            assert_eq!(work.load(Ordering::SeqCst), 0);
        })
    }

    #[test]
    fn abort_releases_waiting_workers() {
        panic_after(5000, || {
            let terminator = ParallelTaskTerminator::new(2);
            std::thread::scope(|s| {
                s.spawn(|| assert!(terminator.offer_termination(|| false)));
                std::thread::sleep(std::time::Duration::from_millis(10));
                terminator.abort();
            });
            assert!(terminator.is_aborted());
            terminator.reset_for_reuse();
            assert!(!terminator.is_aborted());
        })
    }
}
