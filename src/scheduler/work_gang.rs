use crate::util::log;

/// A task run by every worker of a [`WorkGang`] at once.
pub trait GangTask: Sync {
    /// State moved into each worker, such as its local task queue.
    type Local: Send;

    fn name(&self) -> &'static str;

    /// The body of the task for worker `worker_id`.
    fn work(&self, worker_id: usize, local: Self::Local);
}

/// A group of GC worker threads that run one [`GangTask`] at a time.  The calling thread waits
/// until every worker has returned.
pub struct WorkGang {
    name: &'static str,
    total_workers: usize,
}

impl WorkGang {
    pub fn new(name: &'static str, total_workers: usize) -> Self {
        assert!(total_workers > 0, "a work gang needs at least one worker");
        WorkGang {
            name,
            total_workers,
        }
    }

    pub fn total_workers(&self) -> usize {
        self.total_workers
    }

    /// Run `task` on one worker per element of `locals`, which must not outnumber the gang.  A
    /// single worker runs on the calling thread.
    pub fn run_task<T: GangTask>(&self, task: &T, locals: Vec<T::Local>) {
        assert!(
            !locals.is_empty() && locals.len() <= self.total_workers,
            "{} workers requested from a gang of {}",
            locals.len(),
            self.total_workers
        );
        log::trace!(
            "{}: running {} on {} workers",
            self.name,
            task.name(),
            locals.len()
        );
        if locals.len() == 1 {
            for local in locals {
                task.work(0, local);
            }
            return;
        }
        std::thread::scope(|s| {
            for (id, local) in locals.into_iter().enumerate() {
                std::thread::Builder::new()
                    .name(format!("{} {}", self.name, id))
                    .spawn_scoped(s, move || task.work(id, local))
                    .unwrap_or_else(|e| panic!("Failed to spawn a {} worker: {}", self.name, e));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SumTask {
        total: AtomicUsize,
    }

    impl GangTask for SumTask {
        type Local = Vec<usize>;

        fn name(&self) -> &'static str {
            "sum"
        }

        fn work(&self, worker_id: usize, local: Vec<usize>) {
            let sum: usize = local.iter().sum();
            self.total.fetch_add(sum + worker_id, Ordering::Relaxed);
        }
    }

    #[test]
    fn every_worker_runs_with_its_local_state() {
        let gang = WorkGang::new("test gang", 4);
        let task = SumTask {
            total: AtomicUsize::new(0),
        };
        gang.run_task(&task, vec![vec![1, 2], vec![3], vec![], vec![4]]);
        // 10 from the locals, 0 + 1 + 2 + 3 from the worker ids.
        assert_eq!(task.total.load(Ordering::Relaxed), 16);

        gang.run_task(&task, vec![vec![5]]);
        assert_eq!(task.total.load(Ordering::Relaxed), 21);
    }
}
