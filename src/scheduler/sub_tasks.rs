use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out the indices `0..n` to whichever worker asks first.  Each index is claimed exactly
/// once.
pub struct SequentialSubTasks {
    n_tasks: usize,
    next: AtomicUsize,
}

impl SequentialSubTasks {
    pub fn new(n_tasks: usize) -> Self {
        SequentialSubTasks {
            n_tasks,
            next: AtomicUsize::new(0),
        }
    }

    pub fn n_tasks(&self) -> usize {
        self.n_tasks
    }

    /// Claim the next unclaimed task.
    pub fn try_claim_task(&self) -> Option<usize> {
        let t = self.next.fetch_add(1, Ordering::Relaxed);
        if t < self.n_tasks {
            Some(t)
        } else {
            None
        }
    }

    /// Whether every task has been claimed.
    pub fn all_claimed(&self) -> bool {
        self.next.load(Ordering::Relaxed) >= self.n_tasks
    }

    /// The number of tasks claimed so far.  Tasks are claimed in index order, so this is also
    /// the index of the first unclaimed task.
    pub fn claimed(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.n_tasks)
    }
}

/// Claim flags for a fixed set of subtasks that must run at most once each, such as the root
/// scanning tasks of a parallel remark.
pub struct SubTasksDone {
    claimed: Vec<AtomicUsize>,
}

impl SubTasksDone {
    pub fn new(n: usize) -> Self {
        SubTasksDone {
            claimed: (0..n).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Returns true if this call claimed subtask `t`.
    pub fn try_claim(&self, t: usize) -> bool {
        self.claimed[t].fetch_add(1, Ordering::AcqRel) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn every_task_is_claimed_once() {
        let tasks = SequentialSubTasks::new(100);
        let seen = Mutex::new(HashSet::new());
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while let Some(t) = tasks.try_claim_task() {
                        assert!(seen.lock().unwrap().insert(t));
                    }
                });
            }
        });
        assert_eq!(seen.lock().unwrap().len(), 100);
        assert!(tasks.all_claimed());

        let done = SubTasksDone::new(2);
        assert!(done.try_claim(1));
        assert!(!done.try_claim(1));
        assert!(done.try_claim(0));
    }
}
