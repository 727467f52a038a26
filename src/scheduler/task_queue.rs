//! Per-worker task queues with stealing.

use crossbeam::deque::{Steal, Stealer, Worker};

/// A worker's own queue.  Pushing and popping happen at one end, thieves take from the other.
/// The capacity is a soft bound: a full queue refuses pushes and the owner spills elsewhere.
pub struct LocalQueue<T> {
    worker: Worker<T>,
    capacity: usize,
}

impl<T> LocalQueue<T> {
    /// Push `item`, or hand it back if the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        if self.worker.len() >= self.capacity {
            return Err(item);
        }
        self.worker.push(item);
        Ok(())
    }

    pub fn pop(&self) -> Option<T> {
        self.worker.pop()
    }

    pub fn len(&self) -> usize {
        self.worker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worker.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The stealing ends of every worker's queue.
pub struct TaskQueueSet<T> {
    stealers: Vec<Stealer<T>>,
}

impl<T> TaskQueueSet<T> {
    /// Create `n` local queues and the set that steals from them.  The local queues are moved
    /// into the workers.
    pub fn new(n: usize, capacity: usize) -> (Self, Vec<LocalQueue<T>>) {
        let locals: Vec<LocalQueue<T>> = (0..n)
            .map(|_| LocalQueue {
                worker: Worker::new_lifo(),
                capacity,
            })
            .collect();
        let stealers = locals.iter().map(|q| q.worker.stealer()).collect();
        (TaskQueueSet { stealers }, locals)
    }

    pub fn len(&self) -> usize {
        self.stealers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stealers.is_empty()
    }

    /// Steal one item from a queue other than `thief`'s, trying each victim in turn.
    pub fn steal(&self, thief: usize) -> Option<T> {
        let n = self.stealers.len();
        for i in 1..n {
            let victim = &self.stealers[(thief + i) % n];
            loop {
                match victim.steal() {
                    Steal::Success(item) => return Some(item),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    /// Whether any queue other than `thief`'s has work.
    pub fn peek(&self, thief: usize) -> bool {
        self.stealers
            .iter()
            .enumerate()
            .any(|(i, s)| i != thief && !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_capacity_and_stealing() {
        let (set, locals) = TaskQueueSet::new(3, 2);
        assert_eq!(locals[0].push(1), Ok(()));
        assert_eq!(locals[0].push(2), Ok(()));
        assert_eq!(locals[0].push(3), Err(3));
        assert!(set.peek(1));
        assert!(!set.peek(0));
        // Thieves take the oldest item.
        assert_eq!(set.steal(2), Some(1));
        assert_eq!(locals[0].pop(), Some(2));
        assert_eq!(set.steal(1), None);
    }
}
