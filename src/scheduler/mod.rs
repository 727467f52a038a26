//! Parallel work for the stop-the-world phases and for multi-threaded concurrent marking.
//!
//! A [`WorkGang`] runs one [`GangTask`] on all its workers.  Workers split the heap with
//! [`SequentialSubTasks`], balance the load through a [`TaskQueueSet`] and agree on when the
//! task is over with a [`ParallelTaskTerminator`].

mod sub_tasks;
pub use sub_tasks::{SequentialSubTasks, SubTasksDone};

mod task_queue;
pub use task_queue::{LocalQueue, TaskQueueSet};

mod terminator;
pub use terminator::ParallelTaskTerminator;

mod work_gang;
pub use work_gang::{GangTask, WorkGang};
