//! The initial mark pause: mark the objects the roots point to.

use std::time::Instant;

use super::{CMSCollector, CollectorState, PhaseResult, TokenGuard};
use crate::scheduler::{GangTask, SequentialSubTasks};
use crate::util::log;
use crate::util::ObjectReference;
use crate::vm::{Collection, Scanning, VMBinding};

/// Roots are handed to the workers in chunks of this many.
const ROOTS_PER_TASK: usize = 256;

impl<VM: VMBinding> CMSCollector<VM> {
    pub(super) fn checkpoint_roots_initial(
        &self,
        token: &mut TokenGuard,
        epoch: usize,
    ) -> PhaseResult {
        debug_assert_eq!(self.state(), CollectorState::InitialMarking);
        self.stop_world_for_pause(token, epoch)?;
        let start = Instant::now();

        // Nothing has been traced yet.  Whatever the table holds is stale.
        self.mod_union_table.clear_all();
        debug_assert!(self.mark_stack.lock().unwrap().is_empty());
        self.overflow_list.assert_drained();

        let roots = self.collect_roots();
        if self.options.parallel_initial_mark && self.workers.total_workers() > 1 {
            let task = InitialMarkTask {
                collector: self,
                roots: &roots,
                tasks: SequentialSubTasks::new(roots.len().div_ceil(ROOTS_PER_TASK)),
            };
            let n_workers = self
                .workers
                .total_workers()
                .min(task.tasks.n_tasks())
                .max(1);
            self.workers.run_task(&task, vec![(); n_workers]);
        } else {
            for root in roots.iter() {
                self.mark_if_unmarked(*root);
            }
        }

        self.set_state(CollectorState::Marking);
        VM::VMCollection::resume_mutators();
        let pause = start.elapsed();
        self.stats.lock().unwrap().record_pause(pause);
        log::debug!("Initial mark: {} roots in {:?}", roots.len(), pause);
        Ok(())
    }

    /// The roots, and the references from the young generation, that point into the old
    /// generation.  Called with the mutators stopped.
    pub(super) fn collect_roots(&self) -> Vec<ObjectReference> {
        let mut roots = vec![];
        let mut visitor = |object: ObjectReference| {
            if self.is_in_old_gen(object) {
                roots.push(object);
            }
        };
        VM::VMScanning::scan_roots(&mut visitor);
        VM::VMScanning::scan_young_gen_as_roots(&mut visitor);
        roots
    }
}

struct InitialMarkTask<'a, VM: VMBinding> {
    collector: &'a CMSCollector<VM>,
    roots: &'a [ObjectReference],
    tasks: SequentialSubTasks,
}

impl<VM: VMBinding> GangTask for InitialMarkTask<'_, VM> {
    type Local = ();

    fn name(&self) -> &'static str {
        "initial mark"
    }

    fn work(&self, _worker_id: usize, _local: ()) {
        while let Some(t) = self.tasks.try_claim_task() {
            let start = t * ROOTS_PER_TASK;
            let end = (start + ROOTS_PER_TASK).min(self.roots.len());
            for root in &self.roots[start..end] {
                self.collector.mark_if_unmarked(*root);
            }
        }
    }
}
