//! Parallel marking with a gang of workers.
//!
//! Concurrent marking splits the space into fixed size tasks claimed in address order.  The
//! *global finger* is the end of the highest claimed task.  A worker that marks an object
//! pushes it only if some task below the global finger may already have passed it; anything
//! above is found by the bit map walk of a later task.  Objects starting in a task belong to
//! it, even if they extend into the next one.
//!
//! The stop-the-world phases (final remark and foreground collection) share one task that
//! marks from the roots, rescans the dirty cards of the mod union table, and then traces the
//! closure with work stealing.

use std::ops::Range;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};

use super::{CMSCollector, PhaseResult, TokenGuard};
use crate::scheduler::{
    GangTask, LocalQueue, ParallelTaskTerminator, SequentialSubTasks, TaskQueueSet,
};
use crate::util::constants::BYTES_IN_CARD;
use crate::util::log;
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

const NO_RESTART: usize = usize::MAX;

/// Workers check for a yield request after scanning this many objects.
const OBJECTS_PER_YIELD_CHECK: usize = 64;

/// Roots are handed to the stop-the-world workers in chunks of this many.
const ROOTS_PER_TASK: usize = 256;

impl<VM: VMBinding> CMSCollector<VM> {
    pub(super) fn do_marking_mt(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        let n_workers = self.conc_workers.total_workers();
        let mut from = self.space.bottom();
        loop {
            let (queues, locals) =
                TaskQueueSet::new(n_workers, self.options.work_queue_capacity);
            let task = ConcMarkingTask::new(self, from..self.space.end(), queues, n_workers);
            self.conc_workers.run_task(&task, locals);
            if !task.yielded.load(Ordering::SeqCst) {
                break;
            }
            let restart = task.restart_point();
            log::trace!("Concurrent marking yields, will restart at {:?}", restart);
            self.do_yield(token, epoch)?;
            from = restart.unwrap_or_else(|| self.space.end());
        }
        debug_assert!(self.overflow_list.is_empty());
        Ok(())
    }

    /// The first block that starts at or after `addr`.
    fn first_block_at_or_after(&self, addr: Address) -> Address {
        if addr >= self.space.end() {
            return addr;
        }
        let _g = self.space.lock();
        let _bm = self.mark_bits.lock();
        let block = self.space.block_start(addr);
        if block == addr {
            addr
        } else {
            block.add_words(self.space.block_size(block))
        }
    }

    /// Mark from `roots` and, if `cards` is not empty, the dirty cards of the mod union table in
    /// `cards`, then trace the closure with the stop-the-world workers.
    pub(super) fn par_mark_stw(&self, roots: &[ObjectReference], cards: Range<Address>) {
        let n_workers = self.workers.total_workers();
        let (queues, locals) = TaskQueueSet::new(n_workers, self.options.work_queue_capacity);
        let card_task_bytes = self.options.rescan_task_cards * BYTES_IN_CARD;
        let n_card_tasks = if cards.start < cards.end {
            (cards.end - cards.start).div_ceil(card_task_bytes)
        } else {
            0
        };
        let task = ParMarkTask {
            collector: self,
            roots,
            root_tasks: SequentialSubTasks::new(roots.len().div_ceil(ROOTS_PER_TASK)),
            cards,
            card_task_bytes,
            card_tasks: SequentialSubTasks::new(n_card_tasks),
            queues,
            terminator: ParallelTaskTerminator::new(n_workers),
        };
        self.workers.run_task(&task, locals);
        debug_assert!(self.overflow_list.is_empty());
    }
}

fn push_or_overflow<VM: VMBinding>(
    collector: &CMSCollector<VM>,
    queue: &LocalQueue<ObjectReference>,
    object: ObjectReference,
) {
    if let Err(object) = queue.push(object) {
        collector.overflow_list.par_push(object);
    }
}

struct ConcMarkingTask<'a, VM: VMBinding> {
    collector: &'a CMSCollector<VM>,
    span: Range<Address>,
    task_bytes: usize,
    tasks: SequentialSubTasks,
    global_finger: AtomicUsize,
    queues: TaskQueueSet<ObjectReference>,
    terminator: ParallelTaskTerminator,
    /// The lowest address where an interrupted task stopped.
    restart: AtomicUsize,
    yielded: AtomicBool,
}

impl<'a, VM: VMBinding> ConcMarkingTask<'a, VM> {
    fn new(
        collector: &'a CMSCollector<VM>,
        span: Range<Address>,
        queues: TaskQueueSet<ObjectReference>,
        n_workers: usize,
    ) -> Self {
        let task_bytes = collector.options.marking_task_cards * BYTES_IN_CARD;
        let n_tasks = if span.start < span.end {
            (span.end - span.start).div_ceil(task_bytes)
        } else {
            0
        };
        ConcMarkingTask {
            collector,
            global_finger: AtomicUsize::new(span.start.as_usize()),
            span,
            task_bytes,
            tasks: SequentialSubTasks::new(n_tasks),
            queues,
            terminator: ParallelTaskTerminator::new(n_workers),
            restart: AtomicUsize::new(NO_RESTART),
            yielded: AtomicBool::new(false),
        }
    }

    fn task_range(&self, t: usize) -> Range<Address> {
        let start = self.span.start + t * self.task_bytes;
        let end = if self.span.end - start > self.task_bytes {
            start + self.task_bytes
        } else {
            self.span.end
        };
        start..end
    }

    /// Where the next pass has to start, if anything was left unscanned.
    fn restart_point(&self) -> Option<Address> {
        let mut restart = self.restart.load(Ordering::SeqCst);
        let claimed = self.tasks.claimed();
        if claimed < self.tasks.n_tasks() {
            restart = restart.min(self.task_range(claimed).start.as_usize());
        }
        if restart == NO_RESTART {
            None
        } else {
            Some(Address::from_usize(restart))
        }
    }

    fn record_restart(&self, addr: Address) {
        self.restart.fetch_min(addr.as_usize(), Ordering::SeqCst);
    }

    /// Whether the worker should stop.  The first worker that sees a yield request stops them
    /// all.
    fn should_stop(&self) -> bool {
        if self.terminator.is_aborted() {
            return true;
        }
        if self.collector.should_yield() {
            self.yielded.store(true, Ordering::SeqCst);
            self.terminator.abort();
            return true;
        }
        false
    }

    /// Scan a grey object.  `own` is the unwalked part of the worker's current task, whose
    /// objects its own bit map walk will find.
    fn scan_grey(
        &self,
        queue: &LocalQueue<ObjectReference>,
        object: ObjectReference,
        own: Option<Range<Address>>,
    ) {
        let collector = self.collector;
        collector.scan_object(object, |child| {
            if !collector.mark_if_unmarked(child) {
                return;
            }
            // Pairs with the fence after a task is claimed.
            fence(Ordering::SeqCst);
            let addr = child.to_raw_address();
            if addr.as_usize() >= self.global_finger.load(Ordering::SeqCst) {
                return;
            }
            if own.as_ref().is_some_and(|own| own.contains(&addr)) {
                return;
            }
            push_or_overflow(collector, queue, child);
        });
    }

    /// Empty the local queue, refilling it from the overflow list.  Returns false if the worker
    /// has to stop.
    fn drain_local(
        &self,
        queue: &LocalQueue<ObjectReference>,
        own: Option<Range<Address>>,
    ) -> bool {
        let collector = self.collector;
        let mut scanned = 0;
        loop {
            while let Some(object) = queue.pop() {
                self.scan_grey(queue, object, own.clone());
                scanned += 1;
                if scanned % OBJECTS_PER_YIELD_CHECK == 0 && self.should_stop() {
                    return false;
                }
            }
            let taken = collector
                .overflow_list
                .par_take(collector.options.overflow_take_count, |object| {
                    push_or_overflow(collector, queue, object)
                });
            if taken == 0 {
                return true;
            }
        }
    }

    /// Walk the bit map of `range`.  Returns the address to restart from if the worker had to
    /// stop.
    fn scan_task(
        &self,
        queue: &LocalQueue<ObjectReference>,
        range: Range<Address>,
    ) -> Option<Address> {
        let collector = self.collector;
        let mut finger = collector.first_block_at_or_after(range.start);
        while finger < range.end {
            let addr = collector
                .mark_bits
                .get_next_marked_word_address(finger, range.end);
            if addr >= range.end {
                break;
            }
            if let Some(size) = collector.size_of_block_allocated_while_marking(addr) {
                finger = addr.add_words(size);
                continue;
            }
            if self.should_stop() {
                return Some(addr);
            }
            finger = addr.add_words(collector.space.block_size(addr));
            let own = finger..range.end;
            let object = ObjectReference::from_raw_address(addr);
            self.scan_grey(queue, object, Some(own.clone()));
            if !self.drain_local(queue, Some(own)) {
                return Some(finger);
            }
        }
        None
    }

    fn steal_work(&self, worker_id: usize, queue: &LocalQueue<ObjectReference>) {
        loop {
            if !self.drain_local(queue, None) {
                return;
            }
            if let Some(object) = self.queues.steal(worker_id) {
                self.scan_grey(queue, object, None);
                continue;
            }
            let overflow = &self.collector.overflow_list;
            if self
                .terminator
                .offer_termination(|| self.queues.peek(worker_id) || !overflow.is_empty())
            {
                return;
            }
        }
    }
}

impl<VM: VMBinding> GangTask for ConcMarkingTask<'_, VM> {
    type Local = LocalQueue<ObjectReference>;

    fn name(&self) -> &'static str {
        "concurrent marking"
    }

    fn work(&self, worker_id: usize, queue: LocalQueue<ObjectReference>) {
        while let Some(t) = self.tasks.try_claim_task() {
            let range = self.task_range(t);
            self.global_finger
                .fetch_max(range.end.as_usize(), Ordering::SeqCst);
            fence(Ordering::SeqCst);
            if self.should_stop() {
                self.record_restart(range.start);
                break;
            }
            if let Some(stopped_at) = self.scan_task(&queue, range) {
                self.record_restart(stopped_at);
                break;
            }
        }
        if !self.terminator.is_aborted() {
            self.steal_work(worker_id, &queue);
        }
        // Grey objects left behind are picked up by the next pass.
        while let Some(object) = queue.pop() {
            self.collector.overflow_list.par_push(object);
        }
    }
}

struct ParMarkTask<'a, VM: VMBinding> {
    collector: &'a CMSCollector<VM>,
    roots: &'a [ObjectReference],
    root_tasks: SequentialSubTasks,
    cards: Range<Address>,
    card_task_bytes: usize,
    card_tasks: SequentialSubTasks,
    queues: TaskQueueSet<ObjectReference>,
    terminator: ParallelTaskTerminator,
}

impl<VM: VMBinding> ParMarkTask<'_, VM> {
    fn trace(&self, queue: &LocalQueue<ObjectReference>) {
        let collector = self.collector;
        loop {
            while let Some(object) = queue.pop() {
                collector.scan_object(object, |child| {
                    if collector.mark_if_unmarked(child) {
                        push_or_overflow(collector, queue, child);
                    }
                });
            }
            let taken = collector
                .overflow_list
                .par_take(collector.options.overflow_take_count, |object| {
                    push_or_overflow(collector, queue, object)
                });
            if taken == 0 {
                return;
            }
        }
    }
}

impl<VM: VMBinding> GangTask for ParMarkTask<'_, VM> {
    type Local = LocalQueue<ObjectReference>;

    fn name(&self) -> &'static str {
        "parallel remark"
    }

    fn work(&self, worker_id: usize, queue: LocalQueue<ObjectReference>) {
        let collector = self.collector;
        while let Some(t) = self.root_tasks.try_claim_task() {
            let start = t * ROOTS_PER_TASK;
            let end = (start + ROOTS_PER_TASK).min(self.roots.len());
            for root in &self.roots[start..end] {
                if collector.mark_if_unmarked(*root) {
                    push_or_overflow(collector, &queue, *root);
                }
            }
            self.trace(&queue);
        }
        while let Some(t) = self.card_tasks.try_claim_task() {
            let start = self.cards.start + t * self.card_task_bytes;
            let end = if self.cards.end - start > self.card_task_bytes {
                start + self.card_task_bytes
            } else {
                self.cards.end
            };
            collector
                .mod_union_table
                .dirty_range_iterate_clear(start..end, |region| {
                    collector.rescan_dirty_region(
                        region,
                        |child| push_or_overflow(collector, &queue, child),
                        || false,
                    );
                    self.trace(&queue);
                });
        }
        loop {
            self.trace(&queue);
            if let Some(object) = self.queues.steal(worker_id) {
                push_or_overflow(collector, &queue, object);
                continue;
            }
            let overflow = &collector.overflow_list;
            if self
                .terminator
                .offer_termination(|| self.queues.peek(worker_id) || !overflow.is_empty())
            {
                break;
            }
        }
    }
}
