//! The concurrent mark-sweep collector of the old generation.
//!
//! A cycle moves through the [`CollectorState`]s in order.  The two marking pauses stop the
//! mutators; every other phase runs concurrently with them on the background thread and yields
//! at its yield points to young collections, foreground collections, and mutators waiting for
//! the free list lock.
//!
//! Lock order: the CMS token, the free list lock, the bit map lock, then the mark stack.

mod controller;
mod full_gc;
mod initial_mark;
pub mod mark_stack;
mod marking;
pub mod overflow_list;
mod par_marking;
mod preclean;
mod remark;
mod reset;
mod resize;
pub mod state;
mod stats;
mod sweeping;
pub mod token;
mod trigger;
mod verify;
mod young;

pub use self::controller::ConcurrentMarkSweepThread;
pub use self::state::{CollectorState, ExpansionCause, GcCause};
pub use self::stats::CollectorStats;
pub use self::young::YoungGcScope;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use atomic::Atomic;

use self::controller::ControllerMonitor;
use self::mark_stack::MarkStack;
use self::overflow_list::OverflowList;
use self::token::{CmsToken, TokenGuard, TokenSide};
use crate::policy::cms_space::{FreeListGuard, FreeListSpace};
use crate::scheduler::WorkGang;
use crate::util::bitmap::MarkBitMap;
use crate::util::card_table::CardTable;
use crate::util::constants::BYTES_IN_CARD;
use crate::util::conversions::{
    adjust_object_size, bytes_to_words, raw_align_up, words_to_bytes,
};
use crate::util::log;
use crate::util::mod_union_table::ModUnionTable;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::{Collection, VMBinding};

/// A yielding collector gives up waiting for mutators after this many naps and carries on.
const MAX_YIELD_SLEEPS: usize = 32;

/// Returned by the phases of a background cycle when a foreground collection has finished the
/// cycle in the meantime.  The background thread then abandons the cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Preempted;

pub type PhaseResult = Result<(), Preempted>;

pub struct CMSCollector<VM: VMBinding> {
    options: Arc<Options>,
    space: FreeListSpace,
    card_table: CardTable,
    mark_bits: Arc<MarkBitMap>,
    mod_union_table: ModUnionTable,
    mark_stack: Mutex<MarkStack>,
    overflow_list: OverflowList,
    token: CmsToken,
    state: Atomic<CollectorState>,
    /// Incremented by every foreground collection before it releases the token.  A background
    /// phase that sees a different value after reacquiring the token has been preempted.
    cycle_epoch: AtomicUsize,
    foreground_gc_is_active: AtomicBool,
    full_gc_requested: AtomicBool,
    /// Between `begin_sweep` and `end_sweep` of the space.
    sweep_in_progress: AtomicBool,
    last_expansion_cause: Atomic<ExpansionCause>,
    /// Bytes promoted since the last young collection epilogue.
    promoted_bytes: AtomicUsize,
    stats: Mutex<CollectorStats>,
    started_at: Instant,
    monitor: ControllerMonitor,
    /// For the stop-the-world phases.
    workers: WorkGang,
    /// For concurrent marking.
    conc_workers: WorkGang,
    #[cfg(feature = "mock_test")]
    phase_gate: crate::util::test_util::PhaseGate,
    phantom: PhantomData<VM>,
}

impl<VM: VMBinding> CMSCollector<VM> {
    pub fn new(options: Arc<Options>) -> Self {
        options.check_consistency();
        let start = options.heap_start;
        let reserved = raw_align_up(options.max_heap_size, BYTES_IN_CARD);
        let reserved_words = bytes_to_words(reserved);
        let mark_bits = Arc::new(MarkBitMap::new(start, reserved_words, 0));
        let space = FreeListSpace::new(options.clone(), mark_bits.clone());
        let collector = CMSCollector {
            card_table: CardTable::new(start, reserved),
            mod_union_table: ModUnionTable::new(start, reserved_words),
            mark_stack: Mutex::new(MarkStack::new(
                options.mark_stack_size,
                options.mark_stack_size_max,
            )),
            overflow_list: OverflowList::new(start, reserved_words),
            token: CmsToken::new(),
            state: Atomic::new(CollectorState::Idling),
            cycle_epoch: AtomicUsize::new(0),
            foreground_gc_is_active: AtomicBool::new(false),
            full_gc_requested: AtomicBool::new(false),
            sweep_in_progress: AtomicBool::new(false),
            last_expansion_cause: Atomic::new(ExpansionCause::NoExpansion),
            promoted_bytes: AtomicUsize::new(0),
            stats: Mutex::new(CollectorStats::new()),
            started_at: Instant::now(),
            monitor: ControllerMonitor::new(),
            workers: WorkGang::new("CMS worker", options.threads),
            conc_workers: WorkGang::new("CMS concurrent worker", options.conc_threads),
            #[cfg(feature = "mock_test")]
            phase_gate: Default::default(),
            space,
            mark_bits,
            options,
            phantom: PhantomData,
        };
        log::info!(
            "CMS old generation: {}..{}, reserved up to {}, {} STW and {} concurrent workers",
            collector.space.bottom(),
            collector.space.end(),
            collector.space.reserved_end(),
            collector.workers.total_workers(),
            collector.conc_workers.total_workers()
        );
        collector
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn space(&self) -> &FreeListSpace {
        &self.space
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    pub fn mark_bits(&self) -> &MarkBitMap {
        &self.mark_bits
    }

    pub fn mod_union_table(&self) -> &ModUnionTable {
        &self.mod_union_table
    }

    pub fn token(&self) -> &CmsToken {
        &self.token
    }

    pub fn state(&self) -> CollectorState {
        self.state.load(Ordering::SeqCst)
    }

    /// Only called by the holder of the token.
    fn set_state(&self, state: CollectorState) {
        let prev = self.state.swap(state, Ordering::SeqCst);
        log::debug!("CMS state: {:?} -> {:?}", prev, state);
        self.stats.lock().unwrap().record_state(state);
    }

    pub fn cycle_epoch(&self) -> usize {
        self.cycle_epoch.load(Ordering::SeqCst)
    }

    fn check_epoch(&self, epoch: usize) -> PhaseResult {
        if self.cycle_epoch() == epoch {
            Ok(())
        } else {
            Err(Preempted)
        }
    }

    #[cfg(feature = "mock_test")]
    pub fn phase_gate(&self) -> &crate::util::test_util::PhaseGate {
        &self.phase_gate
    }

    pub fn stats(&self) -> MutexGuard<'_, CollectorStats> {
        self.stats.lock().unwrap()
    }

    pub fn last_expansion_cause(&self) -> ExpansionCause {
        self.last_expansion_cause.load(Ordering::Relaxed)
    }

    pub fn is_foreground_gc_active(&self) -> bool {
        self.foreground_gc_is_active.load(Ordering::SeqCst)
    }

    /// Ask the background thread to start a cycle as soon as it can.
    pub fn request_full_gc(&self) {
        self.full_gc_requested.store(true, Ordering::SeqCst);
        self.monitor.notify();
    }

    pub fn full_gc_requested(&self) -> bool {
        self.full_gc_requested.load(Ordering::SeqCst)
    }

    /// Whether `object` is in the old generation.  Null and young references are not.
    pub fn is_in_old_gen(&self, object: ObjectReference) -> bool {
        !object.is_null() && self.space.contains(object.to_raw_address())
    }

    /// Whether `object` survives the current cycle as far as marking can tell.  Objects outside
    /// the old generation are never collected by this collector.
    pub fn is_alive(&self, object: ObjectReference) -> bool {
        !self.is_in_old_gen(object) || self.mark_bits.is_marked(object.to_raw_address())
    }

    // Yielding

    /// Whether the background collector should give up the token and its locks.  A waiting
    /// young or foreground collection always wins.  Mutators waiting for a lock only win if
    /// `cms_yield` is set.
    fn should_yield(&self) -> bool {
        self.token.vm_wants_token() || (self.options.cms_yield && self.token.pending_yields() > 0)
    }

    /// The caller has dropped the free list and bit map locks.
    fn do_yield(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        self.stats.lock().unwrap().yields += 1;
        token.yield_token(
            Duration::from_millis(self.options.yield_sleep_millis),
            MAX_YIELD_SLEEPS,
        );
        self.check_epoch(epoch)
    }

    /// Stop the mutators for a pause of the background cycle.  The token is given up while
    /// waiting, since the mutators may be stopped by a foreground collection that needs it.
    fn stop_world_for_pause(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        token.released(VM::VMCollection::stop_all_mutators);
        if self.check_epoch(epoch).is_err() {
            VM::VMCollection::resume_mutators();
            return Err(Preempted);
        }
        Ok(())
    }

    // The background cycle

    /// Run one concurrent cycle on the calling thread, normally the background thread.  Returns
    /// early if a foreground collection takes the cycle over.
    pub fn collect_in_background(&self, cause: GcCause) {
        if self.is_foreground_gc_active() {
            log::debug!("Foreground collection active, skipping background cycle");
            return;
        }
        let mut token = self.token.acquire(TokenSide::Cms);
        if self.state() != CollectorState::Idling {
            log::warn!("Background cycle requested in state {:?}", self.state());
            return;
        }
        let epoch = self.cycle_epoch();
        log::info!("CMS background cycle started: {:?}", cause);
        self.stats.lock().unwrap().begin_cycle(cause);
        self.full_gc_requested.store(false, Ordering::SeqCst);
        self.set_state(CollectorState::InitialMarking);

        match self.run_background_cycle(&mut token, epoch) {
            Ok(()) => {
                let mut stats = self.stats.lock().unwrap();
                stats.background_cycles += 1;
                log::info!("CMS background cycle finished: {}", stats.cycle_summary());
            }
            Err(Preempted) => {
                self.stats.lock().unwrap().preempted_cycles += 1;
                log::info!("CMS background cycle was finished by a foreground collection");
            }
        }
    }

    fn run_background_cycle(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        loop {
            #[cfg(feature = "mock_test")]
            self.phase_gate.pass(self.state());
            // Phase boundaries are yield points for young and foreground collections.
            if self.token.vm_wants_token() {
                self.do_yield(token, epoch)?;
            }
            match self.state() {
                CollectorState::InitialMarking => self.checkpoint_roots_initial(token, epoch)?,
                CollectorState::Marking => self.mark_from_roots(token, epoch)?,
                CollectorState::Precleaning => self.preclean(token, epoch)?,
                CollectorState::AbortablePreclean => self.abortable_preclean(token, epoch)?,
                CollectorState::FinalMarking => self.checkpoint_roots_final(token, epoch)?,
                CollectorState::Sweeping => self.sweep(token, epoch)?,
                CollectorState::Resizing => {
                    let g = self.space.lock();
                    self.compute_new_size(&g);
                    self.set_state(CollectorState::Resetting);
                }
                CollectorState::Resetting => self.reset(token, epoch)?,
                CollectorState::Idling => return Ok(()),
            }
        }
    }

    // Mutator and young generation hooks

    /// Take the free list lock on behalf of a mutator.  If the background collector holds it,
    /// ask it to yield.
    pub(crate) fn lock_free_list_for_mutator(&self) -> FreeListGuard<'_> {
        if let Some(g) = self.space.try_lock() {
            return g;
        }
        let _request = self.token.request_yield();
        self.space.lock()
    }

    /// Record a block handed out by the space while the free list lock is held.  While the
    /// marker or the sweeper may already have passed its address, the block is marked live,
    /// with its size recorded in the bit map as it has no header yet.
    pub fn direct_allocated(&self, _g: &FreeListGuard, block: Address, size: usize) {
        if self.state().allocation_needs_marking() {
            let _bm = self.mark_bits.try_lock().unwrap_or_else(|| {
                let _request = self.token.request_yield();
                self.mark_bits.lock()
            });
            self.mark_bits.mark_uninitialized_block(block, size);
        }
    }

    /// Record an object promoted by a young collection.  It is marked live while a cycle is
    /// marking or sweeping, and its cards are recorded for the final remark while a cycle is
    /// marking.
    pub fn promoted(&self, object: ObjectReference, size: usize) {
        self.promoted_bytes
            .fetch_add(words_to_bytes(size), Ordering::Relaxed);
        let state = self.state();
        if state.allocation_needs_marking() {
            let start = object.to_raw_address();
            self.mark_bits.par_mark(start);
            if state.promotion_needs_rescan() {
                self.mod_union_table.mark_range(start..start.add_words(size));
            }
        }
    }

    /// Called before the young generation scans the old generation's dirty cards in `range`.
    /// The scan cleans the cards, so while a cycle still needs them they are kept in the mod
    /// union table.
    pub fn clear_cards_for_young_scan(&self, range: std::ops::Range<Address>) {
        if self.state().is_precleaning_window() {
            let moved = self
                .mod_union_table
                .transfer_dirty_cards(&self.card_table, range);
            log::trace!("Moved {} dirty cards to the mod union table", moved);
        }
    }

    /// Commit at least `min_bytes` and preferably `bytes` more bytes, remembering why.
    pub fn expand_for_gc_cause(
        &self,
        g: &FreeListGuard,
        bytes: usize,
        min_bytes: usize,
        cause: ExpansionCause,
    ) -> bool {
        let expanded = self.space.expand(g, bytes.max(min_bytes))
            || (min_bytes < bytes && self.space.expand(g, min_bytes));
        if expanded {
            self.last_expansion_cause.store(cause, Ordering::Relaxed);
            log::debug!("Expanded the old generation: {:?}", cause);
        }
        expanded
    }

    /// Allocate `size` words for a mutator, expanding and then collecting as needed.  Returns
    /// `None` if even a full collection did not make room.
    pub fn allocate(&self, size: usize) -> Option<Address> {
        let bytes = words_to_bytes(size);
        if let Some(block) = self.try_allocate_or_expand(size) {
            return Some(block);
        }
        log::debug!("Allocation of {} bytes failed, collecting", bytes);
        self.collect(GcCause::AllocationFailure);
        self.try_allocate_or_expand(size)
    }

    fn try_allocate_or_expand(&self, size: usize) -> Option<Address> {
        let g = self.lock_free_list_for_mutator();
        let block = self.space.allocate(&g, size).or_else(|| {
            let bytes = words_to_bytes(size);
            if self.expand_for_gc_cause(
                &g,
                bytes.max(self.options.initial_heap_size / 8),
                bytes,
                ExpansionCause::SatisfyAllocation,
            ) {
                self.space.allocate(&g, size)
            } else {
                None
            }
        })?;
        self.direct_allocated(&g, block, adjust_object_size(size));
        Some(block)
    }

    // Marking helpers shared by the phases

    /// Mark `object` if it is an unmarked old generation object.  Returns true if this call
    /// marked it.
    fn mark_if_unmarked(&self, object: ObjectReference) -> bool {
        self.is_in_old_gen(object) && self.mark_bits.par_mark(object.to_raw_address())
    }

    /// If the marked block at `addr` was allocated during this cycle and may have no header
    /// yet, return its size.  Such blocks are not scanned by the marker: their contents are
    /// written after the allocation and reach the remark through dirty cards.
    fn size_of_block_allocated_while_marking(&self, addr: Address) -> Option<usize> {
        let printezis = self.mark_bits.is_marked(addr.add_words(1));
        if !printezis && self.space.block_is_obj(addr) {
            return None;
        }
        let _bm = self.mark_bits.lock();
        match self.mark_bits.block_size_from_marks(addr, self.space.end()) {
            Some(size) => Some(size),
            None => {
                log::error!("Marked block at {} has neither a header nor a size", addr);
                panic!("Marked block at {} has neither a header nor a size", addr);
            }
        }
    }

    /// Trace everything reachable from the mark stack and the overflow list.
    fn drain_mark_stack(&self, stack: &mut MarkStack) {
        loop {
            while let Some(object) = stack.pop() {
                self.scan_object(object, |child| {
                    if self.mark_if_unmarked(child) {
                        self.push_or_overflow(stack, child);
                    }
                });
            }
            let taken = self
                .overflow_list
                .par_take(self.options.overflow_take_count, |object| {
                    self.push_or_overflow(stack, object)
                });
            if taken == 0 && self.overflow_list.is_empty() {
                break;
            }
        }
    }

    /// Visit the references of `object`.  Blocks without a header are skipped.
    fn scan_object<F: FnMut(ObjectReference)>(&self, object: ObjectReference, f: F) {
        if self.space.block_is_obj(object.to_raw_address()) {
            self.space.heap().for_each_ref(object, f);
        }
    }

    /// Push `object` on `stack`, or on the overflow list if the stack is full.
    fn push_or_overflow(&self, stack: &mut MarkStack, object: ObjectReference) {
        if !stack.push(object) {
            self.overflow_list.par_push(object);
        }
    }

    /// Rescan the marked objects on the dirty cards covering `region`, passing the objects they
    /// newly mark to `push`.  After the first block, stops early if `stop` returns true,
    /// returning the address of the first block not rescanned.
    fn rescan_dirty_region<P, S>(
        &self,
        region: std::ops::Range<Address>,
        mut push: P,
        mut stop: S,
    ) -> Option<Address>
    where
        P: FnMut(ObjectReference),
        S: FnMut() -> bool,
    {
        let end = region.end.min(self.space.end());
        if region.start >= end {
            return None;
        }
        let first = self.space.block_start(region.start);
        let mut block = first;
        while block < end {
            if block != first && stop() {
                return Some(block);
            }
            let size = self.space.block_size(block);
            if self.mark_bits.is_marked(block) && self.space.block_is_obj(block) {
                self.scan_object(ObjectReference::from_raw_address(block), |child| {
                    if self.mark_if_unmarked(child) {
                        push(child);
                    }
                });
            }
            block = block.add_words(size);
        }
        None
    }
}
