//! The foreground collection: a complete stop-the-world mark and sweep.
//!
//! A foreground collection takes the CMS token from the background thread at its next yield
//! point.  Whatever phase the background cycle was in, even one past its remark, the foreground
//! collection marks from scratch, sweeps the whole space with coalescing forced on, and leaves
//! the collector idle.
//! The background thread notices the new cycle epoch when it gets the token back and abandons
//! its cycle.

use std::sync::atomic::Ordering;
use std::time::Instant;

use super::token::TokenSide;
use super::{CMSCollector, CollectorState, GcCause};
use crate::policy::cms_space::sweep::CoalescePolicy;
use crate::policy::cms_space::FreeListGuard;
use crate::util::log;
use crate::vm::{Collection, VMBinding};

impl<VM: VMBinding> CMSCollector<VM> {
    /// Collect the old generation now, on the calling thread.  Returns with the mutators
    /// resumed and the collector idle.
    pub fn collect(&self, cause: GcCause) {
        self.foreground_gc_is_active.store(true, Ordering::SeqCst);
        // Mutators first: a background pause may be waiting for them without the token.
        VM::VMCollection::stop_all_mutators();
        let token = self.token.acquire(TokenSide::Vm);
        let start = Instant::now();
        let interrupted = self.state();
        log::info!(
            "CMS foreground collection started: {:?}, background cycle in {:?}",
            cause,
            interrupted
        );
        {
            let g = self.space.lock();
            let _bm = self.mark_bits.lock();
            self.do_compaction_work(&g, cause);
        }
        let pause = start.elapsed();
        {
            let mut stats = self.stats.lock().unwrap();
            stats.foreground_cycles += 1;
            stats.record_pause(pause);
            log::info!(
                "CMS foreground collection finished in {:?}: {}",
                pause,
                stats.cycle_summary()
            );
        }
        // Before the token is released, so a waiting background phase sees it.
        self.cycle_epoch.fetch_add(1, Ordering::SeqCst);
        self.full_gc_requested.store(false, Ordering::SeqCst);
        drop(token);
        self.foreground_gc_is_active.store(false, Ordering::SeqCst);
        VM::VMCollection::resume_mutators();
    }

    /// Run a whole mark and sweep with the mutators stopped, whatever state the background
    /// cycle was left in.  The space cannot move objects, so compacting means coalescing every
    /// run of free blocks.
    fn do_compaction_work(&self, g: &FreeListGuard, cause: GcCause) {
        if self.state() == CollectorState::Idling {
            self.stats.lock().unwrap().begin_cycle(cause);
            self.set_state(CollectorState::InitialMarking);
        }
        // A background sweep that yielded is still open.
        self.end_sweep(g);

        // The marks of an interrupted cycle are incomplete, or stale once its remark is over.
        self.mark_bits.clear_all();
        self.mod_union_table.clear_all();
        self.overflow_list.clear();
        self.mark_stack.lock().unwrap().reset();
        self.mark_stw(g, false);

        self.advance_state_to(CollectorState::Sweeping);
        let stats = self
            .space
            .sweep(g, &self.mark_bits, CoalescePolicy::Always);
        log::debug!(
            "Foreground sweep: {} objects ({} words) freed, {} live",
            stats.objects_freed,
            stats.words_freed,
            stats.objects_live
        );
        self.stats.lock().unwrap().last_sweep = stats;

        self.advance_state_to(CollectorState::Resizing);
        self.compute_new_size(g);

        self.advance_state_to(CollectorState::Resetting);
        self.mark_bits.clear_all();
        self.mark_stack.lock().unwrap().reset();
        self.overflow_list.reset_stats();
        self.set_state(CollectorState::Idling);
    }

    /// Step through the states of the cycle up to `target`.  A state the background cycle had
    /// already passed is not entered again.
    fn advance_state_to(&self, target: CollectorState) {
        while self.state() < target {
            self.set_state(self.state().next());
        }
    }
}
