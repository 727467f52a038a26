//! The concurrent sweep.

use std::sync::atomic::Ordering;
use std::time::Instant;

use super::{CMSCollector, CollectorState, PhaseResult, TokenGuard};
use crate::policy::cms_space::sweep::CoalescePolicy;
use crate::policy::cms_space::{FreeListGuard, SweepClosure};
use crate::util::log;
use crate::vm::VMBinding;

impl<VM: VMBinding> CMSCollector<VM> {
    /// Sweep the space, giving the locks up whenever someone waits for them.  Blocks allocated
    /// meanwhile are marked, so the sweeper leaves them alone.
    pub(super) fn sweep(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        debug_assert_eq!(self.state(), CollectorState::Sweeping);
        let start = Instant::now();
        let policy = CoalescePolicy::from_option(self.options.coalesce_policy);

        let mut g = self.space.lock();
        let mut bm = self.mark_bits.lock();
        self.begin_sweep(&g);
        let mut sweeper = SweepClosure::new(&self.space, &self.mark_bits, policy);
        let mut addr = self.space.bottom();
        while addr < sweeper.limit() {
            addr = addr.add_words(sweeper.do_blk_careful(&g, addr));
            if addr < sweeper.limit() && self.should_yield() {
                sweeper.flush_before_yield(&g, addr);
                drop(bm);
                drop(g);
                self.do_yield(token, epoch)?;
                g = self.space.lock();
                bm = self.mark_bits.lock();
            }
        }
        let stats = sweeper.finish(&g, addr);
        self.end_sweep(&g);
        self.stats.lock().unwrap().last_sweep = stats;
        log::debug!(
            "Concurrent sweep: {} objects ({} words) freed, {} live, {:?}",
            stats.objects_freed,
            stats.words_freed,
            stats.objects_live,
            start.elapsed()
        );
        // Mutators read the state under the free list lock to decide whether to mark what they
        // allocate.
        self.set_state(CollectorState::Resizing);
        drop(bm);
        drop(g);
        Ok(())
    }

    pub(super) fn begin_sweep(&self, g: &FreeListGuard) {
        debug_assert!(!self.sweep_in_progress.load(Ordering::SeqCst));
        self.sweep_in_progress.store(true, Ordering::SeqCst);
        self.space.begin_sweep(g);
        if self.options.verify_free_lists {
            self.verify_space(g);
        }
    }

    /// Close the sweep, if one is open.
    pub(super) fn end_sweep(&self, g: &FreeListGuard) {
        if self.sweep_in_progress.swap(false, Ordering::SeqCst) {
            self.space.end_sweep(g);
            if self.options.verify_free_lists {
                self.verify_space(g);
            }
        }
    }

    fn verify_space(&self, g: &FreeListGuard) {
        self.space.verify_free_lists(g);
        self.space.verify_conservation(g);
        self.space.verify_single_owner(g);
    }
}
