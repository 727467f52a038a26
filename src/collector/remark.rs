//! The final remark pause: complete the marking with the mutators stopped.

use std::time::Instant;

use super::{CMSCollector, CollectorState, PhaseResult, TokenGuard};
use crate::policy::cms_space::FreeListGuard;
use crate::util::log;
use crate::util::ObjectReference;
use crate::vm::{Collection, Scanning, VMBinding};

impl<VM: VMBinding> CMSCollector<VM> {
    pub(super) fn checkpoint_roots_final(
        &self,
        token: &mut TokenGuard,
        epoch: usize,
    ) -> PhaseResult {
        debug_assert_eq!(self.state(), CollectorState::FinalMarking);
        self.stop_world_for_pause(token, epoch)?;
        let start = Instant::now();
        {
            let g = self.space.lock();
            let _bm = self.mark_bits.lock();
            self.mark_stw(&g, true);
            self.set_state(CollectorState::Sweeping);
        }
        VM::VMCollection::resume_mutators();
        let pause = start.elapsed();
        self.stats.lock().unwrap().record_pause(pause);
        log::debug!("Final remark: {:?}", pause);
        Ok(())
    }

    /// Mark everything reachable with the mutators stopped.  If `rescan_cards` is set, marking
    /// resumes from the current marks: the roots are marked again and every card dirtied since
    /// marking started is rescanned.  Otherwise the marks start out empty and the whole heap is
    /// traced from the roots.  The runtime's weak references are processed last.
    pub(super) fn mark_stw(&self, g: &FreeListGuard, rescan_cards: bool) {
        let roots = self.collect_roots();
        let cards = if rescan_cards {
            let used = self.space.used_region();
            let moved = self
                .mod_union_table
                .transfer_dirty_cards(&self.card_table, used.clone());
            log::trace!("Remark: {} dirty cards in the card table", moved);
            used
        } else {
            let bottom = self.space.bottom();
            bottom..bottom
        };

        if self.options.parallel_remark && self.workers.total_workers() > 1 {
            self.par_mark_stw(&roots, cards);
        } else {
            let mut stack = self.mark_stack.lock().unwrap();
            for root in roots.iter() {
                if self.mark_if_unmarked(*root) {
                    self.push_or_overflow(&mut stack, *root);
                }
            }
            self.drain_mark_stack(&mut stack);
            self.mod_union_table
                .dirty_range_iterate_clear(cards, |region| {
                    self.rescan_dirty_region(
                        region,
                        |child| self.push_or_overflow(&mut stack, child),
                        || false,
                    );
                    self.drain_mark_stack(&mut stack);
                });
        }
        self.overflow_list.assert_drained();
        debug_assert!(self.mark_stack.lock().unwrap().is_empty());

        VM::VMScanning::process_weak_refs(&|object: ObjectReference| self.is_alive(object));

        if self.options.verify_after_remark {
            self.verify_after_remark(g);
        }
    }
}
