use std::time::Instant;

use super::{CMSCollector, CollectorState, PhaseResult, TokenGuard};
use crate::util::conversions::bytes_to_words;
use crate::util::log;
use crate::vm::VMBinding;

impl<VM: VMBinding> CMSCollector<VM> {
    /// Clear the mark bit map for the next cycle, yielding between chunks.  Nothing marks
    /// blocks in this state, so the map is cleared without the bit map lock.
    pub(super) fn reset(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        debug_assert_eq!(self.state(), CollectorState::Resetting);
        let start = Instant::now();
        let quantum = bytes_to_words(self.options.bitmap_yield_quantum).max(1);
        let mut outcome = Ok(());
        let stopped = self.mark_bits.clear_in_chunks(quantum, || {
            if self.should_yield() {
                outcome = self.do_yield(token, epoch);
            }
            outcome.is_ok()
        });
        if let Some(at) = stopped {
            log::debug!("Reset interrupted at {}", at);
            return outcome;
        }
        debug_assert!(self.mark_bits.is_all_clear());

        self.mark_stack.lock().unwrap().reset();
        let overflowed = self.overflow_list.pushed();
        if overflowed > 0 {
            log::debug!("{} objects went through the overflow list this cycle", overflowed);
        }
        self.overflow_list.reset_stats();
        log::debug!("Reset: {:?}", start.elapsed());
        self.set_state(CollectorState::Idling);
        Ok(())
    }
}
