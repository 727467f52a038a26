//! Precleaning: rescan the cards dirtied during marking while the mutators run, so the final
//! remark has less to do.
//!
//! A dirty card is cleared (mod union table) or flipped to precleaned (card table) before its
//! objects are rescanned, so a store racing with the rescan dirties it again.  A rescan
//! interrupted by a yield dirties the rest of its region again.

use std::ops::Range;
use std::time::{Duration, Instant};

use super::{CMSCollector, CollectorState, PhaseResult, Preempted, TokenGuard};
use crate::util::constants::BYTES_IN_CARD;
use crate::util::conversions::card_align_down;
use crate::util::log;
use crate::util::Address;
use crate::vm::{Collection, Scanning, VMBinding};

/// Which table a preclean pass works on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CardSource {
    ModUnionTable,
    CardTable,
}

impl<VM: VMBinding> CMSCollector<VM> {
    pub(super) fn preclean(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        debug_assert_eq!(self.state(), CollectorState::Precleaning);
        if self.options.precleaning_enabled {
            let start = Instant::now();
            VM::VMScanning::preclean_weak_refs();
            let mut last_cards = usize::MAX;
            for i in 0..self.options.preclean_iter {
                let cards = self.preclean_work(token, epoch)?;
                log::trace!("Preclean pass {}: {} cards", i, cards);
                // Stop once the dirty set is small, or not shrinking fast enough.
                if cards <= self.options.preclean_threshold
                    || (i > 0
                        && cards * self.options.preclean_denominator
                            > last_cards * self.options.preclean_numerator)
                {
                    break;
                }
                last_cards = cards;
            }
            log::debug!("Preclean: {:?}", start.elapsed());
        }
        self.set_state(CollectorState::AbortablePreclean);
        Ok(())
    }

    /// Keep precleaning until the young generation is full enough that a young collection is
    /// near, so the remark pause can be scheduled between two young collections.
    pub(super) fn abortable_preclean(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        debug_assert_eq!(self.state(), CollectorState::AbortablePreclean);
        let young_used = VM::VMCollection::young_gen_used_bytes();
        if self.options.precleaning_enabled
            && young_used > self.options.schedule_remark_eden_size_threshold
        {
            let start = Instant::now();
            let mut loops = 0;
            let mut cards_total = 0;
            let mut waited = 0;
            loop {
                if self.young_gen_penetration_reached() || self.full_gc_requested() {
                    break;
                }
                if self.options.max_abortable_preclean_loops != 0
                    && loops >= self.options.max_abortable_preclean_loops
                {
                    break;
                }
                let max_time = Duration::from_millis(self.options.max_abortable_preclean_time);
                if start.elapsed() >= max_time {
                    log::warn!(
                        "Abortable preclean abandoned after {} iterations ({} cards, {} waits)",
                        loops,
                        cards_total,
                        waited
                    );
                    break;
                }
                let cards = self.preclean_work(token, epoch)?;
                cards_total += cards;
                loops += 1;
                if cards < self.options.abortable_preclean_min_work_per_iteration {
                    waited += 1;
                    self.wait_without_token(
                        token,
                        epoch,
                        Duration::from_millis(self.options.abortable_preclean_wait_millis),
                    )?;
                }
            }
            log::debug!(
                "Abortable preclean: {} iterations, {} cards, {:?}",
                loops,
                cards_total,
                start.elapsed()
            );
        }
        self.set_state(CollectorState::FinalMarking);
        Ok(())
    }

    fn young_gen_penetration_reached(&self) -> bool {
        let capacity = VM::VMCollection::young_gen_capacity_bytes();
        let used = VM::VMCollection::young_gen_used_bytes();
        capacity == 0 || used * 100 >= capacity * self.options.schedule_remark_eden_penetration
    }

    /// Park on the background thread's monitor for up to `duration` without the token, so
    /// young and foreground collections can run meanwhile.
    fn wait_without_token(
        &self,
        token: &mut TokenGuard,
        epoch: usize,
        duration: Duration,
    ) -> PhaseResult {
        token.released(|| self.monitor.wait_timeout(duration));
        self.check_epoch(epoch)
    }

    /// One preclean pass over the mod union table and then the card table.  Returns the number
    /// of cards precleaned.
    fn preclean_work(&self, token: &mut TokenGuard, epoch: usize) -> Result<usize, Preempted> {
        let mod_union_cards = self.preclean_table(token, epoch, CardSource::ModUnionTable)?;
        let cards = self.preclean_table(token, epoch, CardSource::CardTable)?;
        Ok(mod_union_cards + cards)
    }

    fn take_dirty_region(
        &self,
        source: CardSource,
        from: Address,
        end: Address,
    ) -> Range<Address> {
        match source {
            CardSource::ModUnionTable => {
                let _l = self.mod_union_table.lock();
                self.mod_union_table.get_and_clear_marked_region(from, end)
            }
            CardSource::CardTable => self.card_table.preclean_dirty_cards(from..end),
        }
    }

    fn redirty(&self, source: CardSource, range: Range<Address>) {
        match source {
            CardSource::ModUnionTable => self.mod_union_table.mark_range(range),
            CardSource::CardTable => self.card_table.dirty_range(range),
        }
    }

    fn preclean_table(
        &self,
        token: &mut TokenGuard,
        epoch: usize,
        source: CardSource,
    ) -> Result<usize, Preempted> {
        let mut cards = 0;
        let mut cur = self.space.bottom();
        loop {
            let g = self.space.lock();
            let bm = self.mark_bits.lock();
            let end = self.space.end();
            if cur >= end {
                break;
            }
            let region = self.take_dirty_region(source, cur, end);
            if region.is_empty() {
                break;
            }
            cards += (region.end - region.start).div_ceil(BYTES_IN_CARD);

            let stopped = {
                let mut stack = self.mark_stack.lock().unwrap();
                let stopped = self.rescan_dirty_region(
                    region.clone(),
                    |child| self.push_or_overflow(&mut stack, child),
                    || self.should_yield(),
                );
                self.drain_mark_stack(&mut stack);
                stopped
            };
            match stopped {
                None => cur = region.end,
                Some(at) => {
                    // Rescan again from the card of `at`.
                    let rest = card_align_down(at)..region.end;
                    self.redirty(source, rest.clone());
                    cur = rest.start;
                    drop(bm);
                    drop(g);
                    self.do_yield(token, epoch)?;
                    continue;
                }
            }
            drop(bm);
            drop(g);
            if self.should_yield() {
                self.do_yield(token, epoch)?;
            }
        }
        Ok(cards)
    }
}
