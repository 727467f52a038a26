//! The sweeper: one pass over the space that returns unmarked blocks to the free lists.
//!
//! The sweeper keeps a *free range*, the run of free and dead blocks since the last live block.
//! Each new free or dead block either joins the range (if the coalescing policy allows) or
//! closes it, in which case the range is put on the free lists as one chunk.  A range that is a
//! single chunk already on the lists stays there unless something is coalesced into it.

use super::{BlockHeader, FreeListGuard, FreeListSpace};
use crate::util::bitmap::MarkBitMap;
use crate::util::log;
use crate::util::Address;

/// How eagerly the sweeper coalesces neighbouring free blocks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoalescePolicy {
    /// Never coalesce.
    Never,
    /// Coalesce if both the range so far and the new block have over-populated sizes.
    BothOverPopulated,
    /// Coalesce if the range so far has an over-populated size.
    LeftOverPopulated,
    /// Coalesce if either side has an over-populated size.
    EitherOverPopulated,
    /// Always coalesce.
    Always,
}

impl CoalescePolicy {
    pub fn from_option(policy: usize) -> Self {
        match policy {
            0 => CoalescePolicy::Never,
            1 => CoalescePolicy::BothOverPopulated,
            2 => CoalescePolicy::LeftOverPopulated,
            3 => CoalescePolicy::EitherOverPopulated,
            4 => CoalescePolicy::Always,
            _ => panic!("Invalid coalesce policy {}", policy),
        }
    }
}

/// Counters of one sweep.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub objects_freed: usize,
    pub words_freed: usize,
    pub objects_live: usize,
    pub words_live: usize,
    pub chunks_already_free: usize,
    pub words_already_free: usize,
}

pub struct SweepClosure<'a> {
    space: &'a FreeListSpace,
    bits: &'a MarkBitMap,
    /// The end of the space when the sweep started.  Blocks above it are left alone.
    limit: Address,
    policy: CoalescePolicy,
    in_free_range: bool,
    free_finger: Address,
    /// The free range is a single chunk that is still on a free list.
    free_range_in_free_lists: bool,
    /// Something has been coalesced into the free range.
    last_free_range_coalesced: bool,
    stats: SweepStats,
}

impl<'a> SweepClosure<'a> {
    /// Prepare to sweep the space up to its current end.  The caller has called
    /// [`FreeListSpace::begin_sweep`].
    pub fn new(space: &'a FreeListSpace, bits: &'a MarkBitMap, policy: CoalescePolicy) -> Self {
        SweepClosure {
            space,
            bits,
            limit: space.end(),
            policy,
            in_free_range: false,
            free_finger: Address::ZERO,
            free_range_in_free_lists: false,
            last_free_range_coalesced: false,
            stats: SweepStats::default(),
        }
    }

    pub fn limit(&self) -> Address {
        self.limit
    }

    pub fn stats(&self) -> SweepStats {
        self.stats
    }

    /// Sweep the block at `addr` and return its size, so the caller can move on to the next
    /// block.  Returns the distance to the end of the space once `addr` is at or past the limit.
    /// `addr` may be past the limit if the space grew and its old last chunk was coalesced with
    /// the new space.
    pub fn do_blk_careful(&mut self, _g: &FreeListGuard, addr: Address) -> usize {
        if addr >= self.limit {
            if self.in_free_range {
                self.flush_cur_free_chunk(self.free_finger, addr.words_from(self.free_finger));
            }
            return self.space.end().words_from(addr);
        }

        let heap = self.space.heap();
        match heap.header(addr) {
            BlockHeader::Free { size } => {
                debug_assert!(!self.bits.is_marked(addr), "free chunk {} is marked", addr);
                self.do_already_free_chunk(addr, size);
                self.stats.chunks_already_free += 1;
                self.stats.words_already_free += size;
                size
            }
            BlockHeader::Lab { size } => {
                // A linear allocation block refilled during this sweep.  Its carved objects
                // were allocated live; the block itself is never coalesced.
                if self.in_free_range {
                    self.flush_cur_free_chunk(self.free_finger, addr.words_from(self.free_finger));
                }
                size
            }
            _ if self.bits.is_marked(addr) => {
                let size = self.do_live_chunk(addr);
                self.stats.objects_live += 1;
                self.stats.words_live += size;
                size
            }
            BlockHeader::Object { size, .. } => {
                self.do_garbage_chunk(addr, size);
                self.stats.objects_freed += 1;
                self.stats.words_freed += size;
                size
            }
            BlockHeader::Uninitialized => {
                log::error!("Unmarked block at {} has no header", addr);
                panic!("Unmarked block at {} has no header", addr);
            }
        }
    }

    fn do_already_free_chunk(&mut self, fc: Address, size: usize) {
        #[cfg(feature = "extreme_assertions")]
        assert!(
            self.space.free_lists_contain(fc),
            "free chunk {} is on no free list",
            fc
        );
        self.do_post_free_or_garbage_chunk(fc, size, true);
        if self.in_free_range {
            self.lookahead_and_flush(fc, size);
        }
    }

    fn do_garbage_chunk(&mut self, addr: Address, size: usize) {
        debug_assert_eq!(
            self.bits
                .get_next_marked_word_address(addr.add_words(1), addr.add_words(size)),
            addr.add_words(size),
            "marks inside dead object {}",
            addr
        );
        self.do_post_free_or_garbage_chunk(addr, size, false);
        if self.in_free_range {
            self.lookahead_and_flush(addr, size);
        }
    }

    /// A live block ends any free range.  Its size comes from the mark bit map if the block was
    /// allocated during marking and may not have a header yet.
    fn do_live_chunk(&mut self, addr: Address) -> usize {
        if self.in_free_range {
            self.flush_cur_free_chunk(self.free_finger, addr.words_from(self.free_finger));
        }
        if self.bits.is_marked(addr.add_words(1)) {
            let last = self
                .bits
                .get_next_marked_word_address(addr.add_words(2), self.limit);
            debug_assert!(last < self.limit, "unterminated block at {}", addr);
            last.words_from(addr) + 1
        } else {
            match self.space.heap().header(addr) {
                BlockHeader::Object { size, .. } => size,
                other => {
                    log::error!("Marked block at {} is not an object: {:?}", addr, other);
                    panic!("Marked block at {} is not an object: {:?}", addr, other);
                }
            }
        }
    }

    fn do_post_free_or_garbage_chunk(&mut self, fc: Address, size: usize, fc_in_free_lists: bool) {
        let space = self.space;
        let coalesce = if self.in_free_range {
            let left = fc.words_from(self.free_finger);
            let right = size;
            match self.policy {
                CoalescePolicy::Never => false,
                CoalescePolicy::BothOverPopulated => {
                    space.coal_over_populated(left) && space.coal_over_populated(right)
                }
                CoalescePolicy::LeftOverPopulated => space.coal_over_populated(left),
                CoalescePolicy::EitherOverPopulated => {
                    space.coal_over_populated(left) || space.coal_over_populated(right)
                }
                CoalescePolicy::Always => true,
            }
        } else {
            false
        };

        if self.in_free_range && (coalesce || space.is_near_largest_chunk(fc)) {
            // Join the block to the range.  Whatever of either side is on a list comes off.
            if self.free_range_in_free_lists {
                let ffc_size = space.heap().chunk_size(self.free_finger);
                debug_assert_eq!(ffc_size, fc.words_from(self.free_finger));
                space.coal_death(ffc_size);
                space.remove_free_chunk_from_free_lists(self.free_finger);
                self.free_range_in_free_lists = false;
            }
            if fc_in_free_lists {
                space.coal_death(size);
                space.remove_free_chunk_from_free_lists(fc);
            }
            self.last_free_range_coalesced = true;
            log::trace!("Coalesced {} ({} words) into the range at {}", fc, size, self.free_finger);
        } else {
            if self.in_free_range {
                self.flush_cur_free_chunk(self.free_finger, fc.words_from(self.free_finger));
            }
            self.initialize_free_range(fc, fc_in_free_lists);
        }
    }

    fn initialize_free_range(&mut self, free_finger: Address, free_range_in_free_lists: bool) {
        debug_assert!(!self.in_free_range);
        self.in_free_range = true;
        self.last_free_range_coalesced = false;
        self.free_finger = free_finger;
        self.free_range_in_free_lists = free_range_in_free_lists;
    }

    /// If the block at `fc` reaches the limit, it is the last one this sweep looks at: put the
    /// range on the lists now.
    fn lookahead_and_flush(&mut self, fc: Address, size: usize) {
        let eob = fc.add_words(size);
        if eob >= self.limit {
            debug_assert!(self.free_finger < eob);
            self.flush_cur_free_chunk(self.free_finger, eob.words_from(self.free_finger));
        }
    }

    fn flush_cur_free_chunk(&mut self, chunk: Address, size: usize) {
        debug_assert!(self.in_free_range);
        debug_assert!(size > 0);
        if !self.free_range_in_free_lists {
            self.space.add_chunk_to_free_lists(chunk, size);
            if self.last_free_range_coalesced {
                self.space.coal_birth(size);
            }
        }
        self.in_free_range = false;
        self.free_range_in_free_lists = false;
    }

    /// Put the current free range on the lists before the sweeper lets go of the free list lock,
    /// so that the space is parsable and every free block is on a list while it waits.
    pub fn flush_before_yield(&mut self, _g: &FreeListGuard, addr: Address) {
        if self.in_free_range {
            self.flush_cur_free_chunk(self.free_finger, addr.words_from(self.free_finger));
        }
    }

    /// Finish at `addr`, the first block not swept.
    pub fn finish(&mut self, g: &FreeListGuard, addr: Address) -> SweepStats {
        self.flush_before_yield(g, addr);
        log::debug!("Sweep of {}..{}: {:?}", self.space.bottom(), self.limit, self.stats);
        self.stats
    }
}

impl FreeListSpace {
    /// Sweep the whole space without yielding.  Used by stop-the-world collections and tests.
    pub fn sweep(
        &self,
        g: &FreeListGuard,
        bits: &MarkBitMap,
        policy: CoalescePolicy,
    ) -> SweepStats {
        self.begin_sweep(g);
        let mut sweeper = SweepClosure::new(self, bits, policy);
        let mut addr = self.bottom();
        while addr < sweeper.limit() {
            addr = addr.add_words(sweeper.do_blk_careful(g, addr));
        }
        let stats = sweeper.finish(g, addr);
        self.end_sweep(g);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{install_filler, new_space_with};
    use super::*;
    use crate::util::constants::*;

    fn setup(policy: usize) -> (FreeListSpace, Vec<Address>) {
        let space = new_space_with(16 * WORDS_IN_CARD, |options| {
            options.coalesce_policy = policy;
            options.indexed_free_list_replenish = 1;
        });
        let blocks = {
            let g = space.lock();
            (0..6)
                .map(|_| {
                    let b = space.allocate(&g, 50).unwrap();
                    install_filler(&space, b, 50);
                    b
                })
                .collect()
        };
        (space, blocks)
    }

    #[test]
    fn garbage_runs_coalesce_between_live_objects() {
        let (space, blocks) = setup(4);
        let bits = space.mark_bits();
        bits.mark(blocks[0]);
        bits.mark(blocks[3]);
        let g = space.lock();
        let stats = space.sweep(&g, bits, CoalescePolicy::Always);
        assert_eq!(stats.objects_live, 2);
        assert_eq!(stats.objects_freed, 4);
        // 1 and 2 merged; 4, 5 and the tail merged.
        assert_eq!(space.heap().chunk_size(blocks[1]), 100);
        assert!(space.free_lists_contain(blocks[1]));
        assert_eq!(
            space.heap().chunk_size(blocks[4]),
            16 * WORDS_IN_CARD - 4 * 50
        );
        assert!(space.heap().header(blocks[3]).is_object());
        space.verify_conservation(&g);
        space.verify_single_owner(&g);
    }

    #[test]
    fn fully_free_space_sweeps_to_one_chunk_twice() {
        let (space, _) = setup(4);
        let bits = space.mark_bits();
        let g = space.lock();
        space.sweep(&g, bits, CoalescePolicy::Always);
        assert_eq!(space.heap().chunk_size(space.bottom()), 16 * WORDS_IN_CARD);
        let stats = space.sweep(&g, bits, CoalescePolicy::Always);
        assert_eq!(stats.chunks_already_free, 1);
        assert_eq!(space.heap().chunk_size(space.bottom()), 16 * WORDS_IN_CARD);
        assert!(space.free_lists_contain(space.bottom()));
        space.verify_single_owner(&g);
    }

    #[test]
    fn never_coalesce_keeps_blocks_apart() {
        let (space, blocks) = setup(0);
        let bits = space.mark_bits();
        bits.mark(blocks[5]);
        let g = space.lock();
        // The dead objects all sit below the largest chunk's neighbourhood.
        space.sweep(&g, bits, CoalescePolicy::Never);
        for b in &blocks[..5] {
            assert_eq!(space.heap().chunk_size(*b), 50);
            assert!(space.free_lists_contain(*b));
        }
        space.verify_conservation(&g);
        space.verify_single_owner(&g);
    }

    #[test]
    fn uninitialized_live_block_is_sized_from_marks() {
        let (space, blocks) = setup(4);
        let bits = space.mark_bits();
        let g = space.lock();
        let fresh = space.allocate(&g, 30).unwrap();
        bits.mark_uninitialized_block(fresh, 30);
        let stats = space.sweep(&g, bits, CoalescePolicy::Always);
        assert_eq!(stats.objects_live, 1);
        assert_eq!(stats.words_live, 30);
        assert_eq!(space.heap().header(fresh), BlockHeader::Uninitialized);
        assert!(space.heap().header(blocks[0]).is_free());
    }
}
