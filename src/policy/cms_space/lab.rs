//! Linear allocation blocks.
//!
//! A LAB is a free chunk taken off the free lists and handed out by bumping a pointer.  Its
//! unused part carries a [`BlockHeader::Lab`] header so the heap stays parsable, but it is on no
//! free list and the sweeper never coalesces it.  LABs are retired before every sweep and
//! refilled after it (and after every young collection).

use super::block::BlockHeader;
use super::{FreeListGuard, FreeListSpace};
use crate::util::constants::{MIN_CHUNK_SIZE_IN_WORDS, SMALL_FOR_DICTIONARY};
use crate::util::log;
use crate::util::Address;

#[derive(Debug)]
pub struct LinearAllocBlock {
    /// Start of the unused part, or zero if the block is empty.
    pub ptr: Address,
    pub word_size: usize,
    /// The size of chunk to ask for when the block is refilled.
    pub refill_size: usize,
    /// Requests at or above this size do not use this block.
    pub allocation_size_limit: usize,
}

impl LinearAllocBlock {
    pub fn new(refill_size: usize, allocation_size_limit: usize) -> Self {
        LinearAllocBlock {
            ptr: Address::ZERO,
            word_size: 0,
            refill_size,
            allocation_size_limit,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ptr.is_zero()
    }

    fn clear(&mut self) {
        self.ptr = Address::ZERO;
        self.word_size = 0;
    }
}

impl FreeListSpace {
    /// Make the unused part of `blk` parsable.
    fn repair_linear_alloc_block(&self, blk: &LinearAllocBlock) {
        if !blk.is_empty() {
            debug_assert!(blk.word_size >= MIN_CHUNK_SIZE_IN_WORDS);
            self.heap.set_header(
                blk.ptr,
                BlockHeader::Lab {
                    size: blk.word_size,
                },
            );
        }
    }

    /// Carve `size` words off the front of `blk`, leaving at least a minimum chunk behind.
    pub(super) fn get_chunk_from_linear_alloc_block_remainder(
        &self,
        blk: &mut LinearAllocBlock,
        size: usize,
    ) -> Option<Address> {
        if blk.is_empty() || blk.word_size < size + MIN_CHUNK_SIZE_IN_WORDS {
            return None;
        }
        let res = blk.ptr;
        blk.word_size -= size;
        blk.ptr = res.add_words(size);
        self.split_birth(size);
        self.repair_linear_alloc_block(blk);
        // Cards starting in the remainder keep naming the start of the block; the walk from
        // there crosses the objects carved so far.
        self.bot.mark_block(res..blk.ptr);
        Some(res)
    }

    /// Allocate from `blk`, refilling it if it is about to run out.
    pub(super) fn get_chunk_from_linear_alloc_block(
        &self,
        blk: &mut LinearAllocBlock,
        size: usize,
    ) -> Option<Address> {
        debug_assert!(size >= MIN_CHUNK_SIZE_IN_WORDS);
        if blk.is_empty() {
            // Could not be filled at the last refill.  Wait for the next one.
            return None;
        }
        if let Some(res) = self.get_chunk_from_linear_alloc_block_remainder(blk, size) {
            return Some(res);
        }

        let mut res = None;
        if blk.word_size == size {
            self.bot.mark_block(blk.ptr..blk.ptr.add_words(size));
            res = Some(blk.ptr);
        } else if size + MIN_CHUNK_SIZE_IN_WORDS <= blk.refill_size {
            // Too small for this request: give the rest back and refill.
            let (ptr, sz) = (blk.ptr, blk.word_size);
            self.add_chunk_to_free_lists(ptr, sz);
            self.split_birth(sz);
        } else {
            // A refilled block would not satisfy the request either.
            return None;
        }

        blk.clear();
        self.refill_linear_alloc_block(blk);
        if res.is_some() {
            self.split_birth(size);
            self.repair_linear_alloc_block(blk);
            return res;
        }
        if blk.is_empty() {
            return None;
        }
        self.get_chunk_from_linear_alloc_block_remainder(blk, size)
    }

    fn refill_linear_alloc_block(&self, blk: &mut LinearAllocBlock) {
        debug_assert!(blk.is_empty());
        let chunk = if blk.refill_size < SMALL_FOR_DICTIONARY {
            self.get_chunk_from_indexed_free_list(blk.refill_size)
                .or_else(|| self.get_chunk_from_dictionary(blk.refill_size))
        } else {
            self.get_chunk_from_dictionary(blk.refill_size)
        };
        if let Some(fc) = chunk {
            blk.ptr = fc;
            blk.word_size = self.heap.chunk_size(fc);
            self.repair_linear_alloc_block(blk);
            log::trace!("Refilled LAB with {} words at {}", blk.word_size, blk.ptr);
        }
    }

    fn refill_linear_alloc_block_if_needed(&self, blk: &mut LinearAllocBlock) {
        if blk.is_empty() {
            self.refill_linear_alloc_block(blk);
        }
    }

    /// Refill empty LABs.  Called after a sweep and at the end of every young collection.
    pub fn refill_linear_alloc_blocks_if_needed(&self, _g: &FreeListGuard) {
        self.refill_linear_alloc_block_if_needed(&mut self.small_lab.lock());
        self.refill_linear_alloc_block_if_needed(&mut self.large_lab.lock());
    }

    /// Return the unused parts of both LABs to the free lists.  After this every card has an
    /// exact block offset entry, so the sweeper may coalesce across former LAB boundaries.
    pub fn retire_linear_alloc_blocks(&self, _g: &FreeListGuard) {
        for lab in [&self.small_lab, &self.large_lab] {
            let mut blk = lab.lock();
            if !blk.is_empty() {
                let (ptr, sz) = (blk.ptr, blk.word_size);
                blk.clear();
                drop(blk);
                self.add_chunk_to_free_lists(ptr, sz);
                self.split_birth(sz);
            }
        }
    }

    /// Words left in both LABs.
    pub(super) fn lab_free_words(&self) -> usize {
        self.small_lab.lock().word_size + self.large_lab.lock().word_size
    }

    pub(super) fn lab_max_chunk_size(&self) -> usize {
        self.small_lab
            .lock()
            .word_size
            .max(self.large_lab.lock().word_size)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{install_filler, new_space_with};
    use crate::util::constants::*;

    #[test]
    fn carve_from_refilled_lab() {
        let space = new_space_with(64 * WORDS_IN_CARD, |options| {
            options.indexed_free_list_replenish = 1;
            options.small_lab_refill_words = 256;
        });
        let g = space.lock();
        assert!(space.small_lab.lock().is_empty());
        space.refill_linear_alloc_blocks_if_needed(&g);
        let refill = space.small_lab.lock().word_size;
        assert!(refill >= space.small_lab.lock().refill_size);

        let free_before = space.free_words();
        let a = space.allocate(&g, 8).unwrap();
        let b = space.allocate(&g, 8).unwrap();
        assert_eq!(b, a.add_words(8));
        assert_eq!(space.free_words(), free_before - 16);
        install_filler(&space, a, 8);
        install_filler(&space, b, 8);
        space.verify_conservation(&g);

        space.retire_linear_alloc_blocks(&g);
        assert!(space.small_lab.lock().is_empty());
        assert_eq!(space.free_words(), free_before - 16);
        space.verify_single_owner(&g);
    }

    #[test]
    fn requests_past_the_small_limit_use_the_large_lab() {
        let space = new_space_with(64 * WORDS_IN_CARD, |options| {
            options.indexed_free_list_replenish = 1;
            options.small_lab_refill_words = 256;
            options.large_lab_refill_words = 512;
        });
        let g = space.lock();
        space.refill_linear_alloc_blocks_if_needed(&g);
        let small = space.small_lab.lock().ptr;
        let large = space.large_lab.lock().ptr;
        assert!(!small.is_zero() && !large.is_zero());

        let size = SMALL_FOR_LINEAR_ALLOC + 4;
        let a = space.allocate(&g, size).unwrap();
        assert_eq!(a, large);
        assert_eq!(space.small_lab.lock().ptr, small);
        assert_eq!(space.large_lab.lock().ptr, large.add_words(size));

        let b = space.allocate(&g, 8).unwrap();
        assert_eq!(b, small);
        install_filler(&space, a, size);
        install_filler(&space, b, 8);
        space.verify_conservation(&g);
    }
}
