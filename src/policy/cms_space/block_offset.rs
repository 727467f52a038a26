use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::constants::{BYTES_IN_CARD, LOG_BYTES_IN_CARD};
use crate::util::Address;

/// The block offset table: for every card, the start of a block at or below the card's first
/// word.  The entry is exact (the block that covers the card's first word) except inside an
/// active linear allocation block, where it may name the block's original start.  Either way a
/// forward walk from the entry reaches the block covering any address in the card.
pub struct BlockOffsetTable {
    start: Address,
    entries: Box<[AtomicUsize]>,
}

impl BlockOffsetTable {
    pub fn new(start: Address, reserved_bytes: usize) -> Self {
        debug_assert!(start.is_aligned_to(BYTES_IN_CARD));
        let cards = (reserved_bytes + BYTES_IN_CARD - 1) >> LOG_BYTES_IN_CARD;
        BlockOffsetTable {
            start,
            entries: (0..cards)
                .map(|_| AtomicUsize::new(0))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    #[inline(always)]
    fn index(&self, addr: Address) -> usize {
        (addr - self.start) >> LOG_BYTES_IN_CARD
    }

    /// Index of the first card whose start is at or after `addr`.
    fn index_up(&self, addr: Address) -> usize {
        ((addr - self.start) + BYTES_IN_CARD - 1) >> LOG_BYTES_IN_CARD
    }

    /// Record a new block `[start, end)`: every card that starts inside it now points at
    /// `start`.  Called whenever a block is created by splitting, coalescing, carving or
    /// growing the space.  Cards that start before `start` are left alone.
    pub fn mark_block(&self, block: Range<Address>) {
        if block.start >= block.end {
            return;
        }
        let first = self.index_up(block.start);
        let last = self.index_up(block.end);
        for entry in &self.entries[first..last.min(self.entries.len())] {
            entry.store(block.start.as_usize(), Ordering::Release);
        }
    }

    /// The recorded block start for the card containing `addr`.
    pub fn entry_for(&self, addr: Address) -> Address {
        let entry = Address::from_usize(self.entries[self.index(addr)].load(Ordering::Acquire));
        debug_assert!(
            !entry.is_zero(),
            "no block offset recorded for the card of {}",
            addr
        );
        entry
    }

    /// Check that every card starting inside `[start, end)` points at or after `start`'s block
    /// and that the block covering the card's first word is reachable.  Used by verification.
    pub fn verify_single_block(&self, block: Range<Address>) {
        let first = self.index_up(block.start);
        let last = self.index_up(block.end).min(self.entries.len());
        for i in first..last {
            let entry = Address::from_usize(self.entries[i].load(Ordering::Relaxed));
            assert!(
                entry <= block.start,
                "card {} of block {}..{} points forward to {}",
                i,
                block.start,
                block.end,
                entry
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::WORDS_IN_CARD;

    const START: Address = Address::from_usize(0x80_0000);

    #[test]
    fn entries_follow_splits() {
        let bot = BlockOffsetTable::new(START, 8 * BYTES_IN_CARD);
        let end = START.add_words(8 * WORDS_IN_CARD);
        bot.mark_block(START..end);
        for i in 0..8 {
            assert_eq!(bot.entry_for(START.add_words(i * WORDS_IN_CARD + 3)), START);
        }
        // Split at a word inside card 2.
        let split = START.add_words(2 * WORDS_IN_CARD + 10);
        bot.mark_block(split..end);
        assert_eq!(bot.entry_for(START.add_words(2 * WORDS_IN_CARD + 20)), START);
        assert_eq!(bot.entry_for(START.add_words(3 * WORDS_IN_CARD)), split);
        assert_eq!(bot.entry_for(end.sub_words(1)), split);
        bot.verify_single_block(split..end);

        // A block starting exactly on a card boundary owns that card.
        let aligned = START.add_words(5 * WORDS_IN_CARD);
        bot.mark_block(aligned..end);
        assert_eq!(bot.entry_for(aligned), aligned);
        assert_eq!(bot.entry_for(aligned.sub_words(1)), split);
    }
}
