use std::ops::Range;

use crate::util::bitmap::MarkBitMap;
use crate::util::card_table::{CardState, CardTable};
use crate::util::constants::{LOG_BYTES_IN_CARD, LOG_BYTES_IN_WORD};
use crate::util::Address;

const LOG_WORDS_IN_CARD: usize = (LOG_BYTES_IN_CARD - LOG_BYTES_IN_WORD) as usize;

/// Records cards of the old generation whose contents changed while the concurrent collector was
/// running, but whose card table entries were consumed by something else (a young collection, or
/// the precleaner moving them to the final remark).  One bit per card.
pub struct ModUnionTable {
    bits: MarkBitMap,
}

impl ModUnionTable {
    pub fn new(start: Address, reserved_words: usize) -> Self {
        ModUnionTable {
            bits: MarkBitMap::new(start, reserved_words, LOG_WORDS_IN_CARD),
        }
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.bits.lock()
    }

    pub fn is_marked(&self, addr: Address) -> bool {
        self.bits.is_marked(addr)
    }

    pub fn mark(&self, addr: Address) {
        self.bits.mark(addr)
    }

    pub fn par_mark(&self, addr: Address) {
        self.bits.par_mark(addr);
    }

    pub fn mark_range(&self, range: Range<Address>) {
        self.bits.par_mark_range(range)
    }

    pub fn clear_all(&self) {
        self.bits.clear_all()
    }

    pub fn is_all_clear(&self) -> bool {
        self.bits.is_all_clear()
    }

    pub fn count_marked(&self, range: Range<Address>) -> usize {
        self.bits.count_marked(range)
    }

    /// Take the next run of marked cards at or after `from`, clear it and return the covered
    /// address range.
    pub fn get_and_clear_marked_region(&self, from: Address, limit: Address) -> Range<Address> {
        self.bits.get_and_clear_marked_region(from, limit)
    }

    /// Visit each maximal run of marked cards in `range`, clearing it first.
    pub fn dirty_range_iterate_clear<F: FnMut(Range<Address>)>(
        &self,
        range: Range<Address>,
        mut f: F,
    ) {
        let mut cur = range.start;
        while cur < range.end {
            let region = self.get_and_clear_marked_region(cur, range.end);
            if region.is_empty() {
                break;
            }
            cur = region.end;
            f(region);
        }
    }

    /// Move every dirty card of `cards` in `range` into this table.  The card is left precleaned
    /// so the young generation still scans it.  Returns the number of cards moved.
    pub fn transfer_dirty_cards(&self, cards: &CardTable, range: Range<Address>) -> usize {
        cards.for_each_dirty_card(range, CardState::Precleaned, |card| self.par_mark(card))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::{BYTES_IN_CARD, WORDS_IN_CARD};

    const START: Address = Address::from_usize(0x20_0000);

    fn card(i: usize) -> Address {
        START + i * BYTES_IN_CARD
    }

    #[test]
    fn iterate_clear_runs() {
        let mut_table = ModUnionTable::new(START, 32 * WORDS_IN_CARD);
        mut_table.mark(card(1) + 16usize);
        mut_table.mark_range(card(4)..card(6) + 8usize);
        mut_table.mark(card(20));
        let mut runs = vec![];
        mut_table.dirty_range_iterate_clear(START..card(32), |r| runs.push(r));
        assert_eq!(
            runs,
            vec![card(1)..card(2), card(4)..card(7), card(20)..card(21)]
        );
        assert!(mut_table.is_all_clear());
    }

    #[test]
    fn transfer_from_card_table() {
        let cards = CardTable::new(START, 32 * BYTES_IN_CARD);
        let mut_table = ModUnionTable::new(START, 32 * WORDS_IN_CARD);
        cards.dirty(card(3));
        cards.dirty(card(9));
        assert_eq!(mut_table.transfer_dirty_cards(&cards, START..card(32)), 2);
        assert!(mut_table.is_marked(card(3)));
        assert!(mut_table.is_marked(card(9)));
        assert_eq!(cards.count_dirty(START..card(32)), 0);
        assert_eq!(cards.get_entry(card(3)), CardState::Precleaned);
    }
}
