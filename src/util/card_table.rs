//! The card table shared with the young generation's write barrier.

use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::util::constants::{BYTES_IN_CARD, LOG_BYTES_IN_CARD};
use crate::util::Address;

#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CardState {
    Clean = 0,
    Dirty = 1,
    /// Cleaned by the precleaner. The young generation still treats it as dirty.
    Precleaned = 2,
}

impl CardState {
    fn from_u8(v: u8) -> CardState {
        match v {
            0 => CardState::Clean,
            1 => CardState::Dirty,
            2 => CardState::Precleaned,
            _ => unreachable!("bad card value {}", v),
        }
    }

    /// Whether the young generation has to scan this card for old-to-young pointers.
    pub fn is_dirty_for_young_gen(self) -> bool {
        self != CardState::Clean
    }
}

/// One byte per card of the reserved old generation.
pub struct CardTable {
    start: Address,
    table: Box<[AtomicU8]>,
}

impl CardTable {
    pub fn new(start: Address, reserved_bytes: usize) -> Self {
        debug_assert!(start.is_aligned_to(BYTES_IN_CARD));
        let cards = (reserved_bytes + BYTES_IN_CARD - 1) >> LOG_BYTES_IN_CARD;
        CardTable {
            start,
            table: (0..cards)
                .map(|_| AtomicU8::new(CardState::Clean as u8))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    #[inline(always)]
    fn index(&self, addr: Address) -> usize {
        debug_assert!(addr >= self.start, "{} below the card table", addr);
        (addr - self.start) >> LOG_BYTES_IN_CARD
    }

    pub fn card_count(&self) -> usize {
        self.table.len()
    }

    /// The first address covered by card `index`.
    pub fn card_start(&self, index: usize) -> Address {
        self.start + (index << LOG_BYTES_IN_CARD)
    }

    #[inline(always)]
    pub fn get_entry(&self, addr: Address) -> CardState {
        CardState::from_u8(self.table[self.index(addr)].load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn set_entry(&self, addr: Address, state: CardState) {
        self.table[self.index(addr)].store(state as u8, Ordering::Release)
    }

    /// Dirty the card covering `addr`.  This is the post write barrier.
    #[inline(always)]
    pub fn dirty(&self, addr: Address) {
        self.set_entry(addr, CardState::Dirty)
    }

    pub fn dirty_range(&self, range: Range<Address>) {
        self.set_range(range, CardState::Dirty)
    }

    pub fn clear_range(&self, range: Range<Address>) {
        self.set_range(range, CardState::Clean)
    }

    fn set_range(&self, range: Range<Address>, state: CardState) {
        if range.start >= range.end {
            return;
        }
        let first = self.index(range.start);
        let last = self.index(range.end - 1usize);
        for card in &self.table[first..=last] {
            card.store(state as u8, Ordering::Release);
        }
    }

    /// Find the next run of dirty cards in `range`, mark the run precleaned, and return the
    /// address range it covers.  Returns an empty range at `range.end` if no card is dirty.
    ///
    /// Cards are flipped one at a time with a compare-and-swap, so a concurrent barrier that
    /// re-dirties a card after it was flipped is not lost.
    pub fn preclean_dirty_cards(&self, range: Range<Address>) -> Range<Address> {
        if range.start >= range.end {
            return range.end..range.end;
        }
        let first = self.index(range.start);
        let last = self.index(range.end - 1usize);
        let mut i = first;
        while i <= last && self.table[i].load(Ordering::Acquire) != CardState::Dirty as u8 {
            i += 1;
        }
        if i > last {
            return range.end..range.end;
        }
        let run_start = i;
        while i <= last
            && self.table[i]
                .compare_exchange(
                    CardState::Dirty as u8,
                    CardState::Precleaned as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            i += 1;
        }
        let start = self.card_start(run_start).max(range.start);
        let end = self.card_start(i).min(range.end);
        start..end
    }

    /// Visit each dirty card in `range`, resetting it to `reset_to`.  Returns the number of
    /// cards visited.
    pub fn for_each_dirty_card<F: FnMut(Address)>(
        &self,
        range: Range<Address>,
        reset_to: CardState,
        mut f: F,
    ) -> usize {
        if range.start >= range.end {
            return 0;
        }
        let first = self.index(range.start);
        let last = self.index(range.end - 1usize);
        let mut count = 0;
        for (i, card) in self.table[first..=last].iter().enumerate() {
            if card.load(Ordering::Acquire) == CardState::Dirty as u8 {
                card.store(reset_to as u8, Ordering::Release);
                f(self.card_start(first + i));
                count += 1;
            }
        }
        count
    }

    /// Visit every card the young generation has to scan, resetting it to clean.
    pub fn for_each_young_gen_card<F: FnMut(Address)>(&self, range: Range<Address>, mut f: F) {
        if range.start >= range.end {
            return;
        }
        let first = self.index(range.start);
        let last = self.index(range.end - 1usize);
        for (i, card) in self.table[first..=last].iter().enumerate() {
            let old = card.swap(CardState::Clean as u8, Ordering::AcqRel);
            if CardState::from_u8(old).is_dirty_for_young_gen() {
                f(self.card_start(first + i));
            }
        }
    }

    pub fn count_dirty(&self, range: Range<Address>) -> usize {
        if range.start >= range.end {
            return 0;
        }
        let first = self.index(range.start);
        let last = self.index(range.end - 1usize);
        self.table[first..=last]
            .iter()
            .filter(|c| c.load(Ordering::Relaxed) == CardState::Dirty as u8)
            .count()
    }

    pub fn assert_all_cards_are_clean(&self, range: Range<Address>) {
        if range.start >= range.end {
            return;
        }
        let first = self.index(range.start);
        let last = self.index(range.end - 1usize);
        for (i, card) in self.table[first..=last].iter().enumerate() {
            assert_eq!(
                card.load(Ordering::Relaxed),
                CardState::Clean as u8,
                "card {} is not clean",
                self.card_start(first + i)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: Address = Address::from_usize(0x10_0000);

    fn card(i: usize) -> Address {
        START + i * BYTES_IN_CARD
    }

    #[test]
    fn dirty_and_preclean() {
        let table = CardTable::new(START, 16 * BYTES_IN_CARD);
        let end = card(16);
        table.dirty(card(3) + 8usize);
        table.dirty(card(4));
        table.dirty(card(10));
        assert_eq!(table.count_dirty(START..end), 3);

        let r = table.preclean_dirty_cards(START..end);
        assert_eq!(r, card(3)..card(5));
        assert_eq!(table.get_entry(card(3)), CardState::Precleaned);
        assert!(table.get_entry(card(3)).is_dirty_for_young_gen());

        let r = table.preclean_dirty_cards(r.end..end);
        assert_eq!(r, card(10)..card(11));
        let r = table.preclean_dirty_cards(r.end..end);
        assert!(r.is_empty());
        assert_eq!(table.count_dirty(START..end), 0);
    }

    #[test]
    fn young_gen_scan_sees_precleaned_cards() {
        let table = CardTable::new(START, 8 * BYTES_IN_CARD);
        table.set_entry(card(1), CardState::Precleaned);
        table.dirty(card(5));
        let mut seen = vec![];
        table.for_each_young_gen_card(START..card(8), |c| seen.push(c));
        assert_eq!(seen, vec![card(1), card(5)]);
        table.assert_all_cards_are_clean(START..card(8));
    }

    #[test]
    fn for_each_dirty_resets() {
        let table = CardTable::new(START, 8 * BYTES_IN_CARD);
        table.dirty_range(card(2)..card(4));
        let n = table.for_each_dirty_card(START..card(8), CardState::Clean, |_| {});
        assert_eq!(n, 2);
        table.assert_all_cards_are_clean(START..card(8));
    }
}
