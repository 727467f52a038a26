//! A word-addressed bit map over the managed region.
//!
//! One bit covers `1 << shifter` words.  The mark bit map uses a shifter of 0 (one bit per word);
//! the mod-union table reuses the same structure with one bit per card.
//!
//! Mutating operations other than [`MarkBitMap::par_mark`] and [`MarkBitMap::par_clear`] expect
//! the caller to hold the bit map lock (see [`MarkBitMap::lock`]).  The bits themselves are
//! atomic words, so a reader without the lock never sees a torn word.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::util::constants::{BITS_IN_WORD, LOG_BITS_IN_WORD, LOG_BYTES_IN_WORD};
use crate::util::Address;

pub struct MarkBitMap {
    /// The address covered by bit 0.
    start: Address,
    /// The number of bits.
    size: usize,
    /// log2 of the number of heap words covered by a bit.
    shifter: usize,
    bits: Box<[AtomicUsize]>,
    lock: Mutex<()>,
}

impl MarkBitMap {
    /// Create a bit map covering `words` heap words from `start`.
    pub fn new(start: Address, words: usize, shifter: usize) -> Self {
        let size = (words + (1 << shifter) - 1) >> shifter;
        let bit_words = (size + BITS_IN_WORD - 1) >> LOG_BITS_IN_WORD;
        let bits = (0..bit_words)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        MarkBitMap {
            start,
            size,
            shifter,
            bits,
            lock: Mutex::new(()),
        }
    }

    /// Take the coarse bit map lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.lock.try_lock().ok()
    }

    pub fn start(&self) -> Address {
        self.start
    }

    /// The end of the covered range.
    pub fn end(&self) -> Address {
        self.start.add_words(self.size << self.shifter)
    }

    pub fn covers(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }

    fn heap_word_to_offset(&self, addr: Address) -> usize {
        debug_assert!(
            addr >= self.start && addr <= self.end(),
            "{} outside [{}, {})",
            addr,
            self.start,
            self.end()
        );
        (addr.words_from(self.start)) >> self.shifter
    }

    fn offset_to_heap_word(&self, offset: usize) -> Address {
        self.start.add_words(offset << self.shifter)
    }

    /// Convert an end address to a bit offset, rounding up so that a partially covered unit is
    /// included.
    fn heap_word_to_offset_up(&self, addr: Address) -> usize {
        let words = addr.words_from(self.start);
        (words + (1 << self.shifter) - 1) >> self.shifter
    }

    #[inline(always)]
    fn word_and_mask(offset: usize) -> (usize, usize) {
        (offset >> LOG_BITS_IN_WORD, 1 << (offset & (BITS_IN_WORD - 1)))
    }

    pub fn is_marked(&self, addr: Address) -> bool {
        let (w, m) = Self::word_and_mask(self.heap_word_to_offset(addr));
        self.bits[w].load(Ordering::Acquire) & m != 0
    }

    pub fn is_unmarked(&self, addr: Address) -> bool {
        !self.is_marked(addr)
    }

    /// Set the bit for `addr`.  Caller holds the lock or otherwise owns the range.
    pub fn mark(&self, addr: Address) {
        let (w, m) = Self::word_and_mask(self.heap_word_to_offset(addr));
        self.bits[w].fetch_or(m, Ordering::Release);
    }

    /// Clear the bit for `addr`.  Caller holds the lock or otherwise owns the range.
    pub fn clear(&self, addr: Address) {
        let (w, m) = Self::word_and_mask(self.heap_word_to_offset(addr));
        self.bits[w].fetch_and(!m, Ordering::Release);
    }

    /// Atomically set the bit for `addr`.  Returns true if this call changed it from 0 to 1, i.e.
    /// this thread won the race to claim the object.
    pub fn par_mark(&self, addr: Address) -> bool {
        let (w, m) = Self::word_and_mask(self.heap_word_to_offset(addr));
        let word = &self.bits[w];
        let mut old = word.load(Ordering::Relaxed);
        loop {
            if old & m != 0 {
                return false;
            }
            match word.compare_exchange_weak(old, old | m, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(current) => old = current,
            }
        }
    }

    /// Atomically clear the bit for `addr`.  Returns true if this call changed it from 1 to 0.
    pub fn par_clear(&self, addr: Address) -> bool {
        let (w, m) = Self::word_and_mask(self.heap_word_to_offset(addr));
        self.bits[w].fetch_and(!m, Ordering::AcqRel) & m != 0
    }

    /// Apply `set` (true) or clear (false) to every bit covering `[range.start, range.end)`.
    fn set_range(&self, range: Range<Address>, set: bool) {
        if range.start >= range.end {
            return;
        }
        let mut beg = self.heap_word_to_offset(range.start);
        let end = self.heap_word_to_offset_up(range.end).min(self.size);
        // Leading partial word.
        while beg < end && beg & (BITS_IN_WORD - 1) != 0 {
            let (w, m) = Self::word_and_mask(beg);
            if set {
                self.bits[w].fetch_or(m, Ordering::Release);
            } else {
                self.bits[w].fetch_and(!m, Ordering::Release);
            }
            beg += 1;
        }
        // Whole words.
        while beg + BITS_IN_WORD <= end {
            let w = beg >> LOG_BITS_IN_WORD;
            self.bits[w].store(if set { usize::MAX } else { 0 }, Ordering::Release);
            beg += BITS_IN_WORD;
        }
        // Trailing partial word.
        while beg < end {
            let (w, m) = Self::word_and_mask(beg);
            if set {
                self.bits[w].fetch_or(m, Ordering::Release);
            } else {
                self.bits[w].fetch_and(!m, Ordering::Release);
            }
            beg += 1;
        }
    }

    pub fn mark_range(&self, range: Range<Address>) {
        self.set_range(range, true)
    }

    pub fn clear_range(&self, range: Range<Address>) {
        self.set_range(range, false)
    }

    /// Same as `mark_range` but safe against concurrent setters of neighbouring bits.  Every
    /// update is already an atomic read-modify-write or a whole-word store of the final value.
    pub fn par_mark_range(&self, range: Range<Address>) {
        self.set_range(range, true)
    }

    pub fn clear_all(&self) {
        for w in self.bits.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }

    /// Clear the whole map in chunks of `quantum` heap words, calling `between` after each
    /// chunk.  `between` may release locks and yield; it returns false to stop early, in which
    /// case the address where clearing stopped is returned.
    pub fn clear_in_chunks<F: FnMut() -> bool>(
        &self,
        quantum: usize,
        mut between: F,
    ) -> Option<Address> {
        let mut cur = self.start;
        let end = self.end();
        while cur < end {
            let next = if end.words_from(cur) > quantum {
                cur.add_words(quantum)
            } else {
                end
            };
            self.clear_range(cur..next);
            cur = next;
            if cur < end && !between() {
                return Some(cur);
            }
        }
        None
    }

    pub fn is_all_clear(&self) -> bool {
        self.bits.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }

    /// Return the address of the first marked unit at or after `from` and below `limit`, or
    /// `limit` if there is none.
    pub fn get_next_marked_word_address(&self, from: Address, limit: Address) -> Address {
        let limit = limit.min(self.end());
        if from >= limit {
            return limit;
        }
        let mut offset = self.heap_word_to_offset(from);
        let end_offset = self.heap_word_to_offset_up(limit);
        while offset < end_offset {
            let (w, _) = Self::word_and_mask(offset);
            let bit = offset & (BITS_IN_WORD - 1);
            let word = self.bits[w].load(Ordering::Acquire) >> bit;
            if word != 0 {
                let found = offset + word.trailing_zeros() as usize;
                if found >= end_offset {
                    return limit;
                }
                return self.offset_to_heap_word(found).max(from).min(limit);
            }
            offset += BITS_IN_WORD - bit;
        }
        limit
    }

    /// Return the address of the first unmarked unit at or after `from` and below `limit`, or
    /// `limit` if there is none.
    pub fn get_next_unmarked_word_address(&self, from: Address, limit: Address) -> Address {
        let limit = limit.min(self.end());
        if from >= limit {
            return limit;
        }
        let mut offset = self.heap_word_to_offset(from);
        let end_offset = self.heap_word_to_offset_up(limit);
        while offset < end_offset {
            let (w, _) = Self::word_and_mask(offset);
            let bit = offset & (BITS_IN_WORD - 1);
            let word = (!self.bits[w].load(Ordering::Acquire)) >> bit;
            if word != 0 {
                let found = offset + word.trailing_zeros() as usize;
                if found >= end_offset {
                    return limit;
                }
                return self.offset_to_heap_word(found).max(from).min(limit);
            }
            offset += BITS_IN_WORD - bit;
        }
        limit
    }

    /// Find the next maximal run of marked units starting at or after `from` (and below
    /// `limit`), clear it, and return it.  Returns an empty range if nothing is marked.
    /// Caller holds the lock.
    pub fn get_and_clear_marked_region(&self, from: Address, limit: Address) -> Range<Address> {
        let start = self.get_next_marked_word_address(from, limit);
        let end = self.get_next_unmarked_word_address(start, limit);
        debug_assert!(start <= end);
        if start < end {
            self.clear_range(start..end);
        }
        start..end
    }

    /// Count the marked units in `range`.
    pub fn count_marked(&self, range: Range<Address>) -> usize {
        let mut count = 0;
        let mut cur = self.get_next_marked_word_address(range.start, range.end);
        while cur < range.end {
            count += 1;
            cur = self.get_next_marked_word_address(cur.add_words(1 << self.shifter), range.end);
        }
        count
    }

    /// Recover the size of an allocated block whose header may not be installed yet.  A block
    /// allocated while the collector is marking has the bits of its first two words and of its
    /// last word set.  Returns `None` if `block` does not carry that encoding.
    pub fn block_size_from_marks(&self, block: Address, limit: Address) -> Option<usize> {
        debug_assert_eq!(self.shifter, 0);
        if !self.is_marked(block) || !self.is_marked(block.add_words(1)) {
            return None;
        }
        let last = self.get_next_marked_word_address(block.add_words(2), limit);
        if last >= limit {
            return None;
        }
        Some(last.words_from(block) + 1)
    }

    /// Set the bits that describe an uninitialized block of `size` words.
    pub fn mark_uninitialized_block(&self, block: Address, size: usize) {
        debug_assert_eq!(self.shifter, 0);
        debug_assert!(size >= 3);
        self.par_mark(block);
        self.par_mark(block.add_words(1));
        self.par_mark(block.add_words(size - 1));
    }

    /// The heap bytes covered by one bit.
    pub fn bytes_per_bit(&self) -> usize {
        1 << (self.shifter + LOG_BYTES_IN_WORD as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: Address = Address::from_usize(0x10_0000);

    fn word(i: usize) -> Address {
        START.add_words(i)
    }

    #[test]
    fn par_mark_claims_once() {
        let map = MarkBitMap::new(START, 1024, 0);
        assert!(map.par_mark(word(5)));
        assert!(!map.par_mark(word(5)));
        assert!(map.is_marked(word(5)));
        assert!(map.par_clear(word(5)));
        assert!(!map.par_clear(word(5)));
    }

    #[test]
    fn par_mark_race() {
        let map = MarkBitMap::new(START, 1024, 0);
        let winners = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for i in 0..1024 {
                        if map.par_mark(word(i)) {
                            winners.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        assert_eq!(winners.load(Ordering::Relaxed), 1024);
    }

    #[test]
    fn next_marked_and_unmarked() {
        let map = MarkBitMap::new(START, 1024, 0);
        let end = map.end();
        assert_eq!(map.get_next_marked_word_address(START, end), end);
        map.mark(word(3));
        map.mark(word(200));
        assert_eq!(map.get_next_marked_word_address(START, end), word(3));
        assert_eq!(map.get_next_marked_word_address(word(4), end), word(200));
        assert_eq!(map.get_next_marked_word_address(word(4), word(100)), word(100));
        assert_eq!(map.get_next_unmarked_word_address(word(3), end), word(4));
        map.mark_range(word(60)..word(140));
        assert_eq!(map.get_next_unmarked_word_address(word(60), end), word(140));
        assert_eq!(map.count_marked(START..end), 82);
    }

    #[test]
    fn clear_range_spanning_words() {
        let map = MarkBitMap::new(START, 1024, 0);
        map.mark_range(START..map.end());
        map.clear_range(word(10)..word(300));
        assert!(map.is_marked(word(9)));
        assert!(map.is_unmarked(word(10)));
        assert!(map.is_unmarked(word(299)));
        assert!(map.is_marked(word(300)));
        map.clear_all();
        assert!(map.is_all_clear());
    }

    #[test]
    fn get_and_clear_region_with_shifter() {
        // One bit per 64 words.
        let map = MarkBitMap::new(START, 64 * 64, 6);
        map.mark(word(64 * 3 + 5));
        map.mark(word(64 * 4));
        map.mark(word(64 * 9));
        let r = map.get_and_clear_marked_region(START, map.end());
        assert_eq!(r, word(64 * 3)..word(64 * 5));
        assert!(map.is_unmarked(word(64 * 3)));
        let r = map.get_and_clear_marked_region(r.end, map.end());
        assert_eq!(r, word(64 * 9)..word(64 * 10));
        let r = map.get_and_clear_marked_region(r.end, map.end());
        assert!(r.is_empty());
    }

    #[test]
    fn uninitialized_block_size() {
        let map = MarkBitMap::new(START, 1024, 0);
        map.mark_uninitialized_block(word(10), 40);
        assert_eq!(map.block_size_from_marks(word(10), map.end()), Some(40));
        // A normally marked object does not carry the encoding.
        map.mark(word(100));
        assert_eq!(map.block_size_from_marks(word(100), map.end()), None);
    }

    #[test]
    fn clear_in_chunks_can_stop() {
        let map = MarkBitMap::new(START, 1024, 0);
        map.mark_range(START..map.end());
        let mut calls = 0;
        let stopped = map.clear_in_chunks(256, || {
            calls += 1;
            calls < 2
        });
        assert_eq!(stopped, Some(word(512)));
        assert!(map.is_unmarked(word(511)));
        assert!(map.is_marked(word(512)));
        assert_eq!(map.clear_in_chunks(256, || true), None);
        assert!(map.is_all_clear());
    }
}
