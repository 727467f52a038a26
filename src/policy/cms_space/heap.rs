use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::constants::LOG_BYTES_IN_WORD;
use crate::util::Address;

/// The word storage behind the old generation.
///
/// The whole reserved range is allocated up front; the space decides how much of it is committed.
/// Every word is an `AtomicUsize` so that the concurrent marker and sweeper can read words that
/// mutators or the allocator are writing at the same time.
pub struct HeapWords {
    start: Address,
    words: Box<[AtomicUsize]>,
}

impl HeapWords {
    pub fn new(start: Address, reserved_bytes: usize) -> Self {
        assert!(start.is_word_aligned(), "heap start {} is not word aligned", start);
        let count = reserved_bytes >> LOG_BYTES_IN_WORD;
        let words = (0..count)
            .map(|_| AtomicUsize::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        HeapWords { start, words }
    }

    /// The lowest address of the reserved range.
    pub fn start(&self) -> Address {
        self.start
    }

    /// The end of the reserved range.
    pub fn end(&self) -> Address {
        self.start.add_words(self.words.len())
    }

    /// The number of words in the reserved range.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }

    #[inline(always)]
    fn word(&self, addr: Address) -> &AtomicUsize {
        debug_assert!(addr.is_word_aligned(), "{} is not word aligned", addr);
        debug_assert!(self.contains(addr), "{} is outside the heap", addr);
        &self.words[addr.words_from(self.start)]
    }

    #[inline(always)]
    pub fn load(&self, addr: Address, order: Ordering) -> usize {
        self.word(addr).load(order)
    }

    #[inline(always)]
    pub fn store(&self, addr: Address, value: usize, order: Ordering) {
        self.word(addr).store(value, order)
    }

    pub fn compare_exchange(
        &self,
        addr: Address,
        old: usize,
        new: usize,
        success: Ordering,
        failure: Ordering,
    ) -> Result<usize, usize> {
        self.word(addr).compare_exchange(old, new, success, failure)
    }

    /// Fill `words` words starting at `start` with `value`.
    pub fn fill(&self, start: Address, words: usize, value: usize) {
        let first = start.words_from(self.start);
        for w in &self.words[first..first + words] {
            w.store(value, Ordering::Relaxed);
        }
    }

    /// Copy `src` into the heap starting at `start`.
    pub fn copy_from_slice(&self, start: Address, src: &[usize]) {
        let first = start.words_from(self.start);
        for (w, v) in self.words[first..first + src.len()].iter().zip(src) {
            w.store(*v, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_store_and_bounds() {
        let heap = HeapWords::new(Address::from_usize(0x10000), 1024);
        assert_eq!(heap.word_count(), 128);
        assert_eq!(heap.end(), Address::from_usize(0x10400));
        let a = Address::from_usize(0x10008);
        heap.store(a, 42, Ordering::Relaxed);
        assert_eq!(heap.load(a, Ordering::Relaxed), 42);
        assert!(heap.contains(a));
        assert!(!heap.contains(heap.end()));
        heap.fill(heap.start(), 4, 7);
        assert_eq!(heap.load(a, Ordering::Relaxed), 7);
        heap.copy_from_slice(a, &[1, 2, 3]);
        assert_eq!(heap.load(a.add_words(2), Ordering::Relaxed), 3);
    }
}
