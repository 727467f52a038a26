//! The old generation's free-list space.
//!
//! Free chunks below [`SMALL_FOR_DICTIONARY`] words live in per-size indexed lists; larger
//! chunks live in the [`Dictionary`].  Two linear allocation blocks serve streams of small
//! requests without list traffic.  Nothing is ever moved: the sweeper returns dead objects to
//! the lists, coalescing neighbours as the census allows.
//!
//! Locking: the free list lock (see [`FreeListSpace::lock`]) serializes every mutator-side and
//! collector-side change to the space.  Parallel promotion during a young collection runs while
//! the collector side holds that lock, and synchronizes through the per-size list locks and the
//! dictionary allocation lock instead.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::util::bitmap::MarkBitMap;
use crate::util::constants::*;
use crate::util::conversions::{
    adjust_object_size, bytes_to_words, card_align_down, card_align_up, raw_align_up,
    words_to_bytes,
};
use crate::util::log;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};

pub mod block;
pub mod block_offset;
mod census;
pub mod dictionary;
pub mod free_list;
pub mod heap;
mod lab;
pub mod plab;
pub mod sweep;
mod verify;

pub use self::block::{object_size_in_words, BlockHeader, ObjectImage};
pub use self::census::SweepTimers;
pub use self::heap::HeapWords;
pub use self::plab::{PromotionLab, PromotionLabStats};
pub use self::sweep::SweepClosure;

use self::block_offset::BlockOffsetTable;
use self::dictionary::{Dictionary, Dither};
use self::free_list::AdaptiveFreeList;
use self::lab::LinearAllocBlock;

/// Proof that the free list lock is held.
pub struct FreeListGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

pub struct FreeListSpace {
    heap: HeapWords,
    bot: BlockOffsetTable,
    /// Shared with the collector.  Consulted for the size of blocks whose header is not
    /// installed yet.
    mark_bits: Arc<MarkBitMap>,
    /// The committed end.
    end: AtomicUsize,
    freelist_lock: Mutex<()>,
    /// Serializes dictionary allocation by parallel promotion threads.
    par_dictionary_alloc_lock: Mutex<()>,
    /// Indexed by chunk size.  Entries below `INDEX_SET_START` are never used.
    indexed_free_list: Vec<spin::Mutex<AdaptiveFreeList>>,
    dictionary: spin::Mutex<Dictionary>,
    small_lab: spin::Mutex<LinearAllocBlock>,
    large_lab: spin::Mutex<LinearAllocBlock>,
    plab_stats: PromotionLabStats,
    sweep_timers: Mutex<SweepTimers>,
    /// Garbage at or above this address is always coalesced by the sweeper.
    near_largest_chunk: AtomicUsize,
    options: Arc<Options>,
}

impl FreeListSpace {
    /// Create the space over `[options.heap_start, options.heap_start + options.max_heap_size)`
    /// with `options.initial_heap_size` bytes committed as one free chunk.
    pub fn new(options: Arc<Options>, mark_bits: Arc<MarkBitMap>) -> Self {
        let bottom = options.heap_start;
        let reserved = raw_align_up(options.max_heap_size, BYTES_IN_CARD);
        let initial = raw_align_up(options.initial_heap_size.min(reserved), BYTES_IN_CARD);
        assert!(
            mark_bits.covers(bottom) && mark_bits.end() >= bottom + reserved,
            "the mark bit map does not cover the reserved space"
        );

        let (weight, padding) = (options.fls_weight as u32, options.fls_padding as u32);
        let indexed_free_list = (0..INDEX_SET_SIZE)
            .map(|size| {
                let mut list = AdaptiveFreeList::new(size, weight, padding);
                list.hint = INDEX_SET_SIZE;
                spin::Mutex::new(list)
            })
            .collect();

        let space = FreeListSpace {
            heap: HeapWords::new(bottom, reserved),
            bot: BlockOffsetTable::new(bottom, reserved),
            mark_bits,
            end: AtomicUsize::new((bottom + initial).as_usize()),
            freelist_lock: Mutex::new(()),
            par_dictionary_alloc_lock: Mutex::new(()),
            indexed_free_list,
            dictionary: spin::Mutex::new(Dictionary::new(weight, padding)),
            small_lab: spin::Mutex::new(LinearAllocBlock::new(
                options.small_lab_refill_words,
                SMALL_FOR_LINEAR_ALLOC,
            )),
            large_lab: spin::Mutex::new(LinearAllocBlock::new(
                options.large_lab_refill_words,
                SMALL_FOR_DICTIONARY,
            )),
            plab_stats: PromotionLabStats::new(&options),
            sweep_timers: Mutex::new(SweepTimers::new(options.sweep_weight as u32)),
            near_largest_chunk: AtomicUsize::new(0),
            options,
        };
        space.add_chunk_to_free_lists(bottom, bytes_to_words(initial));
        log::debug!(
            "Created free list space {}..{} (reserved up to {})",
            space.bottom(),
            space.end(),
            space.reserved_end()
        );
        space
    }

    /// Take the free list lock.
    pub fn lock(&self) -> FreeListGuard<'_> {
        FreeListGuard {
            _guard: self.freelist_lock.lock().unwrap(),
        }
    }

    pub fn try_lock(&self) -> Option<FreeListGuard<'_>> {
        self.freelist_lock
            .try_lock()
            .ok()
            .map(|guard| FreeListGuard { _guard: guard })
    }

    pub fn heap(&self) -> &HeapWords {
        &self.heap
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn bottom(&self) -> Address {
        self.heap.start()
    }

    pub fn end(&self) -> Address {
        Address::from_usize(self.end.load(Ordering::Acquire))
    }

    /// The end of the reserved range.  The space never grows beyond it.
    pub fn reserved_end(&self) -> Address {
        self.heap.end()
    }

    pub fn used_region(&self) -> Range<Address> {
        self.bottom()..self.end()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.bottom() && addr < self.end()
    }

    pub fn capacity_in_words(&self) -> usize {
        self.end().words_from(self.bottom())
    }

    /// Committed bytes.
    pub fn capacity(&self) -> usize {
        words_to_bytes(self.capacity_in_words())
    }

    /// Bytes that can still be committed.
    pub fn uncommitted(&self) -> usize {
        self.reserved_end() - self.end()
    }

    fn total_size_in_indexed_free_lists(&self) -> usize {
        (INDEX_SET_START..INDEX_SET_SIZE)
            .map(|size| size * self.indexed_free_list[size].lock().count())
            .sum()
    }

    /// Words in free chunks and in the unused parts of the linear allocation blocks.
    pub fn free_words(&self) -> usize {
        self.total_size_in_indexed_free_lists()
            + self.dictionary.lock().total_size()
            + self.lab_free_words()
    }

    /// Free bytes.
    pub fn free(&self) -> usize {
        words_to_bytes(self.free_words())
    }

    /// Bytes in allocated blocks.
    pub fn used(&self) -> usize {
        self.capacity().saturating_sub(self.free())
    }

    /// Fraction of the committed space in allocated blocks.
    pub fn occupancy(&self) -> f64 {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0.0;
        }
        self.used() as f64 / capacity as f64
    }

    /// The largest block a single allocation can currently get, in words.
    pub fn max_chunk_size(&self) -> usize {
        let dict_max = self.dictionary.lock().max_chunk_size();
        if dict_max > 0 {
            return dict_max.max(self.lab_max_chunk_size());
        }
        let indexed_max = (INDEX_SET_START..INDEX_SET_SIZE)
            .rev()
            .find(|size| !self.indexed_free_list[*size].lock().is_empty())
            .unwrap_or(0);
        indexed_max.max(self.lab_max_chunk_size())
    }

    // Block queries

    /// The size of the block at `block`.  The block must be parsable: either it carries a
    /// header, or it was allocated while the collector was marking and its size is recorded in
    /// the mark bit map.
    pub fn block_size(&self, block: Address) -> usize {
        match self.block_size_careful(block) {
            Some(size) => size,
            None => {
                log::error!("Unparsable block at {}", block);
                panic!("Unparsable block at {}", block);
            }
        }
    }

    /// The size of the block at `block`, or `None` if its header is not installed and the mark
    /// bit map does not describe it.
    pub fn block_size_careful(&self, block: Address) -> Option<usize> {
        match self.heap.header(block) {
            BlockHeader::Uninitialized => {
                self.mark_bits.block_size_from_marks(block, self.end())
            }
            header => header.size(),
        }
    }

    /// Whether `block` starts an installed object.
    pub fn block_is_obj(&self, block: Address) -> bool {
        self.heap.header(block).is_object()
    }

    /// The start of the block containing `addr`.
    pub fn block_start(&self, addr: Address) -> Address {
        debug_assert!(self.contains(addr), "{} is outside the space", addr);
        let mut cur = self.bot.entry_for(addr);
        loop {
            let next = cur.add_words(self.block_size(cur));
            if next > addr {
                return cur;
            }
            cur = next;
        }
    }

    /// Like [`FreeListSpace::block_start`], but gives up on an unparsable block.
    pub fn block_start_careful(&self, addr: Address) -> Option<Address> {
        debug_assert!(self.contains(addr), "{} is outside the space", addr);
        let mut cur = self.bot.entry_for(addr);
        loop {
            let next = cur.add_words(self.block_size_careful(cur)?);
            if next > addr {
                return Some(cur);
            }
            cur = next;
        }
    }

    /// Visit every block in `range`, starting with the block that covers `range.start`.  The
    /// caller makes sure nothing changes the blocks meanwhile.
    pub fn for_each_block_in<F: FnMut(Address, BlockHeader, usize)>(
        &self,
        range: Range<Address>,
        mut f: F,
    ) {
        if range.start >= range.end {
            return;
        }
        let mut cur = self.block_start(range.start);
        while cur < range.end {
            let size = self.block_size(cur);
            f(cur, self.heap.header(cur), size);
            cur = cur.add_words(size);
        }
    }

    /// Visit every block of the committed space.
    pub fn for_each_block<F: FnMut(Address, BlockHeader, usize)>(&self, f: F) {
        self.for_each_block_in(self.used_region(), f)
    }

    // Allocation

    /// Allocate a block of at least `size` words.  The block's header word is zero: the caller
    /// installs the object (or records the block in the mark bit map) before anyone can walk
    /// over it.
    pub fn allocate(&self, _g: &FreeListGuard, size: usize) -> Option<Address> {
        let size = adjust_object_size(size);
        let res = if size < SMALL_FOR_DICTIONARY {
            self.allocate_small(size)
        } else {
            self.allocate_large(size)
        }?;
        self.heap.set_header(res, BlockHeader::Uninitialized);
        log::trace!("Allocated {} words at {}", size, res);
        Some(res)
    }

    fn allocate_small(&self, size: usize) -> Option<Address> {
        if let Some(res) = self.get_chunk_from_indexed_free_list(size) {
            return Some(res);
        }
        let mut res = None;
        for lab in [&self.small_lab, &self.large_lab] {
            let mut blk = lab.lock();
            if size < blk.allocation_size_limit {
                res = self.get_chunk_from_linear_alloc_block(&mut blk, size);
                break;
            }
        }
        res.or_else(|| self.get_chunk_from_greater(size))
    }

    fn allocate_large(&self, size: usize) -> Option<Address> {
        self.get_chunk_from_dictionary_exact(size)
            .or_else(|| {
                self.get_chunk_from_linear_alloc_block_remainder(&mut self.large_lab.lock(), size)
            })
            .or_else(|| {
                self.get_chunk_from_linear_alloc_block_remainder(&mut self.small_lab.lock(), size)
            })
    }

    /// Take a chunk of exactly `size` words from its indexed list, replenishing the list from
    /// a larger chunk when it is empty.
    fn get_chunk_from_indexed_free_list(&self, size: usize) -> Option<Address> {
        debug_assert!(size >= INDEX_SET_START && size < INDEX_SET_SIZE);
        if let Some(fc) = self.indexed_free_list[size]
            .lock()
            .get_chunk_at_head(&self.heap)
        {
            return Some(fc);
        }

        let replenish_size = self.options.indexed_free_list_replenish * size;
        let mut new_fc = None;
        if replenish_size < SMALL_FOR_DICTIONARY {
            new_fc = {
                let mut list = self.indexed_free_list[replenish_size].lock();
                if list.stats.surplus > 0 {
                    list.get_chunk_at_head(&self.heap)
                } else {
                    None
                }
            };
            if new_fc.is_none() {
                new_fc = self.best_fit_small(replenish_size);
            }
        }
        if new_fc.is_none() && replenish_size > size {
            new_fc = if replenish_size < SMALL_FOR_DICTIONARY {
                self.get_chunk_from_indexed_free_list(replenish_size)
            } else {
                self.get_chunk_from_dictionary_exact(replenish_size)
            };
        }
        let new_fc = new_fc?;

        // Carve the chunk into pieces of `size` words.  All but the first go on the list.
        let new_size = self.heap.chunk_size(new_fc);
        debug_assert_eq!(new_size % size, 0);
        let num_blk = new_size / size;
        if num_blk > 1 {
            self.split_death(new_size);
        }
        // Last to first, so the chunk reads as one free block until its head is rewritten.
        for i in (1..num_blk).rev() {
            let piece = new_fc.add_words(i * size);
            self.heap.write_free_chunk(piece, size);
            self.bot.mark_block(piece..piece.add_words(size));
        }
        self.heap.write_free_chunk(new_fc, size);
        self.bot.mark_block(new_fc..new_fc.add_words(size));
        {
            let mut list = self.indexed_free_list[size].lock();
            for i in 1..num_blk {
                list.return_chunk_at_tail(&self.heap, new_fc.add_words(i * size));
                list.increment_split_births();
            }
            list.increment_split_births();
        }
        Some(new_fc)
    }

    /// Split a chunk of `num_words` off a larger indexed list with a surplus, following the
    /// hints left by the last census.
    fn best_fit_small(&self, num_words: usize) -> Option<Address> {
        let start = adjust_object_size(num_words + MIN_CHUNK_SIZE_IN_WORDS);
        if start >= INDEX_SET_SIZE {
            return None;
        }
        let mut hint = self.indexed_free_list[start].lock().hint;
        while hint < INDEX_SET_SIZE {
            let next = {
                let list = self.indexed_free_list[hint].lock();
                if list.stats.surplus > 0 && !list.is_empty() {
                    None
                } else {
                    Some(list.hint)
                }
            };
            match next {
                None => {
                    self.indexed_free_list[start].lock().hint = hint;
                    if let Some(res) = self.get_from_list_greater(hint, num_words) {
                        return Some(res);
                    }
                    // Taken by a parallel thread meanwhile.
                    return None;
                }
                Some(next) => {
                    debug_assert!(next > hint, "hints must grow");
                    hint = next;
                }
            }
        }
        self.indexed_free_list[INDEX_SET_SIZE - 1].lock().hint = INDEX_SET_SIZE;
        None
    }

    /// Take the head of the `list_size` list and split `num_words` off it.
    fn get_from_list_greater(&self, list_size: usize, num_words: usize) -> Option<Address> {
        debug_assert!(list_size >= num_words + MIN_CHUNK_SIZE_IN_WORDS);
        let curr = self.indexed_free_list[list_size]
            .lock()
            .get_chunk_at_head(&self.heap)?;
        Some(self.split_chunk_and_return_remainder(curr, num_words))
    }

    /// Satisfy a small request by splitting the first larger chunk found.
    fn get_chunk_from_greater(&self, num_words: usize) -> Option<Address> {
        let start = adjust_object_size(num_words + MIN_CHUNK_SIZE_IN_WORDS);
        for size in (start..INDEX_SET_SIZE).step_by(INDEX_SET_STRIDE) {
            let has_head = !self.indexed_free_list[size].lock().is_empty();
            if has_head {
                if let Some(res) = self.get_from_list_greater(size, num_words) {
                    return Some(res);
                }
            }
        }
        let curr = self.dictionary.lock().get_chunk(
            &self.heap,
            (num_words + MIN_CHUNK_SIZE_IN_WORDS).max(SMALL_FOR_DICTIONARY),
            Dither::AtLeast,
        )?;
        Some(self.split_chunk_and_return_remainder(curr, num_words))
    }

    /// Take a chunk of exactly `size` words from the dictionary, splitting a larger one.  Never
    /// leaves a fragment below the minimum chunk size.
    fn get_chunk_from_dictionary_exact(&self, size: usize) -> Option<Address> {
        let mut fc = self
            .dictionary
            .lock()
            .get_chunk(&self.heap, size, Dither::AtLeast)?;
        let fc_size = self.heap.chunk_size(fc);
        if fc_size == size {
            return Some(fc);
        }
        debug_assert!(fc_size > size);
        if fc_size < size + MIN_CHUNK_SIZE_IN_WORDS {
            // Splitting would leave an unusable fragment.  Look for a bigger one.
            fc = {
                let mut dict = self.dictionary.lock();
                dict.return_chunk(&self.heap, fc);
                dict.get_chunk(&self.heap, size + MIN_CHUNK_SIZE_IN_WORDS, Dither::AtLeast)
            }?;
        }
        Some(self.split_chunk_and_return_remainder(fc, size))
    }

    /// Take a chunk of at least `size` words from the dictionary for a linear allocation block.
    /// Splits only if the remainder would be a viable chunk.
    fn get_chunk_from_dictionary(&self, size: usize) -> Option<Address> {
        let fc = self
            .dictionary
            .lock()
            .get_chunk(&self.heap, size.max(MIN_CHUNK_SIZE_IN_WORDS), Dither::AtLeast)?;
        if self.heap.chunk_size(fc) >= size + MIN_CHUNK_SIZE_IN_WORDS {
            Some(self.split_chunk_and_return_remainder(fc, size))
        } else {
            Some(fc)
        }
    }

    /// Split `chunk`, which is on no list, into a `new_size` prefix and a free remainder.  The
    /// remainder goes back to the lists; the prefix is returned as a free chunk.
    fn split_chunk_and_return_remainder(&self, chunk: Address, new_size: usize) -> Address {
        let size = self.heap.chunk_size(chunk);
        debug_assert!(size >= new_size + MIN_CHUNK_SIZE_IN_WORDS);
        let rem_size = size - new_size;
        let rem = chunk.add_words(new_size);
        // The remainder is published before the chunk shrinks, so a reader never finds a gap.
        self.heap.write_free_chunk(rem, rem_size);
        self.bot.mark_block(rem..rem.add_words(rem_size));
        self.return_chunk_to_free_lists(rem, rem_size);
        self.split(size, rem_size);
        self.heap.write_free_chunk(chunk, new_size);
        chunk
    }

    /// Put a free chunk, already written and recorded in the block offset table, on its list.
    fn return_chunk_to_free_lists(&self, chunk: Address, size: usize) {
        if size < SMALL_FOR_DICTIONARY {
            self.indexed_free_list[size]
                .lock()
                .return_chunk_at_tail(&self.heap, chunk);
        } else {
            self.dictionary.lock().return_chunk(&self.heap, chunk);
        }
    }

    /// Turn `[chunk, chunk + size)` into a free chunk on the appropriate list.
    pub fn add_chunk_to_free_lists(&self, chunk: Address, size: usize) {
        debug_assert!(size >= MIN_CHUNK_SIZE_IN_WORDS);
        debug_assert!(chunk.add_words(size) <= self.end());
        self.heap.write_free_chunk(chunk, size);
        self.bot.mark_block(chunk..chunk.add_words(size));
        self.return_chunk_to_free_lists(chunk, size);
    }

    /// Unlink a free chunk from whichever list holds it.
    pub fn remove_free_chunk_from_free_lists(&self, chunk: Address) {
        let size = self.heap.chunk_size(chunk);
        if size < SMALL_FOR_DICTIONARY {
            self.indexed_free_list[size]
                .lock()
                .remove_chunk(&self.heap, chunk);
        } else {
            self.dictionary.lock().remove_chunk(&self.heap, chunk);
        }
    }

    /// Whether the free chunk at `chunk` is on one of the lists.  Linear in the length of the
    /// chunk's list.
    pub fn free_lists_contain(&self, chunk: Address) -> bool {
        let size = match self.heap.header(chunk) {
            BlockHeader::Free { size } => size,
            _ => return false,
        };
        if size < SMALL_FOR_DICTIONARY {
            let list = self.indexed_free_list[size].lock();
            let found = list.iter(&self.heap).any(|c| c == chunk);
            found
        } else {
            let dict = self.dictionary.lock();
            let mut found = false;
            dict.for_each_chunk(&self.heap, |c, _| found |= c == chunk);
            found
        }
    }

    // Census bookkeeping

    pub(super) fn split_birth(&self, size: usize) {
        if size < SMALL_FOR_DICTIONARY {
            self.indexed_free_list[size].lock().increment_split_births();
        } else {
            self.dictionary.lock().dict_census_update(size, true, true);
        }
    }

    pub(super) fn split_death(&self, size: usize) {
        if size < SMALL_FOR_DICTIONARY {
            self.indexed_free_list[size].lock().increment_split_deaths();
        } else {
            self.dictionary.lock().dict_census_update(size, true, false);
        }
    }

    pub(super) fn coal_birth(&self, size: usize) {
        if size < SMALL_FOR_DICTIONARY {
            self.indexed_free_list[size].lock().increment_coal_births();
        } else {
            self.dictionary.lock().dict_census_update(size, false, true);
        }
    }

    pub(super) fn coal_death(&self, size: usize) {
        if size < SMALL_FOR_DICTIONARY {
            self.indexed_free_list[size].lock().increment_coal_deaths();
        } else {
            self.dictionary.lock().dict_census_update(size, false, false);
        }
    }

    /// Record the split of a `from` word chunk into a `from - to1` and a `to1` word chunk.
    fn split(&self, from: usize, to1: usize) {
        self.split_death(from);
        self.split_birth(to1);
        self.split_birth(from - to1);
    }

    /// Whether chunks of `size` words are more plentiful than the census wants.
    pub(super) fn coal_over_populated(&self, size: usize) -> bool {
        if size < SMALL_FOR_DICTIONARY {
            self.indexed_free_list[size].lock().coal_over_populated()
        } else {
            self.dictionary.lock().coal_dict_over_populated(size)
        }
    }

    // Growing and shrinking

    /// Commit up to `bytes` more bytes (rounded up to whole cards) at the end of the space.  The
    /// new space is coalesced with a free chunk ending at the old end.  Returns false if nothing
    /// could be committed.
    pub fn expand(&self, _g: &FreeListGuard, bytes: usize) -> bool {
        let prev_end = self.end();
        let new_end = (prev_end + raw_align_up(bytes, BYTES_IN_CARD)).min(self.reserved_end());
        if new_end <= prev_end {
            return false;
        }
        let _x = self.par_dictionary_alloc_lock.lock().unwrap();
        let mut chunk = prev_end;
        let mut size = new_end.words_from(prev_end);
        if let Some(tail) = self.free_tail_chunk(prev_end) {
            let tail_size = self.heap.chunk_size(tail);
            self.coal_death(tail_size);
            self.remove_free_chunk_from_free_lists(tail);
            chunk = tail;
            size += tail_size;
        }
        self.end.store(new_end.as_usize(), Ordering::Release);
        self.add_chunk_to_free_lists(chunk, size);
        self.coal_birth(size);
        log::debug!(
            "Expanded free list space by {} to {}",
            new_end - prev_end,
            new_end
        );
        true
    }

    /// The free chunk on the lists that ends at `end`, if any.
    fn free_tail_chunk(&self, end: Address) -> Option<Address> {
        if end <= self.bottom() {
            return None;
        }
        let last = self.block_start_careful(end.sub_words(1))?;
        if self.free_lists_contain(last) {
            Some(last)
        } else {
            None
        }
    }

    /// Uncommit up to `bytes` bytes of free space at the end.  Only a free tail chunk is ever
    /// given back, and the end stays card aligned.  Returns the number of bytes released.
    pub fn shrink_by(&self, _g: &FreeListGuard, bytes: usize) -> usize {
        let _x = self.par_dictionary_alloc_lock.lock().unwrap();
        let end = self.end();
        let tail = match self.free_tail_chunk(end) {
            Some(tail) => tail,
            None => return 0,
        };
        let tail_size = self.heap.chunk_size(tail);
        let lowest = card_align_up(tail)
            .max(card_align_up(self.bottom().add_words(MIN_CHUNK_SIZE_IN_WORDS)));
        let mut new_end = card_align_down(end.saturating_sub(bytes));
        if new_end < lowest {
            new_end = lowest;
        }
        let remainder = new_end.words_from(tail);
        if remainder > 0 && remainder < MIN_CHUNK_SIZE_IN_WORDS {
            new_end = new_end + BYTES_IN_CARD;
        }
        if new_end >= end {
            return 0;
        }
        self.coal_death(tail_size);
        self.remove_free_chunk_from_free_lists(tail);
        let remainder = new_end.words_from(tail);
        if remainder > 0 {
            self.add_chunk_to_free_lists(tail, remainder);
            self.coal_birth(remainder);
        }
        self.end.store(new_end.as_usize(), Ordering::Release);
        log::debug!(
            "Shrunk free list space by {} to {}",
            end - new_end,
            new_end
        );
        end - new_end
    }

    /// Allocate a block and copy `image` into it.
    pub fn promote(&self, g: &FreeListGuard, image: &ObjectImage) -> Option<ObjectReference> {
        let size = image.size_in_words();
        let block = self.allocate(g, size)?;
        self.heap.install_object(block, adjust_object_size(size), image);
        Some(ObjectReference::from_raw_address(block))
    }

    /// Allocate while not holding the free list lock.  Used by threads that allocate outside a
    /// young collection.
    pub fn par_allocate(&self, size: usize) -> Option<Address> {
        let g = self.lock();
        self.allocate(&g, size)
    }

    #[cfg(test)]
    pub(crate) fn mark_bits(&self) -> &MarkBitMap {
        &self.mark_bits
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TEST_HEAP_START: Address = Address::from_usize(0x2000_0000);

    /// A space with `words` words committed and four times as much reserved.
    pub(crate) fn new_space(words: usize) -> FreeListSpace {
        new_space_with(words, |_| {})
    }

    pub(crate) fn new_space_with(words: usize, f: impl FnOnce(&mut Options)) -> FreeListSpace {
        let mut options = Options::without_env();
        options.heap_start = TEST_HEAP_START;
        options.initial_heap_size = words_to_bytes(words);
        options.max_heap_size = 4 * options.initial_heap_size;
        f(&mut options);
        let bits = Arc::new(MarkBitMap::new(
            options.heap_start,
            bytes_to_words(options.max_heap_size),
            0,
        ));
        FreeListSpace::new(Arc::new(options), bits)
    }

    /// Install a reference-free object filling the block at `block`.
    pub(crate) fn install_filler(space: &FreeListSpace, block: Address, size: usize) {
        let payload = vec![0usize; size - block::OBJECT_HEADER_WORDS];
        space.heap().install_object(
            block,
            size,
            &ObjectImage {
                mark: 0,
                refs: &[],
                payload: &payload,
            },
        );
    }

    #[test]
    fn initial_space_is_one_chunk() {
        let space = new_space(16 * WORDS_IN_CARD);
        let g = space.lock();
        assert_eq!(space.capacity_in_words(), 16 * WORDS_IN_CARD);
        assert_eq!(space.free_words(), 16 * WORDS_IN_CARD);
        assert_eq!(space.max_chunk_size(), 16 * WORDS_IN_CARD);
        assert_eq!(space.used(), 0);
        assert!(space.free_lists_contain(space.bottom()));
        space.verify_free_lists(&g);
    }

    #[test]
    fn split_leaves_exact_remainder() {
        // A 1024 word chunk asked for 40 words leaves a 984 word chunk behind.
        let space = new_space_with(1024, |options| options.indexed_free_list_replenish = 1);
        let g = space.lock();
        let res = space.allocate(&g, 40).unwrap();
        assert_eq!(res, space.bottom());
        let rem = res.add_words(40);
        assert_eq!(space.heap().chunk_size(rem), 984);
        assert!(space.free_lists_contain(rem));
        assert_eq!(space.dictionary.lock().count_of(984), 1);
        assert_eq!(space.free_words(), 984);
        install_filler(&space, res, 40);
        assert_eq!(space.block_start(rem.add_words(500)), rem);
        assert_eq!(space.block_start(res.add_words(39)), res);
        space.verify_conservation(&g);
        space.verify_single_owner(&g);
    }

    #[test]
    fn no_fragment_below_minimum() {
        let space = new_space_with(1024, |options| options.indexed_free_list_replenish = 1);
        let g = space.lock();
        // 1022 words would leave 2: the whole chunk cannot be used.
        assert_eq!(space.allocate(&g, 1022), None);
        assert_eq!(space.free_words(), 1024);
        assert_eq!(space.allocate(&g, 1024), Some(space.bottom()));
        assert_eq!(space.free_words(), 0);
    }

    #[test]
    fn exhaustion_then_expansion() {
        const C: usize = 16384;
        const S: usize = 512;
        let space = new_space(C);
        let g = space.lock();
        let mut count = 0;
        while let Some(block) = space.allocate(&g, S) {
            install_filler(&space, block, S);
            count += 1;
        }
        assert_eq!(count, (C + S - 1) / S);
        assert_eq!(space.free_words(), 0);
        assert!(space.expand(&g, words_to_bytes(S)));
        let block = space.allocate(&g, S).unwrap();
        assert_eq!(block, space.bottom().add_words(C));
        install_filler(&space, block, S);
        space.verify_conservation(&g);
    }

    #[test]
    fn expansion_coalesces_with_tail() {
        let space = new_space(4 * WORDS_IN_CARD);
        let g = space.lock();
        let a = space.allocate(&g, 100).unwrap();
        install_filler(&space, a, 100);
        let tail = a.add_words(100);
        let tail_size = space.heap().chunk_size(tail);
        assert!(space.expand(&g, BYTES_IN_CARD));
        assert_eq!(space.heap().chunk_size(tail), tail_size + WORDS_IN_CARD);
        assert!(space.free_lists_contain(tail));
        space.verify_conservation(&g);

        let released = space.shrink_by(&g, 2 * BYTES_IN_CARD);
        assert_eq!(released, 2 * BYTES_IN_CARD);
        assert_eq!(space.capacity_in_words(), 3 * WORDS_IN_CARD);
        space.verify_conservation(&g);
        space.verify_single_owner(&g);
    }

    #[test]
    fn small_requests_replenish_their_list() {
        let space = new_space(64 * WORDS_IN_CARD);
        let g = space.lock();
        // With the default replenish factor of 4, the first 8 word request carves a 32 word
        // chunk into four pieces.
        let a = space.allocate(&g, 8).unwrap();
        assert_eq!(space.indexed_free_list[8].lock().count(), 3);
        let b = space.allocate(&g, 8).unwrap();
        assert_eq!(b, a.add_words(8));
        install_filler(&space, a, 8);
        install_filler(&space, b, 8);
        space.verify_conservation(&g);
        space.verify_single_owner(&g);
    }
}
