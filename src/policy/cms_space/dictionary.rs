//! The dictionary of large free chunks, keyed by size.

use std::collections::BTreeMap;

use super::free_list::AdaptiveFreeList;
use super::heap::HeapWords;
use crate::util::constants::MIN_CHUNK_SIZE_IN_WORDS;
use crate::util::Address;

/// How a dictionary lookup treats sizes larger than the request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dither {
    /// Only a chunk of exactly the requested size will do.
    Exactly,
    /// The smallest chunk at least as large as the request.
    AtLeast,
}

/// Free chunks at or above `SMALL_FOR_DICTIONARY` words.  One [`AdaptiveFreeList`] per distinct
/// size that currently has chunks; an emptied list is dropped together with its statistics.
pub struct Dictionary {
    lists: BTreeMap<usize, AdaptiveFreeList>,
    total_size: usize,
    total_free_blocks: usize,
    fls_weight: u32,
    fls_padding: u32,
}

impl Dictionary {
    pub fn new(fls_weight: u32, fls_padding: u32) -> Self {
        Dictionary {
            lists: BTreeMap::new(),
            total_size: 0,
            total_free_blocks: 0,
            fls_weight,
            fls_padding,
        }
    }

    /// Total words in the dictionary.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn total_free_blocks(&self) -> usize {
        self.total_free_blocks
    }

    pub fn is_empty(&self) -> bool {
        self.total_free_blocks == 0
    }

    /// The size of the largest chunk, or 0.
    pub fn max_chunk_size(&self) -> usize {
        self.lists.keys().next_back().copied().unwrap_or(0)
    }

    /// The first chunk of the largest size.
    pub fn find_largest_dict(&self) -> Option<Address> {
        self.lists.values().next_back().and_then(|l| l.head())
    }

    /// Add a free chunk.
    pub fn return_chunk(&mut self, heap: &HeapWords, chunk: Address) {
        let size = heap.chunk_size(chunk);
        let (w, p) = (self.fls_weight, self.fls_padding);
        self.lists
            .entry(size)
            .or_insert_with(|| AdaptiveFreeList::new(size, w, p))
            .return_chunk_at_tail(heap, chunk);
        self.total_size += size;
        self.total_free_blocks += 1;
    }

    /// Remove and return a chunk of `size` words (or larger, for [`Dither::AtLeast`]).
    pub fn get_chunk(&mut self, heap: &HeapWords, size: usize, dither: Dither) -> Option<Address> {
        debug_assert!(size >= MIN_CHUNK_SIZE_IN_WORDS);
        let found = match dither {
            Dither::Exactly => self.lists.get(&size).map(|_| size),
            Dither::AtLeast => self.lists.range(size..).next().map(|(k, _)| *k),
        }?;
        let list = self.lists.get_mut(&found)?;
        let chunk = list.get_chunk_at_head(heap)?;
        if list.is_empty() {
            self.lists.remove(&found);
        }
        self.total_size -= found;
        self.total_free_blocks -= 1;
        Some(chunk)
    }

    /// Unlink a specific chunk, which must be in the dictionary.
    pub fn remove_chunk(&mut self, heap: &HeapWords, chunk: Address) {
        let size = heap.chunk_size(chunk);
        let list = self
            .lists
            .get_mut(&size)
            .unwrap_or_else(|| panic!("no {} word list for chunk {}", size, chunk));
        list.remove_chunk(heap, chunk);
        if list.is_empty() {
            self.lists.remove(&size);
        }
        self.total_size -= size;
        self.total_free_blocks -= 1;
    }

    /// The number of chunks of exactly `size` words.
    pub fn count_of(&self, size: usize) -> usize {
        self.lists.get(&size).map_or(0, |l| l.count())
    }

    /// Find a free chunk in the dictionary that ends exactly at `addr`.  Linear in the number of
    /// chunks; used only when the space grows.
    pub fn find_chunk_ends_at(&self, heap: &HeapWords, addr: Address) -> Option<Address> {
        self.lists.values().find_map(|list| {
            let size = list.size();
            list.iter(heap).find(|c| c.add_words(size) == addr)
        })
    }

    /// Visit every chunk.
    pub fn for_each_chunk<F: FnMut(Address, usize)>(&self, heap: &HeapWords, mut f: F) {
        for list in self.lists.values() {
            for c in list.iter(heap) {
                f(c, list.size());
            }
        }
    }

    // Census

    /// Whether the sweeper should coalesce a chunk of `size` words into its neighbours.
    pub fn coal_dict_over_populated(&self, size: usize) -> bool {
        match self.lists.get(&size) {
            None => true,
            Some(list) => {
                list.stats.coal_desired <= 0 || list.count() as isize > list.stats.coal_desired
            }
        }
    }

    /// Record a split or coalesce birth or death for the list of `size`, if it exists.  A chunk
    /// that is not in the dictionary (a linear allocation block, for example) has no list to
    /// charge.
    pub fn dict_census_update(&mut self, size: usize, split: bool, birth: bool) {
        if let Some(list) = self.lists.get_mut(&size) {
            match (split, birth) {
                (true, true) => list.increment_split_births(),
                (true, false) => list.increment_split_deaths(),
                (false, true) => list.increment_coal_births(),
                (false, false) => list.increment_coal_deaths(),
            }
        }
    }

    pub fn begin_sweep_dict_census(
        &mut self,
        coal_surplus_percent: f64,
        inter_sweep_current: f64,
        inter_sweep_estimate: f64,
        intra_sweep_estimate: f64,
        extrapolate: bool,
    ) {
        for list in self.lists.values_mut() {
            list.begin_sweep_census(
                coal_surplus_percent,
                inter_sweep_current,
                inter_sweep_estimate,
                intra_sweep_estimate,
                extrapolate,
            );
        }
    }

    pub fn end_sweep_dict_census(&mut self, split_surplus_percent: f64) {
        for list in self.lists.values_mut() {
            list.set_surplus(split_surplus_percent);
            list.clear_census();
        }
        self.set_tree_hints();
    }

    /// Point each list's hint at the next larger size with a surplus.
    fn set_tree_hints(&mut self) {
        let mut hint = 0;
        for (size, list) in self.lists.iter_mut().rev() {
            list.hint = hint;
            if list.stats.surplus > 0 {
                hint = *size;
            }
        }
    }

    /// Sum of `desired` over all lists, for logging.
    pub fn sum_of_desired(&self) -> isize {
        self.lists.values().map(|l| l.stats.desired).sum()
    }

    /// Walk every list.  Panics on an inconsistency.
    pub fn verify(&self, heap: &HeapWords) {
        let mut size_sum = 0;
        let mut blocks = 0;
        for (size, list) in &self.lists {
            assert_eq!(*size, list.size());
            assert!(!list.is_empty(), "empty {} word list left in the dictionary", size);
            list.verify(heap);
            size_sum += size * list.count();
            blocks += list.count();
        }
        assert_eq!(size_sum, self.total_size, "dictionary total size mismatch");
        assert_eq!(blocks, self.total_free_blocks, "dictionary block count mismatch");
    }
}
