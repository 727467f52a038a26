//! Promotion LABs: per worker free lists used by parallel young collections to promote objects
//! without taking the free list lock.

use std::sync::Mutex;

use super::dictionary::Dither;
use super::free_list::AdaptiveFreeList;
use super::{BlockHeader, FreeListSpace};
use crate::util::averages::AdaptiveWeightedAverage;
use crate::util::constants::*;
use crate::util::conversions::adjust_object_size;
use crate::util::log;
use crate::util::options::Options;
use crate::util::Address;

struct PlabCounters {
    /// How many blocks of each size a worker claims when its local list runs dry.
    blocks_to_claim: Vec<AdaptiveWeightedAverage>,
    /// Blocks used during the current young collection, over all workers.
    global_num_blocks: Vec<usize>,
    /// Workers that used blocks of each size during the current young collection.
    global_num_workers: Vec<usize>,
}

/// Promotion LAB sizing shared by all workers.  Lives in the space so it survives from one young
/// collection to the next.
pub struct PromotionLabStats {
    counters: Mutex<PlabCounters>,
    resize: bool,
    min: usize,
    max: usize,
    num_refills: usize,
}

impl PromotionLabStats {
    pub fn new(options: &Options) -> Self {
        let initial = options.old_plab_min as f64;
        PromotionLabStats {
            counters: Mutex::new(PlabCounters {
                blocks_to_claim: (0..INDEX_SET_SIZE)
                    .map(|_| {
                        AdaptiveWeightedAverage::with_initial(
                            options.old_plab_weight as u32,
                            initial,
                        )
                    })
                    .collect(),
                global_num_blocks: vec![0; INDEX_SET_SIZE],
                global_num_workers: vec![0; INDEX_SET_SIZE],
            }),
            resize: options.resize_old_plab,
            min: options.old_plab_min,
            max: options.old_plab_max,
            num_refills: options.old_plab_num_refills,
        }
    }

    fn blocks_to_claim(&self, word_sz: usize) -> usize {
        (self.counters.lock().unwrap().blocks_to_claim[word_sz].average() as usize).max(1)
    }

    /// Fold the block counts of the last young collection into the claim sizes, and reset the
    /// counts.  Called once at the end of every young collection.
    pub fn compute_desired_plab_size(&self) {
        let mut counters = self.counters.lock().unwrap();
        let counters = &mut *counters;
        for i in (INDEX_SET_START..INDEX_SET_SIZE).step_by(INDEX_SET_STRIDE) {
            debug_assert_eq!(
                counters.global_num_workers[i] == 0,
                counters.global_num_blocks[i] == 0,
                "promotion LAB counters out of sync for size {}",
                i
            );
            if counters.global_num_workers[i] > 0 {
                if self.resize {
                    let per_refill = counters.global_num_blocks[i]
                        / (counters.global_num_workers[i] * self.num_refills);
                    counters.blocks_to_claim[i]
                        .sample(per_refill.clamp(self.min, self.max) as f64);
                }
                counters.global_num_workers[i] = 0;
                counters.global_num_blocks[i] = 0;
                log::trace!(
                    "Promotion LAB size {}: claim {} blocks",
                    i,
                    counters.blocks_to_claim[i].average()
                );
            }
        }
    }
}

/// A worker's promotion allocator.  Small requests are served from local lists of same-sized
/// chunks claimed in batches from the space; large ones go to the dictionary.
pub struct PromotionLab<'a> {
    space: &'a FreeListSpace,
    indexed_free_list: Vec<AdaptiveFreeList>,
    /// Blocks claimed from the space per size since the last retirement.
    num_blocks: Vec<usize>,
}

impl<'a> PromotionLab<'a> {
    pub fn new(space: &'a FreeListSpace) -> Self {
        let (weight, padding) = (
            space.options.fls_weight as u32,
            space.options.fls_padding as u32,
        );
        PromotionLab {
            space,
            indexed_free_list: (0..INDEX_SET_SIZE)
                .map(|size| AdaptiveFreeList::new(size, weight, padding))
                .collect(),
            num_blocks: vec![0; INDEX_SET_SIZE],
        }
    }

    /// Allocate a block of `word_sz` words for a promoted object.  The returned block's header is
    /// zero.
    pub fn alloc(&mut self, word_sz: usize) -> Option<Address> {
        let word_sz = adjust_object_size(word_sz);
        let space = self.space;
        let res = if word_sz >= INDEX_SET_SIZE {
            let _x = space.par_dictionary_alloc_lock.lock().unwrap();
            space.get_chunk_from_dictionary_exact(word_sz)?
        } else {
            if self.indexed_free_list[word_sz].is_empty() {
                self.get_from_global_pool(word_sz);
            }
            self.indexed_free_list[word_sz].get_chunk_at_head(&space.heap)?
        };
        space.heap.set_header(res, BlockHeader::Uninitialized);
        Some(res)
    }

    fn get_from_global_pool(&mut self, word_sz: usize) {
        let n_blks = self.space.plab_stats.blocks_to_claim(word_sz);
        let fl = &mut self.indexed_free_list[word_sz];
        self.space.par_get_chunk_of_blocks(word_sz, n_blks, fl);
        self.num_blocks[word_sz] += fl.count();
    }

    /// Return unused blocks to the space and record how many were used.  Runs once per worker
    /// at the end of a young collection, after all promotion is done.
    pub fn retire(&mut self) {
        let space = self.space;
        let mut counters = space.plab_stats.counters.lock().unwrap();
        for i in (INDEX_SET_START..INDEX_SET_SIZE).step_by(INDEX_SET_STRIDE) {
            if self.num_blocks[i] == 0 {
                continue;
            }
            let num_retire = self.indexed_free_list[i].count();
            debug_assert!(
                self.num_blocks[i] >= num_retire,
                "cannot retire more blocks than were claimed"
            );
            counters.global_num_blocks[i] += self.num_blocks[i] - num_retire;
            counters.global_num_workers[i] += 1;
            if num_retire > 0 {
                space.indexed_free_list[i]
                    .lock()
                    .prepend(&space.heap, &mut self.indexed_free_list[i]);
            }
            self.num_blocks[i] = 0;
        }
    }
}

impl FreeListSpace {
    /// Move up to `n` free chunks of `word_sz` words into the (empty) local list `fl`, splitting
    /// larger chunks if the global list has too few.  Safe to call from several threads at once
    /// while the free list lock is held on their behalf.
    pub fn par_get_chunk_of_blocks(&self, word_sz: usize, n: usize, fl: &mut AdaptiveFreeList) {
        debug_assert!(fl.is_empty());
        debug_assert!(word_sz < INDEX_SET_SIZE);
        if !self.par_get_chunk_of_blocks_ifl(word_sz, n, fl) {
            self.par_get_chunk_of_blocks_dictionary(word_sz, n, fl);
        }
    }

    /// Try the indexed lists of `word_sz` and its multiples.
    fn par_get_chunk_of_blocks_ifl(
        &self,
        word_sz: usize,
        n: usize,
        fl: &mut AdaptiveFreeList,
    ) -> bool {
        let (weight, padding) = (self.options.fls_weight as u32, self.options.fls_padding as u32);
        let mut k = 1;
        while k * word_sz < INDEX_SET_SIZE {
            let cur_sz = k * word_sz;
            let mut fl_for_cur_sz = AdaptiveFreeList::new(cur_sz, weight, padding);
            {
                let mut gfl = self.indexed_free_list[cur_sz].lock();
                if gfl.is_empty() {
                    k += 1;
                    continue;
                }
                // Each chunk of `cur_sz` words splits k ways.
                let nn = (n / k).max(1);
                gfl.get_first_n_chunks_from_list(&self.heap, nn, &mut fl_for_cur_sz);
                if k > 1 {
                    gfl.stats.split_deaths += fl_for_cur_sz.count() as isize;
                }
            }
            if k == 1 {
                fl.prepend(&self.heap, &mut fl_for_cur_sz);
            } else {
                while let Some(fc) = fl_for_cur_sz.get_chunk_at_head(&self.heap) {
                    // Right to left: the chunk reads as one free block until its head is
                    // rewritten.
                    for i in (0..k).rev() {
                        let ffc = fc.add_words(i * word_sz);
                        self.heap.write_free_chunk(ffc, word_sz);
                        self.bot.mark_block(ffc..ffc.add_words(word_sz));
                        fl.return_chunk_at_head(&self.heap, ffc);
                    }
                }
                self.indexed_free_list[word_sz].lock().stats.split_births += fl.count() as isize;
            }
            return true;
        }
        false
    }

    /// Find a dictionary chunk that splits into at most `n` chunks of `word_sz` words with no
    /// unusable remainder.  The remainder, if any, goes back to the lists.  Returns the prefix,
    /// a free chunk of a multiple of `word_sz` words, on no list.
    fn get_n_way_chunk_to_split(&self, word_sz: usize, mut n: usize) -> Option<Address> {
        let mut rem_fc = None;
        let fc;
        let rem;
        {
            let _x = self.par_dictionary_alloc_lock.lock().unwrap();
            let mut found = None;
            while n > 0 {
                found = self.dictionary.lock().get_chunk(
                    &self.heap,
                    (n * word_sz).max(SMALL_FOR_DICTIONARY),
                    Dither::AtLeast,
                );
                if found.is_some() {
                    break;
                }
                n -= 1;
            }
            fc = found?;
            let fc_size = self.heap.chunk_size(fc);
            n = n.min(fc_size / word_sz);
            let mut r = fc_size - n * word_sz;
            // Allocate one fewer rather than leave a fragment.
            if r > 0 && r < MIN_CHUNK_SIZE_IN_WORDS {
                n -= 1;
                r += word_sz;
            }
            if n == 0 {
                self.dictionary.lock().return_chunk(&self.heap, fc);
                return None;
            }
            self.dictionary
                .lock()
                .dict_census_update(fc_size, true, false);
            rem = r;
            if rem > 0 {
                let prefix_size = n * word_sz;
                let r_fc = fc.add_words(prefix_size);
                self.heap.write_free_chunk(r_fc, rem);
                self.bot.mark_block(r_fc..r_fc.add_words(rem));
                self.heap.write_free_chunk(fc, prefix_size);
                if rem >= INDEX_SET_SIZE {
                    let mut dict = self.dictionary.lock();
                    dict.return_chunk(&self.heap, r_fc);
                    dict.dict_census_update(rem, true, true);
                } else {
                    rem_fc = Some(r_fc);
                }
            }
        }
        if let Some(r_fc) = rem_fc {
            let mut list = self.indexed_free_list[rem].lock();
            list.return_chunk_at_head(&self.heap, r_fc);
            list.increment_split_births();
        }
        debug_assert_eq!(self.heap.chunk_size(fc), n * word_sz);
        Some(fc)
    }

    fn par_get_chunk_of_blocks_dictionary(
        &self,
        word_sz: usize,
        targeted_number_of_chunks: usize,
        fl: &mut AdaptiveFreeList,
    ) {
        let fc = match self.get_n_way_chunk_to_split(word_sz, targeted_number_of_chunks) {
            Some(fc) => fc,
            None => return,
        };
        let n = self.heap.chunk_size(fc) / word_sz;
        for i in (1..n).rev() {
            let ffc = fc.add_words(i * word_sz);
            self.heap.write_free_chunk(ffc, word_sz);
            self.bot.mark_block(ffc..ffc.add_words(word_sz));
            fl.return_chunk_at_head(&self.heap, ffc);
        }
        // The pieces above show their sizes before the first piece shrinks.
        self.heap.write_free_chunk(fc, word_sz);
        fl.return_chunk_at_head(&self.heap, fc);
        debug_assert_eq!(fl.count(), n);
        self.indexed_free_list[word_sz].lock().stats.split_births += n as isize;
    }

    /// See [`PromotionLabStats::compute_desired_plab_size`].
    pub fn compute_desired_plab_size(&self) {
        self.plab_stats.compute_desired_plab_size()
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{install_filler, new_space_with};
    use super::*;

    #[test]
    fn claims_batches_and_retires_leftovers() {
        let space = new_space_with(64 * WORDS_IN_CARD, |options| {
            options.old_plab_min = 8;
        });
        let g = space.lock();
        let free_before = space.free_words();
        let mut lab = PromotionLab::new(&space);
        let a = lab.alloc(10).unwrap();
        // Eight blocks were split off one dictionary chunk; one is in use.
        assert_eq!(lab.indexed_free_list[10].count(), 7);
        let b = lab.alloc(10).unwrap();
        assert_eq!(b, a.add_words(10));
        install_filler(&space, a, 10);
        install_filler(&space, b, 10);
        lab.retire();
        assert_eq!(space.indexed_free_list[10].lock().count(), 6);
        assert_eq!(space.free_words(), free_before - 20);
        space.verify_conservation(&g);
        space.verify_single_owner(&g);

        space.compute_desired_plab_size();
        // Two blocks used by one worker over four refills is below the minimum.
        assert_eq!(space.plab_stats.blocks_to_claim(10), 8);
    }

    #[test]
    fn splits_larger_indexed_chunks() {
        let space = new_space_with(64 * WORDS_IN_CARD, |options| {
            options.indexed_free_list_replenish = 1;
            options.old_plab_min = 4;
        });
        let g = space.lock();
        // Leave two 40 word chunks on the indexed lists.
        let x = space.allocate(&g, 40).unwrap();
        let y = space.allocate(&g, 40).unwrap();
        space.add_chunk_to_free_lists(x, 40);
        space.add_chunk_to_free_lists(y, 40);

        let mut lab = PromotionLab::new(&space);
        // No 20 word chunks: each 40 word chunk splits in two.
        let a = lab.alloc(20).unwrap();
        assert_eq!(lab.indexed_free_list[20].count(), 3);
        assert!(space.indexed_free_list[40].lock().is_empty());
        install_filler(&space, a, 20);
        lab.retire();
        space.verify_conservation(&g);
        space.verify_single_owner(&g);
    }

    #[test]
    fn large_blocks_come_from_the_dictionary() {
        let space = new_space_with(64 * WORDS_IN_CARD, |_| {});
        let g = space.lock();
        let mut lab = PromotionLab::new(&space);
        let a = lab.alloc(300).unwrap();
        assert_eq!(a, space.bottom());
        install_filler(&space, a, 300);
        lab.retire();
        space.verify_conservation(&g);
    }
}
