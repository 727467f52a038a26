use std::collections::HashSet;

use super::{BlockHeader, FreeListGuard, FreeListSpace};
use crate::util::constants::*;
use crate::util::log;

impl FreeListSpace {
    /// Check every free list and the dictionary: links, sizes, counts, and the headers of the
    /// linear allocation blocks.
    pub fn verify_free_lists(&self, _g: &FreeListGuard) {
        for size in INDEX_SET_START..INDEX_SET_SIZE {
            let list = self.indexed_free_list[size].lock();
            assert_eq!(list.size(), size, "indexed list {} has size {}", size, list.size());
            list.verify(&self.heap);
            assert!(
                list.hint > size || list.hint == INDEX_SET_SIZE,
                "hint of the {} word list points down to {}",
                size,
                list.hint
            );
        }
        self.dictionary.lock().verify(&self.heap);
        for lab in [&self.small_lab, &self.large_lab] {
            let blk = lab.lock();
            if !blk.is_empty() {
                assert_eq!(
                    self.heap.header(blk.ptr),
                    BlockHeader::Lab {
                        size: blk.word_size
                    },
                    "LAB at {} is not parsable",
                    blk.ptr
                );
            }
        }
    }

    /// Walk the whole space: the blocks tile it exactly, every block is reachable through the
    /// block offset table, and free blocks add up to [`FreeListSpace::free_words`].
    pub fn verify_conservation(&self, _g: &FreeListGuard) {
        let mut total = 0;
        let mut free = 0;
        let mut last_end = self.bottom();
        self.for_each_block(|block, header, size| {
            assert_eq!(block, last_end, "gap or overlap before {}", block);
            assert!(size >= MIN_CHUNK_SIZE_IN_WORDS, "block {} is too small", block);
            let end = block.add_words(size);
            self.bot.verify_single_block(block..end);
            if matches!(header, BlockHeader::Free { .. } | BlockHeader::Lab { .. }) {
                free += size;
            }
            total += size;
            last_end = end;
        });
        assert_eq!(last_end, self.end(), "blocks do not reach the end of the space");
        assert_eq!(total, self.capacity_in_words());
        assert_eq!(free, self.free_words(), "free blocks do not match the free lists");
    }

    /// Every free chunk is on exactly one list, every free block found in the walk is on a
    /// list, and no LAB is on a list.
    pub fn verify_single_owner(&self, _g: &FreeListGuard) {
        let mut owned = HashSet::new();
        for size in INDEX_SET_START..INDEX_SET_SIZE {
            let list = self.indexed_free_list[size].lock();
            for chunk in list.iter(&self.heap) {
                assert!(owned.insert(chunk), "{} is on two lists", chunk);
            }
        }
        self.dictionary.lock().for_each_chunk(&self.heap, |chunk, _| {
            assert!(owned.insert(chunk), "{} is on two lists", chunk);
        });

        let mut seen = 0;
        self.for_each_block(|block, header, _| match header {
            BlockHeader::Free { .. } => {
                assert!(owned.contains(&block), "free chunk {} is on no list", block);
                seen += 1;
            }
            BlockHeader::Lab { .. } => {
                assert!(!owned.contains(&block), "LAB {} is on a free list", block);
            }
            _ => {}
        });
        assert_eq!(seen, owned.len(), "a listed chunk is not a block of the space");
        log::trace!("{} free chunks verified", seen);
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::super::sweep::CoalescePolicy;
    use super::super::tests::{install_filler, new_space};
    use super::*;
    use crate::util::conversions::adjust_object_size;
    use crate::util::Address;

    #[test]
    fn random_allocation_and_sweeping_conserve_space() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        let space = new_space(64 * WORDS_IN_CARD);
        let bits = space.mark_bits();
        let g = space.lock();
        let mut live: Vec<(Address, usize)> = vec![];

        for policy in 0..=4 {
            for _ in 0..60 {
                let size = adjust_object_size(rng.random_range(4..300));
                match space.allocate(&g, size) {
                    Some(block) => {
                        install_filler(&space, block, size);
                        live.push((block, size));
                    }
                    None => break,
                }
            }
            space.verify_conservation(&g);
            space.verify_single_owner(&g);

            live.retain(|_| rng.random_bool(0.5));
            for (block, _) in &live {
                bits.mark(*block);
            }
            space.sweep(&g, bits, CoalescePolicy::from_option(policy));
            bits.clear_all();

            let live_words: usize = live.iter().map(|(_, size)| size).sum();
            assert_eq!(space.free_words(), space.capacity_in_words() - live_words);
            for (block, _) in &live {
                assert!(space.block_is_obj(*block));
            }
            space.verify_free_lists(&g);
            space.verify_conservation(&g);
            space.verify_single_owner(&g);
        }
    }

    #[test]
    #[should_panic(expected = "is on no list")]
    fn detects_a_lost_chunk() {
        let space = new_space(16 * WORDS_IN_CARD);
        let g = space.lock();
        let a = space.allocate(&g, 40).unwrap();
        // A free header on a block no list knows about.
        space.heap().write_free_chunk(a, 40);
        space.verify_single_owner(&g);
    }
}
