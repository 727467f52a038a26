//! The free list census taken around every sweep.
//!
//! At the start of a sweep each size class works out how many chunks it should hold from the
//! demand seen since the previous sweep.  The sweeper then coalesces chunks of over-populated
//! sizes.  At the end of the sweep the surplus of every size is recorded, and the hints that
//! lead allocation to larger sizes with a surplus are reset.

use std::sync::atomic::Ordering;
use std::time::Instant;

use super::{FreeListGuard, FreeListSpace};
use crate::util::averages::AdaptivePaddedAverage;
use crate::util::constants::*;
use crate::util::log;
use crate::util::Address;

/// Wall clock time between and during sweeps.
pub struct SweepTimers {
    inter_sweep_start: Instant,
    intra_sweep_start: Option<Instant>,
    /// The length of the last gap between sweeps, in seconds.
    inter_sweep_current: f64,
    inter_sweep_estimate: AdaptivePaddedAverage,
    intra_sweep_estimate: AdaptivePaddedAverage,
    sweep_count: usize,
}

impl SweepTimers {
    pub fn new(weight: u32) -> Self {
        SweepTimers {
            inter_sweep_start: Instant::now(),
            intra_sweep_start: None,
            inter_sweep_current: 0.0,
            inter_sweep_estimate: AdaptivePaddedAverage::new(weight, 1),
            intra_sweep_estimate: AdaptivePaddedAverage::new(weight, 1),
            sweep_count: 0,
        }
    }

    fn start_sweep(&mut self) {
        debug_assert!(self.intra_sweep_start.is_none(), "sweep already running");
        self.inter_sweep_current = self.inter_sweep_start.elapsed().as_secs_f64();
        self.inter_sweep_estimate.sample(self.inter_sweep_current);
        self.intra_sweep_start = Some(Instant::now());
    }

    fn end_sweep(&mut self) {
        if let Some(start) = self.intra_sweep_start.take() {
            self.intra_sweep_estimate
                .sample(start.elapsed().as_secs_f64());
        }
        self.inter_sweep_start = Instant::now();
        self.sweep_count += 1;
    }

    pub fn sweep_count(&self) -> usize {
        self.sweep_count
    }

    /// Padded estimate of the time between sweeps, in seconds.
    pub fn inter_sweep_estimate(&self) -> f64 {
        self.inter_sweep_estimate.padded_average()
    }

    /// Padded estimate of the duration of a sweep, in seconds.
    pub fn intra_sweep_estimate(&self) -> f64 {
        self.intra_sweep_estimate.padded_average()
    }
}

impl FreeListSpace {
    /// Prepare for a sweep: retire the linear allocation blocks, take the census and choose the
    /// address above which the sweeper always coalesces.
    pub fn begin_sweep(&self, g: &FreeListGuard) {
        let (current, inter_estimate, intra_estimate) = {
            let mut timers = self.sweep_timers.lock().unwrap();
            timers.start_sweep();
            (
                timers.inter_sweep_current,
                timers.inter_sweep_estimate(),
                timers.intra_sweep_estimate(),
            )
        };
        self.retire_linear_alloc_blocks(g);
        self.begin_sweep_fl_census(current, inter_estimate, intra_estimate);
        self.set_near_largest_chunk();
    }

    /// Finish a sweep: refill the linear allocation blocks and close the census.
    pub fn end_sweep(&self, g: &FreeListGuard) {
        self.refill_linear_alloc_blocks_if_needed(g);
        self.end_sweep_fl_census();
        let mut timers = self.sweep_timers.lock().unwrap();
        timers.end_sweep();
        log::debug!(
            "Sweep {} done: {} words free, estimates inter {:.3}s intra {:.3}s",
            timers.sweep_count(),
            self.free_words(),
            timers.inter_sweep_estimate(),
            timers.intra_sweep_estimate()
        );
    }

    fn begin_sweep_fl_census(
        &self,
        inter_sweep_current: f64,
        inter_sweep_estimate: f64,
        intra_sweep_estimate: f64,
    ) {
        let extrapolate = self.options.extrapolate_sweep;
        for size in (INDEX_SET_START..INDEX_SET_SIZE).step_by(INDEX_SET_STRIDE) {
            self.indexed_free_list[size].lock().begin_sweep_census(
                self.options.small_coal_surplus_percent,
                inter_sweep_current,
                inter_sweep_estimate,
                intra_sweep_estimate,
                extrapolate,
            );
        }
        self.dictionary.lock().begin_sweep_dict_census(
            self.options.large_coal_surplus_percent,
            inter_sweep_current,
            inter_sweep_estimate,
            intra_sweep_estimate,
            extrapolate,
        );
    }

    fn end_sweep_fl_census(&self) {
        let split_surplus_percent = self.options.small_split_surplus_percent;
        for size in (INDEX_SET_START..INDEX_SET_SIZE).step_by(INDEX_SET_STRIDE) {
            self.indexed_free_list[size]
                .lock()
                .set_surplus(split_surplus_percent);
        }
        self.set_fl_hints();
        for size in (INDEX_SET_START..INDEX_SET_SIZE).step_by(INDEX_SET_STRIDE) {
            self.indexed_free_list[size].lock().clear_census();
        }
        self.dictionary
            .lock()
            .end_sweep_dict_census(self.options.large_split_surplus_percent);
    }

    /// Point every indexed list at the next larger size with a surplus.
    fn set_fl_hints(&self) {
        let mut h = INDEX_SET_SIZE;
        for size in (INDEX_SET_START..INDEX_SET_SIZE).rev() {
            let mut list = self.indexed_free_list[size].lock();
            list.hint = h;
            if list.stats.surplus > 0 {
                h = size;
            }
        }
    }

    /// Free blocks at or above the returned address are coalesced whatever the census says, so
    /// that the largest chunk keeps growing.
    fn set_near_largest_chunk(&self) {
        let bottom = self.bottom();
        let largest = self
            .dictionary
            .lock()
            .find_largest_dict()
            .unwrap_or_else(|| self.end());
        let largest_offset = largest.words_from(bottom);
        let near_offset = ((largest_offset as f64 * self.options.largest_block_coalesce_proximity)
            as usize)
            .saturating_sub(MIN_CHUNK_SIZE_IN_WORDS);
        self.near_largest_chunk
            .store(bottom.add_words(near_offset).as_usize(), Ordering::Relaxed);
    }

    pub fn near_largest_chunk(&self) -> Address {
        Address::from_usize(self.near_largest_chunk.load(Ordering::Relaxed))
    }

    pub fn is_near_largest_chunk(&self, addr: Address) -> bool {
        addr >= self.near_largest_chunk()
    }

    /// The number of completed sweeps.
    pub fn sweep_count(&self) -> usize {
        self.sweep_timers.lock().unwrap().sweep_count()
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::new_space;
    use super::*;

    #[test]
    fn untouched_lists_have_a_surplus() {
        let space = new_space(64 * WORDS_IN_CARD);
        let g = space.lock();
        let chunk = space.allocate(&g, 24).unwrap();
        space.add_chunk_to_free_lists(chunk, 24);
        space.begin_sweep(&g);
        space.end_sweep(&g);
        assert_eq!(space.sweep_count(), 1);
        // Replenishing the 24 word list left spare 24 and 96 word chunks.  Nothing was asked of
        // either since, so both have a surplus and smaller sizes are sent their way.
        assert_eq!(space.indexed_free_list[24].lock().count(), 4);
        assert!(space.indexed_free_list[24].lock().stats.surplus > 0);
        assert!(space.indexed_free_list[96].lock().stats.surplus > 0);
        assert_eq!(space.indexed_free_list[20].lock().hint, 24);
        assert_eq!(space.indexed_free_list[24].lock().hint, 96);
        assert_eq!(space.indexed_free_list[96].lock().hint, INDEX_SET_SIZE);
        space.verify_free_lists(&g);
    }

    #[test]
    fn near_largest_chunk_tracks_the_dictionary() {
        let space = new_space(64 * WORDS_IN_CARD);
        let g = space.lock();
        space.begin_sweep(&g);
        // The only chunk starts at the bottom.
        assert_eq!(space.near_largest_chunk(), space.bottom());
        assert!(space.is_near_largest_chunk(space.bottom().add_words(100)));
        space.end_sweep(&g);
    }
}
