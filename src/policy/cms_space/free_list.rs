//! Intrusive free lists of same-sized chunks, with the census statistics the sweeper uses to
//! decide whether to coalesce.

use super::heap::HeapWords;
use crate::util::averages::AdaptivePaddedAverage;
use crate::util::Address;

/// Sweeps closer together than this (in seconds) are not used to update the demand estimate.
const SWEEP_TIMER_THRESHOLD_SECS: f64 = 0.01;

/// Per size class population statistics.  Counts are signed: a class can be asked to give up
/// more chunks than it currently has.
#[derive(Clone, Debug)]
pub struct AllocationStats {
    demand_rate_estimate: AdaptivePaddedAverage,
    /// The number of chunks this class should hold at the next sweep.
    pub desired: isize,
    /// The population above which the sweeper coalesces chunks of this size.
    pub coal_desired: isize,
    /// Chunks in excess of `desired`, which may be split to satisfy other sizes.
    pub surplus: isize,
    /// The surplus at the start of the last sweep.
    pub bfr_surp: isize,
    /// The population at the end of the previous sweep.
    pub prev_sweep: isize,
    /// The population at the start of the current sweep.
    pub before_sweep: isize,
    pub coal_births: isize,
    pub coal_deaths: isize,
    pub split_births: isize,
    pub split_deaths: isize,
}

impl AllocationStats {
    pub fn new(weight: u32, padding: u32) -> Self {
        AllocationStats {
            demand_rate_estimate: AdaptivePaddedAverage::new(weight, padding),
            desired: 0,
            coal_desired: 0,
            surplus: 0,
            bfr_surp: 0,
            prev_sweep: 0,
            before_sweep: 0,
            coal_births: 0,
            coal_deaths: 0,
            split_births: 0,
            split_deaths: 0,
        }
    }

    /// Recompute `desired` from the demand observed since the previous sweep.
    ///
    /// Demand is what the population would have been without allocation, minus what it is now:
    /// `prev_sweep - count + births - deaths`.  The rate is projected over the expected time to
    /// the next sweep.
    pub fn compute_desired(
        &mut self,
        count: usize,
        inter_sweep_current: f64,
        inter_sweep_estimate: f64,
        intra_sweep_estimate: f64,
        extrapolate: bool,
    ) {
        if inter_sweep_current > SWEEP_TIMER_THRESHOLD_SECS {
            let demand = self.prev_sweep - count as isize + self.split_births + self.coal_births
                - self.split_deaths
                - self.coal_deaths;
            let rate = demand as f64 / inter_sweep_current;
            self.demand_rate_estimate.sample(rate);
            let new_rate = self.demand_rate_estimate.padded_average();
            let delta_ise = if extrapolate { intra_sweep_estimate } else { 0.0 };
            self.desired = (new_rate * (inter_sweep_estimate + delta_ise)) as isize;
        }
    }

    pub fn demand_rate(&self) -> f64 {
        self.demand_rate_estimate.padded_average()
    }

    pub fn clear_census(&mut self, count: usize) {
        self.prev_sweep = count as isize;
        self.coal_births = 0;
        self.coal_deaths = 0;
        self.split_births = 0;
        self.split_deaths = 0;
    }
}

/// A doubly linked list of free chunks of one size.  The links live in the chunks themselves
/// (see [`HeapWords::chunk_next`]); the list only records the ends.
///
/// Every operation takes the heap explicitly.  The caller holds whatever lock protects this list.
#[derive(Debug)]
pub struct AdaptiveFreeList {
    size: usize,
    head: Address,
    tail: Address,
    count: usize,
    /// The next larger size class that had a surplus at the end of the last sweep, or
    /// `INDEX_SET_SIZE` (indexed lists) / 0 (dictionary) if there is none.
    pub hint: usize,
    pub stats: AllocationStats,
}

impl AdaptiveFreeList {
    pub fn new(size: usize, weight: u32, padding: u32) -> Self {
        AdaptiveFreeList {
            size,
            head: Address::ZERO,
            tail: Address::ZERO,
            count: 0,
            hint: 0,
            stats: AllocationStats::new(weight, padding),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn head(&self) -> Option<Address> {
        if self.head.is_zero() {
            None
        } else {
            Some(self.head)
        }
    }

    pub fn tail(&self) -> Option<Address> {
        if self.tail.is_zero() {
            None
        } else {
            Some(self.tail)
        }
    }

    fn check_chunk(&self, heap: &HeapWords, chunk: Address) {
        debug_assert_eq!(
            heap.chunk_size(chunk),
            self.size,
            "chunk {} does not belong in the {} word list",
            chunk,
            self.size
        );
    }

    /// Remove and return the first chunk.  The returned chunk's links are cleared.
    pub fn get_chunk_at_head(&mut self, heap: &HeapWords) -> Option<Address> {
        let chunk = self.head()?;
        self.remove_chunk(heap, chunk);
        Some(chunk)
    }

    /// Unlink `chunk`, which must be on this list.
    pub fn remove_chunk(&mut self, heap: &HeapWords, chunk: Address) {
        self.check_chunk(heap, chunk);
        debug_assert!(self.count > 0);
        let next = heap.chunk_next(chunk);
        let prev = heap.chunk_prev(chunk);
        if prev.is_zero() {
            debug_assert_eq!(self.head, chunk);
            self.head = next;
        } else {
            heap.set_chunk_next(prev, next);
        }
        if next.is_zero() {
            debug_assert_eq!(self.tail, chunk);
            self.tail = prev;
        } else {
            heap.set_chunk_prev(next, prev);
        }
        heap.set_chunk_next(chunk, Address::ZERO);
        heap.set_chunk_prev(chunk, Address::ZERO);
        self.count -= 1;
    }

    pub fn return_chunk_at_head(&mut self, heap: &HeapWords, chunk: Address) {
        self.check_chunk(heap, chunk);
        heap.set_chunk_prev(chunk, Address::ZERO);
        heap.set_chunk_next(chunk, self.head);
        if self.head.is_zero() {
            self.tail = chunk;
        } else {
            heap.set_chunk_prev(self.head, chunk);
        }
        self.head = chunk;
        self.count += 1;
    }

    pub fn return_chunk_at_tail(&mut self, heap: &HeapWords, chunk: Address) {
        self.check_chunk(heap, chunk);
        heap.set_chunk_next(chunk, Address::ZERO);
        heap.set_chunk_prev(chunk, self.tail);
        if self.tail.is_zero() {
            self.head = chunk;
        } else {
            heap.set_chunk_next(self.tail, chunk);
        }
        self.tail = chunk;
        self.count += 1;
    }

    /// Move every chunk of `other` to the front of this list, leaving `other` empty.
    pub fn prepend(&mut self, heap: &HeapWords, other: &mut AdaptiveFreeList) {
        debug_assert_eq!(self.size, other.size);
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            self.head = other.head;
            self.tail = other.tail;
        } else {
            heap.set_chunk_next(other.tail, self.head);
            heap.set_chunk_prev(self.head, other.tail);
            self.head = other.head;
        }
        self.count += other.count;
        other.head = Address::ZERO;
        other.tail = Address::ZERO;
        other.count = 0;
    }

    /// Move the first `n` chunks (or all of them, if there are fewer) to `out`.
    pub fn get_first_n_chunks_from_list(
        &mut self,
        heap: &HeapWords,
        n: usize,
        out: &mut AdaptiveFreeList,
    ) {
        debug_assert!(out.is_empty());
        if self.count == 0 {
            return;
        }
        let k = n.min(self.count);
        let first = self.head;
        let mut last = first;
        for _ in 1..k {
            last = heap.chunk_next(last);
        }
        let rest = heap.chunk_next(last);
        heap.set_chunk_next(last, Address::ZERO);
        self.head = rest;
        if rest.is_zero() {
            self.tail = Address::ZERO;
        } else {
            heap.set_chunk_prev(rest, Address::ZERO);
        }
        self.count -= k;
        out.head = first;
        out.tail = last;
        out.count = k;
    }

    /// Iterate over the chunks on this list.
    pub fn iter<'a>(&'a self, heap: &'a HeapWords) -> impl Iterator<Item = Address> + 'a {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            if cur.is_zero() {
                None
            } else {
                let c = cur;
                cur = heap.chunk_next(c);
                Some(c)
            }
        })
    }

    /// Walk the list, checking links, sizes and the count.  Panics on an inconsistency.
    pub fn verify(&self, heap: &HeapWords) {
        let mut prev = Address::ZERO;
        let mut n = 0;
        for chunk in self.iter(heap) {
            assert_eq!(
                heap.chunk_size(chunk),
                self.size,
                "chunk {} on the {} word list has the wrong size",
                chunk,
                self.size
            );
            assert_eq!(heap.chunk_prev(chunk), prev, "broken back link at {}", chunk);
            prev = chunk;
            n += 1;
            assert!(n <= self.count, "cycle in the {} word list", self.size);
        }
        assert_eq!(n, self.count, "count mismatch in the {} word list", self.size);
        assert_eq!(prev, self.tail, "tail mismatch in the {} word list", self.size);
    }

    pub fn increment_coal_births(&mut self) {
        self.stats.coal_births += 1;
    }

    pub fn increment_coal_deaths(&mut self) {
        self.stats.coal_deaths += 1;
    }

    pub fn increment_split_births(&mut self) {
        self.stats.split_births += 1;
    }

    pub fn increment_split_deaths(&mut self) {
        self.stats.split_deaths += 1;
    }

    /// Whether the sweeper should coalesce chunks of this size rather than keep them.
    pub fn coal_over_populated(&self) -> bool {
        self.stats.coal_desired < 0 || self.count as isize > self.stats.coal_desired
    }

    pub fn begin_sweep_census(
        &mut self,
        coal_surplus_percent: f64,
        inter_sweep_current: f64,
        inter_sweep_estimate: f64,
        intra_sweep_estimate: f64,
        extrapolate: bool,
    ) {
        let count = self.count;
        let stats = &mut self.stats;
        stats.compute_desired(
            count,
            inter_sweep_current,
            inter_sweep_estimate,
            intra_sweep_estimate,
            extrapolate,
        );
        stats.coal_desired = (stats.desired as f64 * coal_surplus_percent) as isize;
        stats.before_sweep = count as isize;
        stats.bfr_surp = stats.surplus;
    }

    pub fn set_surplus(&mut self, split_surplus_percent: f64) {
        self.stats.surplus =
            self.count as isize - (self.stats.desired as f64 * split_surplus_percent) as isize;
    }

    pub fn clear_census(&mut self) {
        let count = self.count;
        self.stats.clear_census(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(n: usize, size: usize) -> (HeapWords, Vec<Address>) {
        let heap = HeapWords::new(Address::from_usize(0x8000), 8 * 1024);
        let chunks: Vec<Address> = (0..n)
            .map(|i| heap.start().add_words(i * size))
            .collect();
        for c in &chunks {
            heap.write_free_chunk(*c, size);
        }
        (heap, chunks)
    }

    #[test]
    fn push_pop_remove() {
        let (heap, chunks) = setup(4, 8);
        let mut list = AdaptiveFreeList::new(8, 75, 1);
        list.return_chunk_at_tail(&heap, chunks[0]);
        list.return_chunk_at_tail(&heap, chunks[1]);
        list.return_chunk_at_head(&heap, chunks[2]);
        list.return_chunk_at_tail(&heap, chunks[3]);
        list.verify(&heap);
        assert_eq!(
            list.iter(&heap).collect::<Vec<_>>(),
            vec![chunks[2], chunks[0], chunks[1], chunks[3]]
        );
        list.remove_chunk(&heap, chunks[1]);
        list.remove_chunk(&heap, chunks[3]);
        list.verify(&heap);
        assert_eq!(list.tail(), Some(chunks[0]));
        assert_eq!(list.get_chunk_at_head(&heap), Some(chunks[2]));
        assert_eq!(list.get_chunk_at_head(&heap), Some(chunks[0]));
        assert_eq!(list.get_chunk_at_head(&heap), None);
        assert!(list.is_empty());
    }

    #[test]
    fn take_first_n_and_prepend() {
        let (heap, chunks) = setup(5, 8);
        let mut list = AdaptiveFreeList::new(8, 75, 1);
        for c in &chunks {
            list.return_chunk_at_tail(&heap, *c);
        }
        let mut local = AdaptiveFreeList::new(8, 75, 1);
        list.get_first_n_chunks_from_list(&heap, 3, &mut local);
        assert_eq!(local.count(), 3);
        assert_eq!(list.count(), 2);
        local.verify(&heap);
        list.verify(&heap);
        assert_eq!(list.head(), Some(chunks[3]));

        list.prepend(&heap, &mut local);
        assert!(local.is_empty());
        list.verify(&heap);
        assert_eq!(list.iter(&heap).collect::<Vec<_>>(), chunks);
    }

    #[test]
    fn desired_follows_demand() {
        let mut stats = AllocationStats::new(100, 0);
        stats.prev_sweep = 10;
        stats.split_births = 4;
        // 10 - 2 + 4 = 12 chunks consumed over one second.
        stats.compute_desired(2, 1.0, 2.0, 0.5, false);
        assert_eq!(stats.desired, 24);
        stats.compute_desired(2, 1.0, 2.0, 0.5, true);
        assert_eq!(stats.desired, 30);
        // Too short an interval leaves the estimate alone.
        stats.compute_desired(100, 0.001, 2.0, 0.5, false);
        assert_eq!(stats.desired, 30);
    }

    #[test]
    fn over_population() {
        let (heap, chunks) = setup(3, 8);
        let mut list = AdaptiveFreeList::new(8, 75, 1);
        // No demand recorded: every chunk is surplus.
        assert!(!list.coal_over_populated());
        list.return_chunk_at_tail(&heap, chunks[0]);
        assert!(list.coal_over_populated());
        list.stats.coal_desired = 2;
        list.return_chunk_at_tail(&heap, chunks[1]);
        assert!(!list.coal_over_populated());
        list.return_chunk_at_tail(&heap, chunks[2]);
        assert!(list.coal_over_populated());
    }
}
