//! The overflow list: grey objects that did not fit on a mark stack or work queue.
//!
//! The list is threaded through a side table with one link per four heap words (objects are at
//! least four words long, so two objects never share a link).  Object headers are never
//! touched, so nothing has to be saved while an object is on the list or restored after.
//!
//! The head is updated with compare-and-swap.  A taker installs [`BUSY`] while it cuts a prefix
//! off the list, and pushers spin until the remainder is put back.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crossbeam::utils::Backoff;

use crate::util::log;
use crate::util::{Address, ObjectReference};

const BUSY: usize = usize::MAX;
const LOG_WORDS_PER_LINK: usize = 2;

pub struct OverflowList {
    start: Address,
    head: AtomicUsize,
    /// `links[i]` holds the word offset plus one of the object after the object whose word
    /// offset divided by four is `i`.  Zero ends the list.
    links: Box<[AtomicU32]>,
    /// Pushes since the last reset.
    pushed: AtomicUsize,
}

impl OverflowList {
    /// A list for objects in the `words` words starting at `start`.
    pub fn new(start: Address, words: usize) -> Self {
        assert!(
            words < u32::MAX as usize,
            "the overflow list cannot link {} words",
            words
        );
        let n = (words >> LOG_WORDS_PER_LINK) + 1;
        OverflowList {
            start,
            head: AtomicUsize::new(0),
            links: (0..n)
                .map(|_| AtomicU32::new(0))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            pushed: AtomicUsize::new(0),
        }
    }

    fn link(&self, object: Address) -> &AtomicU32 {
        &self.links[object.words_from(self.start) >> LOG_WORDS_PER_LINK]
    }

    fn encode(&self, object: usize) -> u32 {
        if object == 0 {
            0
        } else {
            (Address::from_usize(object).words_from(self.start) + 1) as u32
        }
    }

    fn decode(&self, link: u32) -> usize {
        if link == 0 {
            0
        } else {
            self.start.add_words(link as usize - 1).as_usize()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == 0
    }

    /// Objects pushed since the last [`OverflowList::reset_stats`].
    pub fn pushed(&self) -> usize {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.pushed.store(0, Ordering::Relaxed);
    }

    /// Push `object`.  Safe to call from several threads at once.
    pub fn par_push(&self, object: ObjectReference) {
        let addr = object.to_raw_address();
        let link = self.link(addr);
        let backoff = Backoff::new();
        let mut cur = self.head.load(Ordering::Relaxed);
        loop {
            if cur == BUSY {
                if backoff.is_completed() {
                    std::thread::yield_now();
                } else {
                    backoff.snooze();
                }
                cur = self.head.load(Ordering::Relaxed);
                continue;
            }
            link.store(self.encode(cur), Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                cur,
                addr.as_usize(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take up to `n` objects off the front of the list, passing each to `f`.  Returns the number
    /// taken.  Safe to call from several threads at once.
    pub fn par_take<F: FnMut(ObjectReference)>(&self, n: usize, mut f: F) -> usize {
        debug_assert!(n > 0);
        let backoff = Backoff::new();
        let head = loop {
            let cur = self.head.load(Ordering::Relaxed);
            if cur == 0 {
                return 0;
            }
            if cur == BUSY {
                backoff.snooze();
                if backoff.is_completed() {
                    // Another taker holds the list.  Let the caller try something else.
                    return 0;
                }
                continue;
            }
            if self
                .head
                .compare_exchange_weak(cur, BUSY, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break cur;
            }
        };

        // Find the last object of the prefix, then put the rest back.
        let mut last = head;
        let mut count = 1;
        while count < n {
            let next = self.decode(self.link(Address::from_usize(last)).load(Ordering::Relaxed));
            if next == 0 {
                break;
            }
            last = next;
            count += 1;
        }
        let last_link = self.link(Address::from_usize(last));
        let rest = self.decode(last_link.load(Ordering::Relaxed));
        last_link.store(0, Ordering::Relaxed);
        self.head.store(rest, Ordering::Release);

        let mut cur = head;
        while cur != 0 {
            let link = self.link(Address::from_usize(cur));
            let next = self.decode(link.swap(0, Ordering::Relaxed));
            f(ObjectReference::from_raw_address(Address::from_usize(cur)));
            cur = next;
        }
        count
    }

    /// Take every object.  Only used when no other thread uses the list.
    pub fn drain_all<F: FnMut(ObjectReference)>(&self, f: F) -> usize {
        self.par_take(usize::MAX, f)
    }

    /// Drop every object, clearing their links.
    pub fn clear(&self) {
        let dropped = self.drain_all(|_| {});
        if dropped > 0 {
            log::debug!("Discarded {} objects from the overflow list", dropped);
        }
    }

    /// Check that the list is empty and every link has been cleared.
    pub fn assert_drained(&self) {
        assert!(self.is_empty(), "the overflow list is not empty");
        #[cfg(feature = "extreme_assertions")]
        assert!(
            self.links.iter().all(|l| l.load(Ordering::Relaxed) == 0),
            "a stale overflow link is left behind"
        );
    }
}
