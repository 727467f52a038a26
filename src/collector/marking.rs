//! Concurrent marking.
//!
//! The marker walks the mark bit map upwards with a *finger*.  Each marked object it reaches
//! is scanned, and so is everything newly marked from it that lies below the finger.  Objects
//! newly marked above the finger are left for the bit map walk to find.  When the mark stack
//! overflows, its contents are dropped and the walk is restarted from the lowest dropped
//! object once the current pass is over.

use std::time::Instant;

use super::mark_stack::MarkStack;
use super::{CMSCollector, CollectorState, PhaseResult, Preempted, TokenGuard};
use crate::util::log;
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// The serial marker checks for a yield request after scanning this many objects.
const OBJECTS_PER_YIELD_CHECK: usize = 64;

impl<VM: VMBinding> CMSCollector<VM> {
    pub(super) fn mark_from_roots(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        debug_assert_eq!(self.state(), CollectorState::Marking);
        let start = Instant::now();
        if self.options.concurrent_mt && self.conc_workers.total_workers() > 1 {
            self.do_marking_mt(token, epoch)?;
        } else {
            self.do_marking_st(token, epoch)?;
        }
        log::debug!("Concurrent mark: {:?}", start.elapsed());
        self.set_state(CollectorState::Precleaning);
        Ok(())
    }

    fn do_marking_st(&self, token: &mut TokenGuard, epoch: usize) -> PhaseResult {
        let mut restart = Some(self.space.bottom());
        while let Some(from) = restart {
            restart = self.mark_pass(token, epoch, from)?;
            if let Some(addr) = restart {
                log::debug!("Mark stack overflow, restarting marking from {}", addr);
                self.stats.lock().unwrap().mark_stack_overflows += 1;
            }
        }
        Ok(())
    }

    /// One walk of the bit map from `from`.  Returns where to restart if the mark stack
    /// overflowed.
    fn mark_pass(
        &self,
        token: &mut TokenGuard,
        epoch: usize,
        from: Address,
    ) -> Result<Option<Address>, Preempted> {
        let mut restart: Option<Address> = None;
        let mut finger = from;
        let mut scanned = 0;
        loop {
            let end = self.space.end();
            let addr = self.mark_bits.get_next_marked_word_address(finger, end);
            if addr >= end {
                break;
            }
            if let Some(size) = self.size_of_block_allocated_while_marking(addr) {
                finger = addr.add_words(size);
                continue;
            }
            finger = addr.add_words(self.space.block_size(addr));

            let mut stack = self.mark_stack.lock().unwrap();
            let object = ObjectReference::from_raw_address(addr);
            self.scan_below_finger(&mut stack, object, finger, &mut restart);
            loop {
                while let Some(object) = stack.pop() {
                    self.scan_below_finger(&mut stack, object, finger, &mut restart);
                    scanned += 1;
                    if scanned % OBJECTS_PER_YIELD_CHECK == 0 && self.should_yield() {
                        break;
                    }
                }
                if stack.is_empty() {
                    break;
                }
                // The grey objects stay on the stack while we are away.
                drop(stack);
                self.do_yield(token, epoch)?;
                stack = self.mark_stack.lock().unwrap();
            }
            drop(stack);

            scanned += 1;
            if scanned % OBJECTS_PER_YIELD_CHECK == 0 && self.should_yield() {
                self.do_yield(token, epoch)?;
            }
        }
        Ok(restart)
    }

    /// Scan `object`, marking its children.  Children below `finger` are pushed.  If the stack
    /// is full, the stack is emptied, the lowest dropped object is recorded in `restart` and
    /// the stack is expanded for the next pass.
    fn scan_below_finger(
        &self,
        stack: &mut MarkStack,
        object: ObjectReference,
        finger: Address,
        restart: &mut Option<Address>,
    ) {
        self.scan_object(object, |child| {
            if !self.mark_if_unmarked(child) || child.to_raw_address() >= finger {
                return;
            }
            if !stack.push(child) {
                let least = stack
                    .take_least_and_clear()
                    .map_or(child, |least| least.min(child))
                    .to_raw_address();
                *restart = Some(restart.map_or(least, |r| r.min(least)));
                stack.expand();
            }
        });
    }
}
