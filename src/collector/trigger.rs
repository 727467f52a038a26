use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{CMSCollector, ExpansionCause, GcCause};
use crate::util::log;
use crate::vm::VMBinding;

/// A cycle is started this much earlier than the statistics say it must.
const CYCLE_TIME_SAFETY_FACTOR: f64 = 1.2;

impl<VM: VMBinding> CMSCollector<VM> {
    /// Decide whether the background thread should start a cycle now, and why.
    pub fn should_concurrent_collect(&self) -> Option<GcCause> {
        if self.full_gc_requested() {
            return Some(GcCause::UserRequested);
        }

        let free = self.space.free();
        if !self.options.use_initiating_occupancy_only {
            let stats = self.stats.lock().unwrap();
            let rate = stats.promotion_rate();
            if let Some(cycle_secs) = stats.cycle_time_secs() {
                if rate > 0.0 {
                    let secs_to_full = free as f64 / rate;
                    if secs_to_full < cycle_secs * CYCLE_TIME_SAFETY_FACTOR {
                        log::debug!(
                            "Old generation full in {:.3}s at {:.0} bytes/s, a cycle takes {:.3}s",
                            secs_to_full,
                            rate,
                            cycle_secs
                        );
                        return Some(GcCause::Statistics);
                    }
                }
            }
        }

        let occupancy = self.space.occupancy();
        if occupancy > self.options.initiating_occupancy() {
            log::debug!(
                "Old generation occupancy {:.3} above {:.3}",
                occupancy,
                self.options.initiating_occupancy()
            );
            return Some(GcCause::Occupancy);
        }

        // One expansion to satisfy an allocation starts one cycle.
        if self
            .last_expansion_cause
            .compare_exchange(
                ExpansionCause::SatisfyAllocation,
                ExpansionCause::NoExpansion,
                Ordering::Relaxed,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            return Some(GcCause::Expansion);
        }

        if self.options.trigger_interval >= 0 {
            let interval = Duration::from_millis(self.options.trigger_interval as u64);
            let since = self.stats.lock().unwrap().since_last_cycle();
            // Before the first cycle, the interval counts from startup.
            let elapsed = since.unwrap_or_else(|| self.started_at.elapsed());
            if elapsed >= interval {
                return Some(GcCause::Interval);
            }
        }
        None
    }
}
