use super::{CMSCollector, ExpansionCause};
use crate::policy::cms_space::FreeListGuard;
use crate::util::conversions::bytes_to_formatted_string;
use crate::util::log;
use crate::vm::VMBinding;

impl<VM: VMBinding> CMSCollector<VM> {
    /// Grow or shrink the generation so the free fraction is between `min_heap_free_ratio` and
    /// `max_heap_free_ratio`.  The generation never shrinks below its initial size.
    pub(super) fn compute_new_size(&self, g: &FreeListGuard) {
        let capacity = self.space.capacity();
        let used = self.space.used();
        let min_free = self.options.min_heap_free_ratio as f64 / 100.0;
        let max_free = self.options.max_heap_free_ratio as f64 / 100.0;

        let min_capacity = (used as f64 / (1.0 - min_free)) as usize;
        if capacity < min_capacity {
            let expand_bytes = min_capacity - capacity;
            if self.expand_for_gc_cause(g, expand_bytes, 0, ExpansionCause::SatisfyFreeRatio) {
                log::info!(
                    "Expanded the old generation by {} to {} (used {})",
                    bytes_to_formatted_string(expand_bytes),
                    bytes_to_formatted_string(self.space.capacity()),
                    bytes_to_formatted_string(used)
                );
            }
            return;
        }

        if max_free >= 1.0 {
            return;
        }
        let max_capacity =
            ((used as f64 / (1.0 - max_free)) as usize).max(self.options.initial_heap_size);
        if capacity > max_capacity {
            let released = self.space.shrink_by(g, capacity - max_capacity);
            if released > 0 {
                log::info!(
                    "Shrunk the old generation by {} to {} (used {})",
                    bytes_to_formatted_string(released),
                    bytes_to_formatted_string(self.space.capacity()),
                    bytes_to_formatted_string(used)
                );
            }
        }
    }
}
