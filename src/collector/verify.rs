//! Checking the marks after the final remark.

use std::collections::HashSet;

use itertools::Itertools;

use super::CMSCollector;
use crate::policy::cms_space::FreeListGuard;
use crate::util::log;
use crate::util::ObjectReference;
use crate::vm::VMBinding;

impl<VM: VMBinding> CMSCollector<VM> {
    /// Trace the heap again from the roots, without touching the mark bit map, and check that
    /// every reachable old generation object is marked.  Panics otherwise.  Called with the
    /// mutators stopped.
    pub(super) fn verify_after_remark(&self, _g: &FreeListGuard) {
        let mut visited = HashSet::new();
        let mut pending: Vec<ObjectReference> = self.collect_roots();
        let mut unmarked = vec![];
        while let Some(object) = pending.pop() {
            if !visited.insert(object) {
                continue;
            }
            if !self.mark_bits.is_marked(object.to_raw_address()) {
                unmarked.push(object);
            }
            self.scan_object(object, |child| {
                if self.is_in_old_gen(child) && !visited.contains(&child) {
                    pending.push(child);
                }
            });
        }
        if !unmarked.is_empty() {
            unmarked.sort();
            log::error!(
                "Reachable objects not marked after remark: {}",
                unmarked.iter().take(16).join(", ")
            );
            panic!(
                "{} reachable objects are not marked after remark, the first is {}",
                unmarked.len(),
                unmarked[0]
            );
        }
        log::debug!("Verified {} reachable objects after remark", visited.len());
    }
}
