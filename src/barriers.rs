//! Write barriers for stores into the old generation.

use crate::collector::CMSCollector;
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// Where a reference was stored.
pub enum WriteTarget {
    /// A reference field of an object.  The barrier dirties the card of the object start.
    Object(ObjectReference),
    /// The slot itself.
    Slot(Address),
}

pub trait Barrier: Send + Sync {
    /// Called after a reference store.  `target` is what was written to; stores outside the
    /// old generation are ignored.
    fn post_write_barrier(&self, target: WriteTarget);
}

pub struct NoBarrier;

impl Barrier for NoBarrier {
    fn post_write_barrier(&self, _target: WriteTarget) {}
}

/// Dirties the card of every store into the old generation.  The young generation scans the
/// dirty cards for old-to-young references, and a concurrent cycle rescans them for references
/// the marker may have missed.
pub struct CardMarkingBarrier<'a, VM: VMBinding> {
    collector: &'a CMSCollector<VM>,
}

impl<'a, VM: VMBinding> CardMarkingBarrier<'a, VM> {
    pub fn new(collector: &'a CMSCollector<VM>) -> Self {
        CardMarkingBarrier { collector }
    }
}

impl<VM: VMBinding> Barrier for CardMarkingBarrier<'_, VM> {
    #[inline(always)]
    fn post_write_barrier(&self, target: WriteTarget) {
        let addr = match target {
            WriteTarget::Object(object) => object.to_raw_address(),
            WriteTarget::Slot(slot) => slot,
        };
        if self.collector.space().contains(addr) {
            self.collector.card_table().dirty(addr);
        }
    }
}
