use crate::util::ObjectReference;
use crate::vm::VMBinding;

/// Callback trait of scanning functions that report roots.
pub trait RootVisitor {
    /// Report a root.  References outside the old generation and null references are ignored
    /// by the collector.
    fn visit_root(&mut self, object: ObjectReference);
}

/// This lets us use closures as RootVisitor.
impl<F: FnMut(ObjectReference)> RootVisitor for F {
    fn visit_root(&mut self, object: ObjectReference) {
        self(object)
    }
}

/// VM-specific methods for finding the roots of the old generation.
pub trait Scanning<VM: VMBinding> {
    /// Report every root: thread stacks, globals, and anything else the runtime holds on to.
    /// Called with mutators stopped, by the initial mark and by the final remark.
    ///
    /// Arguments:
    /// * `visitor`: Called once per root.
    fn scan_roots(visitor: &mut dyn RootVisitor);

    /// Report the references from the young generation into the old generation, treating them
    /// as roots.  The young generation is not traced.  Called with mutators stopped.
    fn scan_young_gen_as_roots(_visitor: &mut dyn RootVisitor) {}

    /// Called during precleaning so the runtime can drop discovered references whose referents
    /// are already known to be live.
    fn preclean_weak_refs() {}

    /// Called by the final remark once the transitive closure is complete.  `is_alive` tells
    /// whether an old generation object survives this cycle.  The runtime clears the weak
    /// references whose referents are dead.
    fn process_weak_refs(_is_alive: &dyn Fn(ObjectReference) -> bool) {}
}
