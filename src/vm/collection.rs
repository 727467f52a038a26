use crate::collector::ConcurrentMarkSweepThread;
use crate::vm::VMBinding;

/// Thread context for the spawned GC thread.  It is used by spawn_gc_thread.
pub enum GCThreadContext<VM: VMBinding> {
    /// The background collector thread.  There is only one.
    Controller(Box<ConcurrentMarkSweepThread<VM>>),
}

/// VM-specific methods for synchronizing with mutators and creating threads.
pub trait Collection<VM: VMBinding> {
    /// Stop all the mutator threads and return once every one of them is at a safepoint.  The
    /// calling thread may itself be a mutator.  If another thread has stopped the mutators, wait
    /// until it resumes them first.
    ///
    /// A mutator that is blocked on a lock of the old generation while this is in progress must
    /// still be able to make progress: the collector gives its locks up at its yield points.
    fn stop_all_mutators();

    /// Resume the mutators stopped by the last [`Collection::stop_all_mutators`] of this thread.
    fn resume_mutators();

    /// Ask the VM to spawn a GC thread.  The thread must call `run` on the context.
    ///
    /// Arguments:
    /// * `ctx`: The context of the GC thread to be spawned.
    fn spawn_gc_thread(ctx: GCThreadContext<VM>);

    /// Bytes used in the young generation.  The abortable preclean waits for this to reach a
    /// fraction of the capacity so the remark pause can follow a young collection.
    fn young_gen_used_bytes() -> usize {
        0
    }

    /// The capacity of the young generation's allocation area in bytes.
    fn young_gen_capacity_bytes() -> usize {
        0
    }

    /// Called when an allocation fails even after a full collection.  The default panics.
    ///
    /// Arguments:
    /// * `bytes`: The size of the failed request.
    fn out_of_memory(bytes: usize) {
        panic!("Out of memory allocating {} bytes", bytes);
    }
}
