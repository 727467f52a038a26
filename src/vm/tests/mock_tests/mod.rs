// Mock tests should have the prefix 'mock_test_' in their file name so they are picked up by
// the CI testing scripts.  They are only compiled with the feature `mock_test`.

// Common includes for mock tests.
pub(crate) mod mock_test_prelude {
    pub use crate::collector::{CollectorState, GcCause};
    pub use crate::memory_manager;
    pub use crate::policy::cms_space::{BlockHeader, ObjectImage};
    pub use crate::util::test_util::mock_method::*;
    pub use crate::util::test_util::mock_vm::*;
    pub use crate::util::{Address, ObjectReference};
    pub use crate::vm::*;
    pub use crate::CMS;

    /// Allocate and install an object the way a mutator does.
    pub fn new_object(
        cms: &CMS<MockVM>,
        refs: &[ObjectReference],
        payload: &[usize],
    ) -> ObjectReference {
        let image = ObjectImage {
            mark: 0,
            refs,
            payload,
        };
        let size = image.size_in_words();
        let block = memory_manager::alloc(cms, size);
        assert!(!block.is_zero());
        memory_manager::init_object(cms, block, size, &image)
    }

    /// Assert that the words at `addr` are no longer in an object: they are in a free chunk on
    /// the free lists, or in the unused tail of a linear allocation block.
    pub fn assert_reclaimed(cms: &CMS<MockVM>, addr: Address) {
        let space = cms.collector().space();
        let start = space.block_start(addr);
        match space.heap().header(start) {
            BlockHeader::Free { .. } => assert!(space.free_lists_contain(start)),
            BlockHeader::Lab { .. } => {}
            header => panic!("{} is still in a block {:?} at {}", addr, header, start),
        }
    }
}

mod mock_test_collect_liveness;
mod mock_test_concurrent_mutators;
mod mock_test_cycle_states;
mod mock_test_foreground_preempts_background;
mod mock_test_gc_trigger;
mod mock_test_out_of_memory;
mod mock_test_parallel_marking;
mod mock_test_young_promotion;
