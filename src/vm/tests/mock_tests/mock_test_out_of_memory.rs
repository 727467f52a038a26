use super::mock_test_prelude::*;

use crate::util::conversions::bytes_to_words;

// An allocation larger than the reserved old generation collects in the foreground, then
// reports out of memory.
#[test]
pub fn allocation_larger_than_the_heap_reports_out_of_memory() {
    with_mockvm(
        || -> MockVM {
            MockVM {
                out_of_memory: MockMethod::new_fixed(Box::new(|_| {})),
                ..MockVM::default()
            }
        },
        || {
            let cms = leak_cms(&test_builder());
            let reserved = cms.options().max_heap_size;
            let keep = new_object(cms, &[], &[9]);
            add_root(keep);

            let block = memory_manager::alloc(cms, bytes_to_words(reserved) + 1);
            assert!(block.is_zero());

            let stats = cms.collector().stats();
            assert_eq!(stats.foreground_cycles, 1);
            assert_eq!(stats.last_cause, Some(GcCause::AllocationFailure));
            drop(stats);
            assert_eq!(cms.collector().space().heap().read_payload(keep, 0), 9);
        },
        || {
            read_mockvm(|mock| {
                assert!(mock.out_of_memory.is_called());
            });
        },
    )
}
