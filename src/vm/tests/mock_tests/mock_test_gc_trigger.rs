use super::mock_test_prelude::*;

use crate::collector::ExpansionCause;

#[test]
pub fn occupancy_above_the_initiating_fraction_starts_a_cycle() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.initiating_occupancy_fraction = 10;
            builder.options.use_initiating_occupancy_only = true;
            let cms = leak_cms(&builder);
            assert_eq!(cms.collector().should_concurrent_collect(), None);

            // 64 objects of 64 words is 32 KB, an eighth of the heap.
            for i in 0..64 {
                add_root(new_object(cms, &[], &[i; 62]));
            }
            assert!(cms.collector().space().occupancy() > 0.1);
            assert_eq!(
                cms.collector().should_concurrent_collect(),
                Some(GcCause::Occupancy)
            );
        },
        no_cleanup,
    )
}

#[test]
pub fn requested_cycle_is_reported_once() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            memory_manager::request_concurrent_collection(cms);
            assert_eq!(
                cms.collector().should_concurrent_collect(),
                Some(GcCause::UserRequested)
            );
            // The cycle clears the request.
            cms.collector()
                .collect_in_background(GcCause::UserRequested);
            assert!(!cms.collector().full_gc_requested());
            assert_eq!(cms.collector().should_concurrent_collect(), None);
        },
        no_cleanup,
    )
}

#[test]
pub fn expansion_for_an_allocation_starts_one_cycle() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.use_initiating_occupancy_only = true;
            builder.options.initiating_occupancy_fraction = 100;
            let cms = leak_cms(&builder);
            let capacity = memory_manager::total_bytes(cms);

            // Larger than the whole committed space.
            let words = crate::util::conversions::bytes_to_words(capacity) + 64;
            let block = memory_manager::alloc(cms, words);
            assert!(!block.is_zero());
            assert!(memory_manager::total_bytes(cms) > capacity);
            assert_eq!(
                cms.collector().last_expansion_cause(),
                ExpansionCause::SatisfyAllocation
            );
            // Install a header so the block parses.
            let payload = vec![0; words - 2];
            memory_manager::init_object(
                cms,
                block,
                words,
                &ObjectImage {
                    mark: 0,
                    refs: &[],
                    payload: &payload,
                },
            );

            assert_eq!(
                cms.collector().should_concurrent_collect(),
                Some(GcCause::Expansion)
            );
            assert_eq!(
                cms.collector().last_expansion_cause(),
                ExpansionCause::NoExpansion
            );
        },
        no_cleanup,
    )
}

#[test]
pub fn interval_trigger() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.use_initiating_occupancy_only = true;
            builder.options.trigger_interval = 0;
            let cms = leak_cms(&builder);
            assert_eq!(
                cms.collector().should_concurrent_collect(),
                Some(GcCause::Interval)
            );
        },
        no_cleanup,
    )
}
