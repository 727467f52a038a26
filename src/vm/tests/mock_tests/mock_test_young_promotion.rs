use super::mock_test_prelude::*;

use crate::policy::cms_space::PromotionLab;

#[test]
pub fn promoted_objects_survive_a_collection() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            let old = new_object(cms, &[], &[1]);
            add_root(old);

            let scope = memory_manager::young_collection_prologue(cms);
            let a = scope
                .promote(&ObjectImage {
                    mark: 0,
                    refs: &[old],
                    payload: &[10, 11],
                })
                .unwrap();
            let mut lab: PromotionLab = scope.promotion_lab();
            let b = scope
                .par_promote(
                    &mut lab,
                    &ObjectImage {
                        mark: 0,
                        refs: &[a],
                        payload: &[20],
                    },
                )
                .unwrap();
            lab.retire();
            scope.epilogue();

            assert!(memory_manager::is_in_old_gen(cms, a));
            assert!(memory_manager::is_in_old_gen(cms, b));
            assert_eq!(memory_manager::object_reference_read(cms, b, 0), a);

            // Only the young generation refers to the promoted objects.
            YOUNG_ROOTS.lock().unwrap().push(b);
            collect(cms);

            let heap = cms.collector().space().heap();
            assert_eq!(heap.read_payload(a, 1), 11);
            assert_eq!(heap.read_payload(b, 0), 20);
            assert_eq!(memory_manager::object_reference_read(cms, a, 0), old);
        },
        no_cleanup,
    )
}

#[test]
pub fn dirty_cards_report_old_objects_once() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            let x = new_object(cms, &[ObjectReference::NULL; 4], &[]);
            let y = new_object(cms, &[ObjectReference::NULL], &[]);
            let target = new_object(cms, &[], &[]);

            // Two stores into x, one into y.
            memory_manager::object_reference_write(cms, x, 0, target);
            memory_manager::object_reference_write(cms, x, 3, target);
            memory_manager::object_reference_write(cms, y, 0, target);

            let scope = memory_manager::young_collection_prologue(cms);
            let mut reported = vec![];
            scope.scan_dirty_cards(|object| reported.push(object));
            assert!(reported.contains(&x));
            assert!(reported.contains(&y));
            let mut deduped = reported.clone();
            deduped.dedup();
            assert_eq!(deduped, reported);

            // The scan cleaned the cards.
            let mut again = vec![];
            scope.scan_dirty_cards(|object| again.push(object));
            assert!(again.is_empty());
            scope.epilogue();
        },
        no_cleanup,
    )
}

#[test]
pub fn promotion_fails_when_the_heap_is_full() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            let payload = vec![0; cms.options().max_heap_size / 8];
            let scope = memory_manager::young_collection_prologue(cms);
            let result = scope.promote(&ObjectImage {
                mark: 0,
                refs: &[],
                payload: &payload,
            });
            assert!(result.is_none());
            scope.epilogue();
        },
        no_cleanup,
    )
}
