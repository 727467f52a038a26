use super::mock_test_prelude::*;

// A -> B -> C is reachable from a root.  D points at A but nothing points at D.
fn build_graph(cms: &CMS<MockVM>) -> [ObjectReference; 4] {
    let c = new_object(cms, &[], &[3]);
    let b = new_object(cms, &[c], &[2]);
    let a = new_object(cms, &[b], &[1]);
    let d = new_object(cms, &[a], &[4]);
    add_root(a);
    WEAK_REFS.lock().unwrap().extend([a, d]);
    [a, b, c, d]
}

fn check_graph(cms: &CMS<MockVM>, [a, b, c, d]: [ObjectReference; 4]) {
    let heap = cms.collector().space().heap();
    assert_eq!(memory_manager::object_reference_read(cms, a, 0), b);
    assert_eq!(memory_manager::object_reference_read(cms, b, 0), c);
    assert_eq!(heap.read_payload(a, 0), 1);
    assert_eq!(heap.read_payload(b, 0), 2);
    assert_eq!(heap.read_payload(c, 0), 3);
    assert_reclaimed(cms, d.to_raw_address());
    assert_eq!(weak_refs(), vec![a, ObjectReference::NULL]);
}

#[test]
pub fn background_cycle_frees_unreachable_objects() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.max_heap_free_ratio = 100;
            let cms = leak_cms(&builder);
            let objects = build_graph(cms);

            cms.collector()
                .collect_in_background(GcCause::UserRequested);

            assert_eq!(cms.collector().state(), CollectorState::Idling);
            assert_eq!(cms.collector().stats().background_cycles, 1);
            assert_eq!(cms.collector().stats().last_sweep.objects_freed, 1);
            check_graph(cms, objects);
        },
        no_cleanup,
    )
}

#[test]
pub fn foreground_collection_frees_unreachable_objects() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.max_heap_free_ratio = 100;
            let cms = leak_cms(&builder);
            let objects = build_graph(cms);
            let used_before = memory_manager::used_bytes(cms);

            memory_manager::handle_user_collection_request(cms);

            assert_eq!(cms.collector().state(), CollectorState::Idling);
            assert_eq!(cms.collector().stats().foreground_cycles, 1);
            assert!(memory_manager::used_bytes(cms) < used_before);
            check_graph(cms, objects);
        },
        no_cleanup,
    )
}

#[test]
pub fn dropped_root_is_freed_by_the_next_cycle() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            let [a, ..] = build_graph(cms);
            let e = new_object(cms, &[], &[5]);
            add_root(e);

            cms.collector()
                .collect_in_background(GcCause::UserRequested);
            assert_eq!(cms.collector().space().heap().read_payload(e, 0), 5);

            remove_root(e);
            cms.collector()
                .collect_in_background(GcCause::UserRequested);
            assert_reclaimed(cms, e.to_raw_address());
            assert_eq!(cms.collector().space().heap().read_payload(a, 0), 1);
            assert_eq!(cms.collector().stats().background_cycles, 2);
        },
        no_cleanup,
    )
}
