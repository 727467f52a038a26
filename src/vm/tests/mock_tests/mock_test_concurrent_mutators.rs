use super::mock_test_prelude::*;

use std::time::{Duration, Instant};

const MUTATORS: usize = 2;
const ITERATIONS: usize = 4000;
/// Each mutator starts a new list after this many objects, dropping the old one.
const LIST_LENGTH: usize = 200;

/// Walk the list from `head` and check that it is intact: payloads count down by one to a
/// multiple of `LIST_LENGTH`.
fn check_list(cms: &CMS<MockVM>, thread: usize, head: ObjectReference) {
    let heap = cms.collector().space().heap();
    let mut node = head;
    let mut expected = None;
    let mut last = 0;
    while !node.is_null() {
        assert!(heap.header(node.to_raw_address()).is_object());
        assert_eq!(heap.read_payload(node, 0), thread);
        let i = heap.read_payload(node, 1);
        if let Some(expected) = expected {
            assert_eq!(i, expected);
        }
        expected = i.checked_sub(1);
        last = i;
        node = memory_manager::object_reference_read(cms, node, 0);
    }
    assert_eq!(last % LIST_LENGTH, 0);
}

fn mutate(cms: &'static CMS<MockVM>, thread: usize) {
    let _registration = MutatorRegistration::new();
    let mut head = ObjectReference::NULL;
    for i in 0..ITERATIONS {
        if i % LIST_LENGTH == 0 {
            head = ObjectReference::NULL;
        }
        head = new_object(cms, &[head], &[thread, i]);
        ROOTS.lock().unwrap()[thread] = head;
        MUTATOR_GATE.safepoint();
    }
    check_list(cms, thread, head);
}

// The background thread runs cycles while two mutators build and drop linked lists.  Every
// list reachable from a root must stay intact.
#[test]
pub fn concurrent_cycles_keep_reachable_lists() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.initiating_occupancy_fraction = 5;
            builder.options.use_initiating_occupancy_only = true;
            builder.options.wait_duration = 5;
            builder.options.abortable_preclean_wait_millis = 5;
            let cms = leak_cms(&builder);
            set_roots(vec![ObjectReference::NULL; MUTATORS]);
            memory_manager::initialize_collection(cms);

            std::thread::scope(|s| {
                for thread in 0..MUTATORS {
                    s.spawn(move || mutate(cms, thread));
                }
            });

            // Let at least one cycle finish with the lists still rooted.
            let start = Instant::now();
            loop {
                let stats = cms.collector().stats();
                if stats.background_cycles + stats.foreground_cycles > 0
                    && cms.collector().state() == CollectorState::Idling
                {
                    break;
                }
                drop(stats);
                assert!(start.elapsed() < Duration::from_secs(60), "no cycle finished");
                std::thread::sleep(Duration::from_millis(5));
            }
            memory_manager::stop(cms);

            let roots = ROOTS.lock().unwrap().clone();
            for (thread, head) in roots.into_iter().enumerate() {
                check_list(cms, thread, head);
            }
        },
        no_cleanup,
    )
}
