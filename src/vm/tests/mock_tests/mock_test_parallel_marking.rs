use super::mock_test_prelude::*;

/// Build `fanout` chains of `depth` objects hanging off one root object, plus one garbage
/// object after each chain.  Returns the root, the chains and the garbage.
fn build_forest(
    cms: &CMS<MockVM>,
    fanout: usize,
    depth: usize,
) -> (ObjectReference, Vec<Vec<ObjectReference>>, Vec<ObjectReference>) {
    let mut chains = vec![];
    let mut garbage = vec![];
    for c in 0..fanout {
        let mut chain = vec![];
        let mut next = ObjectReference::NULL;
        for d in 0..depth {
            next = new_object(cms, &[next], &[c * 1000 + d]);
            chain.push(next);
        }
        chains.push(chain);
        garbage.push(new_object(cms, &[next], &[usize::MAX]));
    }
    let heads: Vec<ObjectReference> = chains.iter().map(|c| *c.last().unwrap()).collect();
    let root = new_object(cms, &heads, &[]);
    add_root(root);
    (root, chains, garbage)
}

fn check_forest(
    cms: &CMS<MockVM>,
    root: ObjectReference,
    chains: &[Vec<ObjectReference>],
    garbage: &[ObjectReference],
) {
    let heap = cms.collector().space().heap();
    for (c, chain) in chains.iter().enumerate() {
        assert_eq!(
            memory_manager::object_reference_read(cms, root, c),
            *chain.last().unwrap()
        );
        for (d, object) in chain.iter().enumerate() {
            assert!(heap.header(object.to_raw_address()).is_object());
            assert_eq!(heap.read_payload(*object, 0), c * 1000 + d);
        }
    }
    for object in garbage {
        assert_reclaimed(cms, object.to_raw_address());
    }
}

#[test]
pub fn parallel_concurrent_marking() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.conc_threads = 2;
            builder.options.threads = 4;
            builder.options.max_heap_free_ratio = 100;
            let cms = leak_cms(&builder);
            let (root, chains, garbage) = build_forest(cms, 16, 32);

            cms.collector()
                .collect_in_background(GcCause::UserRequested);

            assert_eq!(cms.collector().stats().background_cycles, 1);
            assert_eq!(
                cms.collector().stats().last_sweep.objects_freed,
                garbage.len()
            );
            check_forest(cms, root, &chains, &garbage);
        },
        no_cleanup,
    )
}

// The root is above all of its children, so the marker pushes every child at once and a
// one-entry mark stack overflows.
#[test]
pub fn serial_marking_recovers_from_mark_stack_overflow() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.conc_threads = 1;
            builder.options.threads = 1;
            builder.options.mark_stack_size = 1;
            builder.options.mark_stack_size_max = 1;
            builder.options.max_heap_free_ratio = 100;
            let cms = leak_cms(&builder);
            let (root, chains, garbage) = build_forest(cms, 8, 4);

            cms.collector()
                .collect_in_background(GcCause::UserRequested);

            assert!(cms.collector().stats().mark_stack_overflows > 0);
            check_forest(cms, root, &chains, &garbage);
        },
        no_cleanup,
    )
}

#[test]
pub fn foreground_marking_with_a_tiny_mark_stack() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            builder.options.mark_stack_size = 1;
            builder.options.mark_stack_size_max = 1;
            builder.options.max_heap_free_ratio = 100;
            let cms = leak_cms(&builder);
            let (root, chains, garbage) = build_forest(cms, 8, 4);

            collect(cms);

            check_forest(cms, root, &chains, &garbage);
        },
        no_cleanup,
    )
}
