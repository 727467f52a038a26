use super::mock_test_prelude::*;

const FULL_CYCLE: [CollectorState; 9] = [
    CollectorState::InitialMarking,
    CollectorState::Marking,
    CollectorState::Precleaning,
    CollectorState::AbortablePreclean,
    CollectorState::FinalMarking,
    CollectorState::Sweeping,
    CollectorState::Resizing,
    CollectorState::Resetting,
    CollectorState::Idling,
];

#[test]
pub fn background_cycle_visits_every_state() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            let root = new_object(cms, &[], &[42]);
            add_root(root);

            cms.collector()
                .collect_in_background(GcCause::Occupancy);

            let stats = cms.collector().stats();
            assert_eq!(stats.last_cycle_states(), &FULL_CYCLE);
            assert_eq!(stats.last_cause, Some(GcCause::Occupancy));
            // The initial mark and the final remark.
            assert_eq!(stats.pauses().len(), 2);
            assert!(stats.cycle_time_secs().is_some());
        },
        no_cleanup,
    )
}

#[test]
pub fn foreground_collection_from_idle_visits_every_state() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            collect(cms);

            let stats = cms.collector().stats();
            assert_eq!(stats.last_cycle_states(), &FULL_CYCLE);
            assert_eq!(stats.foreground_cycles, 1);
            assert_eq!(stats.background_cycles, 0);
            assert_eq!(stats.pauses().len(), 1);
        },
        no_cleanup,
    )
}

#[test]
pub fn background_cycle_is_skipped_unless_idle() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            cms.collector()
                .collect_in_background(GcCause::UserRequested);
            cms.collector()
                .collect_in_background(GcCause::UserRequested);
            assert_eq!(cms.collector().stats().background_cycles, 2);
            assert_eq!(cms.collector().state(), CollectorState::Idling);
        },
        no_cleanup,
    )
}
