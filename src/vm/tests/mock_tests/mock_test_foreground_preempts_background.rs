use super::mock_test_prelude::*;

use std::time::{Duration, Instant};

// The background cycle is parked in the abortable preclean when a foreground collection takes
// over.  The foreground collection finishes the cycle and the background thread abandons it.
#[test]
pub fn foreground_collection_preempts_abortable_preclean() {
    with_mockvm(
        default_setup,
        || {
            let mut builder = test_builder();
            // Keep the abortable preclean waiting: the young generation is in use, but never
            // reaches the penetration that schedules the remark.
            builder.options.schedule_remark_eden_size_threshold = 0;
            builder.options.schedule_remark_eden_penetration = 100;
            builder.options.max_abortable_preclean_time = 60_000;
            builder.options.abortable_preclean_wait_millis = 10;
            set_young_gen(1, 100);
            let cms = leak_cms(&builder);
            let live = new_object(cms, &[], &[7]);
            let dead = new_object(cms, &[], &[8]);
            add_root(live);

            std::thread::scope(|s| {
                let background = s.spawn(|| {
                    cms.collector()
                        .collect_in_background(GcCause::UserRequested)
                });

                let start = Instant::now();
                while cms.collector().state() != CollectorState::AbortablePreclean {
                    assert!(
                        start.elapsed() < Duration::from_secs(30),
                        "background cycle did not reach the abortable preclean"
                    );
                    std::thread::sleep(Duration::from_millis(1));
                }
                let epoch = cms.collector().cycle_epoch();

                collect(cms);
                assert_eq!(cms.collector().cycle_epoch(), epoch + 1);
                background.join().unwrap();
            });

            let stats = cms.collector().stats();
            assert_eq!(stats.preempted_cycles, 1);
            assert_eq!(stats.foreground_cycles, 1);
            assert_eq!(stats.background_cycles, 0);
            assert_eq!(
                stats.last_cycle_states(),
                &[
                    CollectorState::InitialMarking,
                    CollectorState::Marking,
                    CollectorState::Precleaning,
                    CollectorState::AbortablePreclean,
                    CollectorState::FinalMarking,
                    CollectorState::Sweeping,
                    CollectorState::Resizing,
                    CollectorState::Resetting,
                    CollectorState::Idling,
                ]
            );
            drop(stats);
            assert_eq!(cms.collector().state(), CollectorState::Idling);
            assert_eq!(cms.collector().space().heap().read_payload(live, 0), 7);
            assert_reclaimed(cms, dead.to_raw_address());
        },
        no_cleanup,
    )
}

// A background cycle that starts while a foreground collection is active does nothing.
#[test]
pub fn background_cycle_defers_to_foreground_collection() {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            let token = cms
                .collector()
                .token()
                .acquire(crate::collector::token::TokenSide::Vm);
            std::thread::scope(|s| {
                let foreground = s.spawn(|| collect(cms));
                let start = Instant::now();
                while !cms.collector().is_foreground_gc_active() {
                    assert!(start.elapsed() < Duration::from_secs(30));
                    std::thread::sleep(Duration::from_millis(1));
                }
                cms.collector()
                    .collect_in_background(GcCause::UserRequested);
                drop(token);
                foreground.join().unwrap();
            });
            let stats = cms.collector().stats();
            assert_eq!(stats.background_cycles, 0);
            assert_eq!(stats.preempted_cycles, 0);
            assert_eq!(stats.foreground_cycles, 1);
        },
        no_cleanup,
    )
}

// Hold the background cycle at the start of `state`, drop the root of an object that was live
// until then, and run a foreground collection.  The foreground collection marks from scratch,
// so the object is freed even if the background cycle had already finished its remark.
fn foreground_collection_preempts(state: CollectorState) {
    with_mockvm(
        default_setup,
        || {
            let cms = leak_cms(&test_builder());
            let live = new_object(cms, &[], &[1]);
            let late = new_object(cms, &[], &[2]);
            let dead = new_object(cms, &[], &[3]);
            set_roots(vec![live, late]);
            let epoch = cms.collector().cycle_epoch();
            cms.collector().phase_gate().park_at(state);

            std::thread::scope(|s| {
                let background = s.spawn(|| {
                    cms.collector()
                        .collect_in_background(GcCause::UserRequested)
                });
                cms.collector().phase_gate().wait_until_parked();
                assert_eq!(cms.collector().state(), state);
                remove_root(late);

                let foreground = s.spawn(|| collect(cms));
                // The background cycle holds the token, so the foreground collection waits.
                let start = Instant::now();
                while !cms.collector().token().vm_wants_token() {
                    assert!(start.elapsed() < Duration::from_secs(30));
                    std::thread::sleep(Duration::from_millis(1));
                }
                cms.collector().phase_gate().release();
                foreground.join().unwrap();
                background.join().unwrap();
            });

            assert_eq!(cms.collector().cycle_epoch(), epoch + 1);
            let stats = cms.collector().stats();
            assert_eq!(stats.preempted_cycles, 1);
            assert_eq!(stats.foreground_cycles, 1);
            assert_eq!(stats.background_cycles, 0);
            assert_eq!(stats.last_cycle_states().last(), Some(&CollectorState::Idling));
            drop(stats);
            assert_eq!(cms.collector().state(), CollectorState::Idling);
            assert_eq!(cms.collector().space().heap().read_payload(live, 0), 1);
            assert_reclaimed(cms, late.to_raw_address());
            assert_reclaimed(cms, dead.to_raw_address());
        },
        no_cleanup,
    )
}

#[test]
pub fn foreground_collection_preempts_marking() {
    foreground_collection_preempts(CollectorState::Marking)
}

#[test]
pub fn foreground_collection_preempts_sweeping() {
    foreground_collection_preempts(CollectorState::Sweeping)
}

#[test]
pub fn foreground_collection_preempts_resizing() {
    foreground_collection_preempts(CollectorState::Resizing)
}

#[test]
pub fn foreground_collection_preempts_resetting() {
    foreground_collection_preempts(CollectorState::Resetting)
}
