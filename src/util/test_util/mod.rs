//! Helpers for the tests of this crate.

use std::panic;
use std::sync::mpsc;
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::collector::CollectorState;

#[cfg(feature = "mock_test")]
pub mod mock_method;
#[cfg(feature = "mock_test")]
pub mod mock_vm;

/// Run `f` on a new thread and fail the test if it does not finish within `millis`.  Used by
/// tests of the blocking protocols (the token, the terminator) so a deadlock fails instead of
/// hanging the test run.
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        // The receiver is gone if we already timed out.
        let _ = done_tx.send(());
        val
    });
    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(()) => handle.join().unwrap(),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            // The thread panicked before sending.  Report its panic.
            match handle.join() {
                Ok(_) => unreachable!(),
                Err(e) => panic::resume_unwind(e),
            }
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test did not finish in {} ms, possibly deadlocked", millis)
        }
    }
}

lazy_static! {
    // Tests that touch process-wide state (environment variables, the mock runtime, the mutator
    // gate) take this lock.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

/// Run `f` while no other serial test runs.
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // A failed test poisons the lock.  The next test runs anyway.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

/// Run `test`, then `cleanup`, even if `test` panics.  The panic is then passed on.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

#[derive(Default)]
struct PhaseGateSync {
    park_at: Option<CollectorState>,
    parked: bool,
}

/// Holds a background cycle at the start of a chosen state, with the CMS token held, until a
/// test releases it.  Lets a test start a foreground collection while the background cycle is
/// in that state.
#[derive(Default)]
pub struct PhaseGate {
    sync: Mutex<PhaseGateSync>,
    cond: Condvar,
}

impl PhaseGate {
    pub fn park_at(&self, state: CollectorState) {
        self.sync.lock().unwrap().park_at = Some(state);
    }

    /// Block until the background cycle is held at the gate.  Panics after 30 seconds.
    pub fn wait_until_parked(&self) {
        let start = Instant::now();
        let mut sync = self.sync.lock().unwrap();
        while !sync.parked {
            assert!(
                start.elapsed() < Duration::from_secs(30),
                "background cycle never reached {:?}",
                sync.park_at
            );
            sync = self
                .cond
                .wait_timeout(sync, Duration::from_millis(10))
                .unwrap()
                .0;
        }
    }

    pub fn release(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.park_at = None;
        self.cond.notify_all();
    }

    /// Called by the background cycle on entering `state`.
    pub(crate) fn pass(&self, state: CollectorState) {
        let mut sync = self.sync.lock().unwrap();
        if sync.park_at != Some(state) {
            return;
        }
        sync.parked = true;
        self.cond.notify_all();
        while sync.park_at.is_some() {
            sync = self.cond.wait(sync).unwrap();
        }
        sync.parked = false;
    }
}
