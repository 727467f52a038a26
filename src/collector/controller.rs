//! The background collector thread.
//!
//! The thread sleeps on a monitor for `wait_duration` milliseconds at a time, or until it is
//! notified, and starts a background cycle whenever a trigger fires.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::CMSCollector;
use crate::util::log;
use crate::vm::VMBinding;

#[derive(Default)]
struct MonitorSync {
    should_stop: bool,
    started: bool,
    terminated: bool,
    /// Set by `notify` and consumed by the next wait, so a notification is not lost if it
    /// arrives while the thread is busy.
    notified: bool,
}

/// The monitor the background thread waits on.
pub(crate) struct ControllerMonitor {
    sync: Mutex<MonitorSync>,
    cond: Condvar,
}

impl ControllerMonitor {
    pub fn new() -> Self {
        ControllerMonitor {
            sync: Mutex::new(MonitorSync::default()),
            cond: Condvar::new(),
        }
    }

    /// Wake the background thread up, or make its next wait return at once.
    pub fn notify(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.notified = true;
        self.cond.notify_all();
    }

    /// Wait until notified, stopped, or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) {
        let sync = self.sync.lock().unwrap();
        let (mut sync, _) = self
            .cond
            .wait_timeout_while(sync, timeout, |s| !s.notified && !s.should_stop)
            .unwrap();
        sync.notified = false;
    }

    fn set_started(&self) {
        self.sync.lock().unwrap().started = true;
    }

    fn should_stop(&self) -> bool {
        self.sync.lock().unwrap().should_stop
    }

    fn set_terminated(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.terminated = true;
        self.cond.notify_all();
    }

    /// Ask the thread to exit and wait until it has, if it was ever started.
    fn stop_and_wait(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.should_stop = true;
        self.cond.notify_all();
        if !sync.started {
            return;
        }
        let _sync = self.cond.wait_while(sync, |s| !s.terminated).unwrap();
    }
}

/// The thread-local context of the background collector thread.
pub struct ConcurrentMarkSweepThread<VM: VMBinding> {
    collector: &'static CMSCollector<VM>,
}

impl<VM: VMBinding> ConcurrentMarkSweepThread<VM> {
    pub fn new(collector: &'static CMSCollector<VM>) -> Box<Self> {
        Box::new(ConcurrentMarkSweepThread { collector })
    }

    /// The body of the background thread.  Returns after [`CMSCollector::stop`].
    pub fn run(&mut self) {
        let collector = self.collector;
        let monitor = &collector.monitor;
        monitor.set_started();
        log::debug!("CMS background thread started");
        let wait = Duration::from_millis(collector.options.wait_duration);
        loop {
            monitor.wait_timeout(wait);
            if monitor.should_stop() {
                break;
            }
            if let Some(cause) = collector.should_concurrent_collect() {
                collector.collect_in_background(cause);
            }
        }
        log::debug!("CMS background thread exiting");
        monitor.set_terminated();
    }
}

impl<VM: VMBinding> CMSCollector<VM> {
    /// Stop the background thread, waiting for a running cycle to finish.
    pub fn stop(&self) {
        self.monitor.stop_and_wait();
    }

    /// Wake the background thread so it checks its triggers now.
    pub fn notify_background_thread(&self) {
        self.monitor.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn notify_before_wait_is_not_lost() {
        let monitor = ControllerMonitor::new();
        monitor.notify();
        let start = Instant::now();
        monitor.wait_timeout(Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stop_without_start_returns() {
        let monitor = ControllerMonitor::new();
        monitor.stop_and_wait();
        assert!(monitor.should_stop());
    }

    #[test]
    fn stop_waits_for_termination() {
        let monitor = Arc::new(ControllerMonitor::new());
        monitor.set_started();
        let m = monitor.clone();
        let handle = std::thread::spawn(move || {
            while !m.should_stop() {
                m.wait_timeout(Duration::from_millis(10));
            }
            m.set_terminated();
        });
        monitor.stop_and_wait();
        assert!(monitor.sync.lock().unwrap().terminated);
        handle.join().unwrap();
    }
}
