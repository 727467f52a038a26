//! A mock runtime for tests.
//!
//! The collaborator methods are [`MockMethod`]s so tests can replace them.  The default
//! implementations read the roots from [`ROOTS`] and [`YOUNG_ROOTS`] and the young generation
//! occupancy from [`YOUNG_USED`] and [`YOUNG_CAPACITY`].  Stopping the world goes through
//! [`MUTATOR_GATE`]: a test thread that acts as a mutator registers with the gate and calls
//! [`MutatorGate::safepoint`] regularly.

use crate::collector::GcCause;
use crate::util::ObjectReference;
use crate::vm::{Collection, GCThreadContext, RootVisitor, Scanning, VMBinding};
use crate::CMS;

use super::mock_method::*;

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

lazy_static! {
    // The mutex may get poisoned any time. Accessing this mutex needs to deal with the poisoned case.
    // One can use read/write_mockvm to access mock vm.
    static ref MOCK_VM_INSTANCE: Mutex<MockVM> = Mutex::new(MockVM::default());
    /// Reported by the default `scan_roots`.
    pub static ref ROOTS: Mutex<Vec<ObjectReference>> = Mutex::new(vec![]);
    /// Reported by the default `scan_young_gen_as_roots`.
    pub static ref YOUNG_ROOTS: Mutex<Vec<ObjectReference>> = Mutex::new(vec![]);
    /// Weak references.  Entries whose referent dies are set to null by `process_weak_refs`.
    pub static ref WEAK_REFS: Mutex<Vec<ObjectReference>> = Mutex::new(vec![]);
    pub static ref MUTATOR_GATE: MutatorGate = MutatorGate::new();
}

pub static YOUNG_USED: AtomicUsize = AtomicUsize::new(0);
pub static YOUNG_CAPACITY: AtomicUsize = AtomicUsize::new(0);

macro_rules! mock {
    ($fn: ident($($arg:expr),*)) => {
        write_mockvm(|mock| mock.$fn.call(($($arg),*)))
    };
}

pub fn read_mockvm<F, R>(func: F) -> R
where
    F: FnOnce(&MockVM) -> R,
{
    let lock = MOCK_VM_INSTANCE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    func(&lock)
}

pub fn write_mockvm<F, R>(func: F) -> R
where
    F: FnOnce(&mut MockVM) -> R,
{
    let mut lock = MOCK_VM_INSTANCE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    func(&mut lock)
}

fn lock_global<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Forget the roots, weak references and young generation knobs of the last test.
pub fn reset_globals() {
    lock_global(&ROOTS).clear();
    lock_global(&YOUNG_ROOTS).clear();
    lock_global(&WEAK_REFS).clear();
    YOUNG_USED.store(0, Ordering::SeqCst);
    YOUNG_CAPACITY.store(0, Ordering::SeqCst);
}

pub fn add_root(object: ObjectReference) {
    lock_global(&ROOTS).push(object);
}

pub fn remove_root(object: ObjectReference) {
    lock_global(&ROOTS).retain(|r| *r != object);
}

pub fn set_roots(roots: Vec<ObjectReference>) {
    *lock_global(&ROOTS) = roots;
}

pub fn weak_refs() -> Vec<ObjectReference> {
    lock_global(&WEAK_REFS).clone()
}

pub fn set_young_gen(used: usize, capacity: usize) {
    YOUNG_CAPACITY.store(capacity, Ordering::SeqCst);
    YOUNG_USED.store(used, Ordering::SeqCst);
}

#[cfg(feature = "mock_test")]
pub fn with_mockvm<S, T, C>(setup: S, test: T, cleanup: C)
where
    S: FnOnce() -> MockVM,
    T: FnOnce() + std::panic::UnwindSafe,
    C: FnOnce(),
{
    super::serial_test(|| {
        // Setup
        {
            reset_globals();
            write_mockvm(|mock| *mock = setup());
        }
        super::with_cleanup(test, cleanup);
    })
}

pub fn default_setup() -> MockVM {
    MockVM::default()
}

pub fn no_cleanup() {}

/// Create an instance that lives for the rest of the test process, as a runtime would keep it
/// in a static.
pub fn leak_cms(builder: &crate::CMSBuilder) -> &'static CMS<MockVM> {
    Box::leak(crate::memory_manager::cms_init::<MockVM>(builder))
}

/// A heap small enough for tests: 256 KB committed, up to 1 MB.
pub fn test_builder() -> crate::CMSBuilder {
    let mut builder = crate::CMSBuilder::new_no_env_vars();
    builder.options.initial_heap_size = 256 << 10;
    builder.options.max_heap_size = 1 << 20;
    builder.options.threads = 2;
    builder.options.conc_threads = 1;
    builder.options.verify_after_remark = true;
    builder.options.verify_free_lists = true;
    builder
}

thread_local! {
    static IS_MUTATOR: Cell<bool> = const { Cell::new(false) };
}

#[derive(Default)]
struct GateSync {
    mutators: usize,
    /// Mutators at a safepoint, including a mutator that stopped the world itself.
    parked: usize,
    stopped: bool,
}

/// Stops and resumes the mutator threads of a test.
pub struct MutatorGate {
    sync: Mutex<GateSync>,
    cond: Condvar,
}

impl MutatorGate {
    fn new() -> Self {
        MutatorGate {
            sync: Mutex::new(GateSync::default()),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateSync> {
        lock_global(&self.sync)
    }

    /// Make the calling thread a mutator.
    pub fn register_mutator(&self) {
        let mut sync = self.lock();
        // Not while the world is stopped.
        while sync.stopped {
            sync = self.cond.wait(sync).unwrap_or_else(|e| e.into_inner());
        }
        sync.mutators += 1;
        IS_MUTATOR.with(|m| m.set(true));
    }

    pub fn unregister_mutator(&self) {
        let mut sync = self.lock();
        sync.mutators -= 1;
        IS_MUTATOR.with(|m| m.set(false));
        self.cond.notify_all();
    }

    /// Block here while the world is stopped.  Mutators call this between operations, with no
    /// block allocated but not yet initialized.
    pub fn safepoint(&self) {
        if !IS_MUTATOR.with(|m| m.get()) {
            return;
        }
        let mut sync = self.lock();
        if sync.stopped {
            sync.parked += 1;
            self.cond.notify_all();
            while sync.stopped {
                sync = self.cond.wait(sync).unwrap_or_else(|e| e.into_inner());
            }
            sync.parked -= 1;
        }
    }

    pub fn stop_all(&self) {
        let is_mutator = IS_MUTATOR.with(|m| m.get());
        let mut sync = self.lock();
        if is_mutator {
            sync.parked += 1;
            self.cond.notify_all();
        }
        // Someone else has stopped the world.  Wait for them to finish.
        while sync.stopped {
            sync = self.cond.wait(sync).unwrap_or_else(|e| e.into_inner());
        }
        sync.stopped = true;
        while sync.parked < sync.mutators {
            sync = self.cond.wait(sync).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn resume_all(&self) {
        let is_mutator = IS_MUTATOR.with(|m| m.get());
        let mut sync = self.lock();
        debug_assert!(sync.stopped);
        sync.stopped = false;
        if is_mutator {
            sync.parked -= 1;
        }
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }
}

/// Registers the calling thread as a mutator until dropped.
pub struct MutatorRegistration;

impl MutatorRegistration {
    pub fn new() -> Self {
        MUTATOR_GATE.register_mutator();
        MutatorRegistration
    }
}

impl Default for MutatorRegistration {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MutatorRegistration {
    fn drop(&mut self) {
        MUTATOR_GATE.unregister_mutator();
    }
}

pub struct MockVM {
    // scanning
    pub scan_roots: MockMethod<(), Vec<ObjectReference>>,
    pub scan_young_gen_as_roots: MockMethod<(), Vec<ObjectReference>>,
    pub preclean_weak_refs: MockMethod<(), ()>,
    // collection
    pub spawn_gc_thread: MockMethod<GCThreadContext<MockVM>, ()>,
    pub young_gen_used_bytes: MockMethod<(), usize>,
    pub young_gen_capacity_bytes: MockMethod<(), usize>,
    pub out_of_memory: MockMethod<usize, ()>,
}

impl Default for MockVM {
    fn default() -> Self {
        Self {
            scan_roots: MockMethod::new_fixed(Box::new(|()| lock_global(&ROOTS).clone())),
            scan_young_gen_as_roots: MockMethod::new_fixed(Box::new(|()| {
                lock_global(&YOUNG_ROOTS).clone()
            })),
            preclean_weak_refs: MockMethod::new_default(),
            spawn_gc_thread: MockMethod::new_fixed(Box::new(|ctx| {
                std::thread::Builder::new()
                    .name("CMS background".to_string())
                    .spawn(move || match ctx {
                        GCThreadContext::Controller(mut controller) => controller.run(),
                    })
                    .unwrap();
            })),
            young_gen_used_bytes: MockMethod::new_fixed(Box::new(|()| {
                YOUNG_USED.load(Ordering::SeqCst)
            })),
            young_gen_capacity_bytes: MockMethod::new_fixed(Box::new(|()| {
                YOUNG_CAPACITY.load(Ordering::SeqCst)
            })),
            out_of_memory: MockMethod::new_fixed(Box::new(|bytes| {
                panic!("Out of memory allocating {} bytes", bytes)
            })),
        }
    }
}

impl VMBinding for MockVM {
    type VMScanning = MockVM;
    type VMCollection = MockVM;
}

impl Scanning<MockVM> for MockVM {
    fn scan_roots(visitor: &mut dyn RootVisitor) {
        // Visit outside the lock of the mock.
        let roots = mock!(scan_roots());
        for root in roots {
            visitor.visit_root(root);
        }
    }

    fn scan_young_gen_as_roots(visitor: &mut dyn RootVisitor) {
        let roots = mock!(scan_young_gen_as_roots());
        for root in roots {
            visitor.visit_root(root);
        }
    }

    fn preclean_weak_refs() {
        mock!(preclean_weak_refs())
    }

    fn process_weak_refs(is_alive: &dyn Fn(ObjectReference) -> bool) {
        let mut weak_refs = lock_global(&WEAK_REFS);
        for r in weak_refs.iter_mut() {
            if !r.is_null() && !is_alive(*r) {
                *r = ObjectReference::NULL;
            }
        }
    }
}

impl Collection<MockVM> for MockVM {
    // Not mocked: they block, and must not hold the lock of the mock meanwhile.
    fn stop_all_mutators() {
        MUTATOR_GATE.stop_all();
    }

    fn resume_mutators() {
        MUTATOR_GATE.resume_all();
    }

    fn spawn_gc_thread(ctx: GCThreadContext<MockVM>) {
        mock!(spawn_gc_thread(ctx))
    }

    fn young_gen_used_bytes() -> usize {
        mock!(young_gen_used_bytes())
    }

    fn young_gen_capacity_bytes() -> usize {
        mock!(young_gen_capacity_bytes())
    }

    fn out_of_memory(bytes: usize) {
        mock!(out_of_memory(bytes))
    }
}

/// Run a foreground collection as the runtime would on a user request.
pub fn collect(cms: &CMS<MockVM>) {
    cms.collector().collect(GcCause::UserRequested);
}
