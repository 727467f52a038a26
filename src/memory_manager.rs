//! Runtime-to-collector interface: safe Rust APIs.
//!
//! A runtime creates one [`CMS`] instance with [`cms_init`], keeps it in a static, and calls
//! [`initialize_collection`] once its thread system can spawn the background thread.  Mutators
//! allocate with [`alloc`], install the object with [`init_object`] before their next safepoint,
//! and store references through [`object_reference_write`] so the card table sees every store.
//! The young generation brackets each collection with [`young_collection_prologue`] and
//! [`YoungGcScope::epilogue`].

use crate::barriers::{Barrier, CardMarkingBarrier, WriteTarget};
use crate::cms::{CMSBuilder, CMS};
use crate::collector::{GcCause, YoungGcScope};
use crate::policy::cms_space::ObjectImage;
use crate::util::conversions::{adjust_object_size, words_to_bytes};
use crate::util::log;
use crate::util::{Address, ObjectReference};
use crate::vm::{Collection, VMBinding};

/// Create the old generation with the options in `builder`.
///
/// This attempts to initialize a logger.  A runtime that wants its own logger should initialize
/// it before calling this.
///
/// Arguments:
/// * `builder`: The options.
pub fn cms_init<VM: VMBinding>(builder: &CMSBuilder) -> Box<CMS<VM>> {
    match crate::util::logger::try_init() {
        Ok(_) => log::debug!("The collector initialized the logger."),
        Err(_) => log::debug!(
            "The collector failed to initialize the logger. Possibly a logger has been initialized by user."
        ),
    }
    let cms = builder.build::<VM>();
    log::info!(
        "Initialized CMS with a {} byte old generation, up to {} bytes",
        cms.options.initial_heap_size,
        cms.options.max_heap_size
    );
    #[cfg(feature = "extreme_assertions")]
    log::warn!("The feature 'extreme_assertions' is enabled. The collector will run expensive run-time checks. Slow performance should be expected.");
    Box::new(cms)
}

/// Spawn the background collector thread.  No concurrent cycle starts before this.
pub fn initialize_collection<VM: VMBinding>(cms: &'static CMS<VM>) {
    cms.initialize_collection();
}

/// Allocate `size` words in the old generation.  The block has no header: the caller must
/// install one with [`init_object`] before it next reaches a safepoint.  If no space can be
/// found even after a full collection, the runtime's `out_of_memory` is called and
/// `Address::ZERO` is returned.
///
/// Arguments:
/// * `cms`: The instance.
/// * `size`: The size in words, including the header words.
pub fn alloc<VM: VMBinding>(cms: &CMS<VM>, size: usize) -> Address {
    match cms.collector.allocate(size) {
        Some(block) => block,
        None => {
            VM::VMCollection::out_of_memory(words_to_bytes(size));
            Address::ZERO
        }
    }
}

/// Install the object described by `image` in a block returned by [`alloc`].  Stores of
/// non-null references are made visible to the card table, since a concurrent marker skips
/// blocks whose header was not installed when it passed them.
///
/// Arguments:
/// * `cms`: The instance.
/// * `block`: The block returned by `alloc`.
/// * `size`: The size passed to `alloc`.
/// * `image`: The contents of the object.
pub fn init_object<VM: VMBinding>(
    cms: &CMS<VM>,
    block: Address,
    size: usize,
    image: &ObjectImage,
) -> ObjectReference {
    let size = adjust_object_size(size);
    assert!(
        image.size_in_words() <= size,
        "object of {} words does not fit a block of {} words",
        image.size_in_words(),
        size
    );
    let space = cms.collector.space();
    space.heap().install_object(block, size, image);
    let object = ObjectReference::from_raw_address(block);
    if image.refs.iter().any(|r| !r.is_null()) {
        let barrier = CardMarkingBarrier::new(&cms.collector);
        for (i, r) in image.refs.iter().enumerate() {
            if !r.is_null() {
                barrier.post_write_barrier(WriteTarget::Slot(space.heap().ref_slot(object, i)));
            }
        }
    }
    object
}

/// Store `target` into reference field `index` of the old generation object `src`, with the
/// card marking post write barrier.
pub fn object_reference_write<VM: VMBinding>(
    cms: &CMS<VM>,
    src: ObjectReference,
    index: usize,
    target: ObjectReference,
) {
    let heap = cms.collector.space().heap();
    heap.write_ref(src, index, target);
    CardMarkingBarrier::new(&cms.collector)
        .post_write_barrier(WriteTarget::Slot(heap.ref_slot(src, index)));
}

/// Load reference field `index` of `src`.
pub fn object_reference_read<VM: VMBinding>(
    cms: &CMS<VM>,
    src: ObjectReference,
    index: usize,
) -> ObjectReference {
    cms.collector.space().heap().read_ref(src, index)
}

/// Called by the young generation at the start of a young collection, with the mutators
/// stopped.  Promotion and the card scan go through the returned scope.
pub fn young_collection_prologue<VM: VMBinding>(cms: &CMS<VM>) -> YoungGcScope<'_, VM> {
    cms.collector.young_collection_prologue()
}

/// Collect the old generation on the calling thread, finishing any concurrent cycle in
/// progress.  Returns with the mutators resumed.
pub fn handle_user_collection_request<VM: VMBinding>(cms: &CMS<VM>) {
    cms.collector.collect(GcCause::UserRequested);
}

/// Ask the background thread to start a concurrent cycle soon.
pub fn request_concurrent_collection<VM: VMBinding>(cms: &CMS<VM>) {
    cms.collector.request_full_gc();
}

/// Bytes in use in the old generation.
pub fn used_bytes<VM: VMBinding>(cms: &CMS<VM>) -> usize {
    cms.collector.space().used()
}

/// Bytes free in the committed part of the old generation.
pub fn free_bytes<VM: VMBinding>(cms: &CMS<VM>) -> usize {
    cms.collector.space().free()
}

/// Bytes committed to the old generation.
pub fn total_bytes<VM: VMBinding>(cms: &CMS<VM>) -> usize {
    cms.collector.space().capacity()
}

pub fn starting_heap_address<VM: VMBinding>(cms: &CMS<VM>) -> Address {
    cms.collector.space().bottom()
}

pub fn last_heap_address<VM: VMBinding>(cms: &CMS<VM>) -> Address {
    cms.collector.space().reserved_end()
}

pub fn is_in_old_gen<VM: VMBinding>(cms: &CMS<VM>, object: ObjectReference) -> bool {
    cms.collector.is_in_old_gen(object)
}

/// Whether `object` survives the current cycle as far as marking can tell.  Only meaningful
/// between the final remark and the end of the sweep, or for objects outside the old
/// generation, which are always live.
pub fn is_live_object<VM: VMBinding>(cms: &CMS<VM>, object: ObjectReference) -> bool {
    cms.collector.is_alive(object)
}

/// Stop the background thread.  A cycle in progress is finished first.
pub fn stop<VM: VMBinding>(cms: &CMS<VM>) {
    cms.collector.stop();
}
