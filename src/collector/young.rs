//! The old generation's side of a young collection.
//!
//! A young collection holds the CMS token on the VM side and the free list lock from its
//! prologue to its epilogue.  Any background phase is parked at a yield point meanwhile.

use std::sync::atomic::Ordering;

use super::token::{TokenGuard, TokenSide};
use super::{CMSCollector, ExpansionCause};
use crate::policy::cms_space::{FreeListGuard, ObjectImage, PromotionLab};
use crate::util::constants::BYTES_IN_CARD;
use crate::util::conversions::{adjust_object_size, words_to_bytes};
use crate::util::log;
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// A young collection in progress.  Dropping it without calling [`YoungGcScope::epilogue`]
/// still releases the lock and the token.
pub struct YoungGcScope<'a, VM: VMBinding> {
    // Dropped in declaration order: the lock before the token.
    fl: FreeListGuard<'a>,
    _token: TokenGuard<'a>,
    collector: &'a CMSCollector<VM>,
}

impl<VM: VMBinding> CMSCollector<VM> {
    /// Called by the runtime at the start of a young collection, with the mutators stopped.
    pub fn young_collection_prologue(&self) -> YoungGcScope<'_, VM> {
        let token = self.token.acquire(TokenSide::Vm);
        let fl = self.space.lock();
        log::trace!("Young collection started in CMS state {:?}", self.state());
        YoungGcScope {
            fl,
            _token: token,
            collector: self,
        }
    }
}

impl<'a, VM: VMBinding> YoungGcScope<'a, VM> {
    pub fn collector(&self) -> &'a CMSCollector<VM> {
        self.collector
    }

    /// Copy a surviving young object into the old generation, expanding it if needed.  Returns
    /// `None` if the generation cannot hold the object.  The runtime then finishes the young
    /// collection and asks for a full collection.
    pub fn promote(&self, image: &ObjectImage) -> Option<ObjectReference> {
        let c = self.collector;
        let size = image.size_in_words();
        let object = c.space.promote(&self.fl, image).or_else(|| {
            let bytes = words_to_bytes(size);
            if c.expand_for_gc_cause(&self.fl, bytes, bytes, ExpansionCause::SatisfyPromotion) {
                c.space.promote(&self.fl, image)
            } else {
                None
            }
        });
        match object {
            Some(object) => {
                c.promoted(object, adjust_object_size(size));
                Some(object)
            }
            None => {
                log::warn!("Promotion of {} words failed", size);
                None
            }
        }
    }

    /// A promotion LAB for one worker of a parallel young collection.  Retire it before the
    /// epilogue.
    pub fn promotion_lab(&self) -> PromotionLab<'a> {
        PromotionLab::new(&self.collector.space)
    }

    /// Like [`YoungGcScope::promote`], but allocating from a worker's promotion LAB.  Workers
    /// may call this concurrently.
    pub fn par_promote(
        &self,
        lab: &mut PromotionLab<'a>,
        image: &ObjectImage,
    ) -> Option<ObjectReference> {
        let c = self.collector;
        let size = image.size_in_words();
        let block = match lab.alloc(size) {
            Some(block) => block,
            None => {
                let bytes = words_to_bytes(size).max(c.options.initial_heap_size / 8);
                if !c.expand_for_gc_cause(
                    &self.fl,
                    bytes,
                    words_to_bytes(size),
                    ExpansionCause::AllocateParLab,
                ) {
                    log::warn!("Parallel promotion of {} words failed", size);
                    return None;
                }
                lab.alloc(size)?
            }
        };
        let size = adjust_object_size(size);
        c.space.heap().install_object(block, size, image);
        let object = ObjectReference::from_raw_address(block);
        c.promoted(object, size);
        Some(object)
    }

    /// Report every old generation object on a dirty card to `f`, so the runtime can scan it
    /// for references into the young generation.  The cards are clean afterwards.
    pub fn scan_dirty_cards<F: FnMut(ObjectReference)>(&self, mut f: F) {
        let c = self.collector;
        let used = c.space.used_region();
        c.clear_cards_for_young_scan(used.clone());
        let mut last_reported = None;
        c.card_table.for_each_young_gen_card(used.clone(), |card: Address| {
            let end = (card + BYTES_IN_CARD).min(used.end);
            let mut block = c.space.block_start(card);
            while block < end {
                let size = c.space.block_size(block);
                if c.space.block_is_obj(block) && last_reported != Some(block) {
                    last_reported = Some(block);
                    f(ObjectReference::from_raw_address(block));
                }
                block = block.add_words(size);
            }
        });
    }

    /// Called at the end of the young collection.  Resizes the promotion LABs, refills the
    /// linear allocation blocks and samples the promotion rate.
    pub fn epilogue(self) {
        let c = self.collector;
        c.space.compute_desired_plab_size();
        c.space.refill_linear_alloc_blocks_if_needed(&self.fl);
        let promoted = c.promoted_bytes.swap(0, Ordering::Relaxed);
        c.stats.lock().unwrap().record_promotion(promoted);
        log::trace!("Young collection promoted {} bytes", promoted);
    }
}
