// Allow this for now.  The free list encoding reads clearer with explicit casts.
#![allow(clippy::unnecessary_cast)]

//! A concurrent mark-sweep (CMS) old generation.
//!
//! The old generation is a non-moving space managed with segregated free lists: indexed lists
//! for small chunks, a binary tree dictionary for large ones, and linear allocation blocks for
//! fast small allocation.  It is collected by a mostly concurrent mark-sweep collector.  Two
//! short pauses (the initial mark and the final remark) bracket a concurrent marking phase, and
//! the dead objects are swept back to the free lists while the mutators run.  A card table
//! written by the mutators' post write barrier, and a mod union table that keeps the cards the
//! young generation cleans, record the stores the concurrent marker might have missed.
//!
//! A runtime uses this crate by
//! * implementing [`vm::VMBinding`] and the traits it names,
//! * creating an instance with [`memory_manager::cms_init`], and
//! * using the functions in [`memory_manager`] to allocate, store references, promote objects
//!   from its young generation and request collections.
//!
//! The background collector thread starts cycles when the old generation fills up (see
//! [`util::options::Options`] for the triggers).  A collection requested by a mutator, or an
//! allocation that cannot be satisfied, runs in the foreground and takes over any concurrent
//! cycle in progress.

extern crate static_assertions;
#[cfg(any(test, feature = "mock_test"))]
#[macro_use]
extern crate lazy_static;

pub mod barriers;
mod cms;
pub use cms::{CMSBuilder, CMS};
pub mod collector;
pub mod memory_manager;
pub mod policy;
pub mod scheduler;
pub mod util;
pub mod vm;
