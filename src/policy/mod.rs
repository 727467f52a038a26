//! Memory policies that can be used for spaces.
//!
//! The old generation has a single policy: a non-moving space managed with segregated free
//! lists.

pub mod cms_space;
