//! Logging for the collector.
//!
//! `error!`, `warn!` and `info!` are the macros of the `log` crate.  `debug!` and `trace!` are
//! wrappers that compile to nothing in release builds unless the "hot_log" Cargo feature is on:
//! the free list and marking paths log at those levels on every chunk and card, which release
//! builds cannot afford.  Write `log::debug!` after `use crate::util::log;` as if it were the
//! `log` crate.

// The `log` crate is renamed to `the_log_crate` in `Cargo.toml`, so an IDE cannot import its
// `debug!` in place of ours.
pub(crate) use the_log_crate::{error, info, warn};

/// Whether `debug!` and `trace!` do anything.  Always in debug builds.
pub(crate) const HOT_LOG_ENABLED: bool = cfg!(any(debug_assertions, feature = "hot_log"));

/// `debug!` of the `log` crate, if [`HOT_LOG_ENABLED`].
macro_rules! debug {
    ($($arg:tt)+) => {
        if $crate::util::log::HOT_LOG_ENABLED {
            the_log_crate::debug!($($arg)+)
        }
    }
}

/// `trace!` of the `log` crate, if [`HOT_LOG_ENABLED`].
macro_rules! trace {
    ($($arg:tt)+) => {
        if $crate::util::log::HOT_LOG_ENABLED {
            the_log_crate::trace!($($arg)+)
        }
    }
}

// Macros have no path-based scope by default.  These make `crate::util::log::debug` work.
pub(crate) use debug;
pub(crate) use trace;
