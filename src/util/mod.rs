//! Utilities used by the rest of the crate: addresses, constants, bit maps, tables and options.

/// Address and object reference types.
pub mod address;
/// Exponentially decaying averages for census and pacing estimates.
pub mod averages;
/// The mark bit map.
pub mod bitmap;
/// The card table shared with the young generation's write barrier.
pub mod card_table;
/// Constants used in the crate.
pub mod constants;
/// Calculation, conversion and rounding for memory related numbers.
pub mod conversions;
/// Wrapper functions for logging.
pub(crate) mod log;
/// Logger initialization.
pub mod logger;
/// The mod union table.
pub mod mod_union_table;
/// Runtime options.
pub mod options;
/// Test utilities.  `MockVM` is also compiled with the `mock_test` feature outside `cfg(test)`.
#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
