//! The traits a runtime implements to use the old generation.
//!
//! The runtime implements [`VMBinding`] on a type of its own and names its implementations of
//! [`Scanning`] and [`Collection`] there.  The collector never calls into the runtime in any
//! other way.

mod collection;
mod scanning;
mod vmbinding;

pub use self::collection::{Collection, GCThreadContext};
pub use self::scanning::{RootVisitor, Scanning};
pub use self::vmbinding::VMBinding;

#[cfg(test)]
mod tests;
