//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.
pub type Id = internment::Intern<String>;

/// The entry-point symbol.  The serializer prints this function first and the
/// code generator gives it an exit syscall instead of `jr $ra`.
pub fn main_id() -> Id {
    Id::from_ref("main")
}
