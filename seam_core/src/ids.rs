//! Stable handles for registered methods.

use std::fmt;

/// A stable handle to a method registered with the engine's method table.
///
/// Ids are assigned once at registration time and never reused within a
/// process. The entry point behind an id can be re-targeted by the detour
/// installer; the id itself stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct MethodId(pub u64);

impl MethodId {
    /// Create a handle from a raw id.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        MethodId(raw)
    }

    /// Get the raw id value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m#{}", self.0)
    }
}
