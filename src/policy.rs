//! The zero-pointer-avoidance policy: how the canonicalizer disambiguates
//! an empty/trimmed struct pointer that would otherwise encode as a
//! literal zero word, which is reserved for Null.

/// Selected once per process and applied uniformly to every pointer the
/// canonicalizer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroPointerPolicy {
    /// Always encode a zero-size struct pointer with offset -1
    /// (`SPECIAL_POINTER`), regardless of where its (zero-length) payload
    /// would naturally land. This is the default.
    AlwaysMinusOne,

    /// Use offset -1 only when the naively computed pointer word would be
    /// exactly zero *and* the payload happens to immediately follow the
    /// slot. When the trimmed struct's natural position is elsewhere, its
    /// true (nonzero) offset is encoded instead.
    WhenAdjacent,
}

impl Default for ZeroPointerPolicy {
    fn default() -> ZeroPointerPolicy {
        ZeroPointerPolicy::AlwaysMinusOne
    }
}
