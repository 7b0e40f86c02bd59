//! Error types returned by the framing codec, reader, and canonicalizer.

use std::io;

/// The three fatal error kinds a message can produce, per the framing,
/// pointer-decoding, and I/O layers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The segment table is inconsistent with the buffer length, a read
    /// stopped in the middle of a header or segment, or a segment count
    /// or length is out of bounds.
    #[error("framing error: {0}")]
    Framing(String),

    /// A pointer word violates the bit-layout rules: reserved bits set
    /// where they must be zero, a composite tag whose size disagrees with
    /// the list pointer's reported size, a double-far landing pad whose
    /// second word is itself a far pointer, a capability pointer with a
    /// non-zero reserved field, or recursion beyond the bound meant to
    /// catch cyclic references.
    #[error("malformed pointer: {0}")]
    MalformedPointer(String),

    /// The underlying byte stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
