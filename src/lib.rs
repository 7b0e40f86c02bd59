//! Reads messages in Cap'n Proto's segment-oriented binary wire format and
//! re-emits each one in its canonical form: a single-segment encoding in
//! which every value is laid out in a fixed pre-order traversal, trimmed to
//! its minimum meaningful size, with no padding and no freedom of
//! representation. Two semantically equal messages produce byte-identical
//! canonical output, which is what makes the format suitable for hashing,
//! signing, and equality testing.
//!
//! Three layers, leaves first:
//!
//! - [`framing`] decodes and encodes the segment table that prefixes a raw
//!   message on the wire, and iterates messages on a byte stream.
//! - [`reader`] is a cursor over the decoded segments that follows
//!   pointers — struct, list, far, double-far, capability — into typed
//!   views, without ever interpreting a schema.
//! - [`canonicalize`] walks a typed view and its descendants into a single
//!   growing output segment, allocating space for each child before
//!   descending into it so every emitted pointer is forward, intra-segment,
//!   and offset-minimal.
//!
//! This crate is schema-blind by design: it operates purely on the
//! pointer/word structure of a message and has no notion of field names or
//! declared types. Schema validation, the packed transport encoding, RPC
//! and capability resolution, and partial/streaming canonicalization of a
//! single message are all out of scope.

pub mod canonicalize;
pub mod error;
pub mod framing;
pub mod policy;
pub mod reader;
pub mod segment;
pub mod word;

use std::io::{Read, Write};

pub use crate::error::{Error, Result};
pub use crate::policy::ZeroPointerPolicy;

/// Reads messages from `read` one at a time, canonicalizes each under
/// `policy`, and writes the canonical, framed result to `write`.
///
/// Stops cleanly when `read` is exhausted at a message boundary. Any
/// framing, pointer, or I/O error aborts processing immediately; a caller
/// that wants to resynchronize at the next message boundary instead should
/// call [`framing::read_message`] and [`canonicalize::canonicalize`]
/// directly.
pub fn canonicalize_stream<R: Read, W: Write>(
    read: &mut R,
    write: &mut W,
    policy: ZeroPointerPolicy,
) -> Result<()> {
    let mut messages = 0u64;
    while let Some(segments) = framing::read_message(read)? {
        let canonical = canonicalize::canonicalize(&segments, policy)?;
        framing::write_message(write, &[canonical])?;
        messages += 1;
    }
    log::debug!("canonicalized {} message(s)", messages);
    Ok(())
}
