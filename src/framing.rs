//! The wire framing that prefixes every message: a segment table followed
//! by the segments' words.
//!
//! ```text
//! uint32        segment_count - 1
//! uint32[..]    segment lengths, in words
//! uint32        zero padding, present iff the header word count is odd
//! uint64[..]    each segment's words, concatenated
//! ```

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::segment::Segments;
use crate::word::Word;

/// Segment counts above this are rejected as framing errors. Cap'n Proto
/// itself has no hard limit here, but an unbounded count read from an
/// untrusted stream is an easy way to force a huge allocation.
const MAX_SEGMENTS: u32 = 512;

/// Returns the byte length of a segment table (count word + lengths +
/// optional padding) for a message with `segment_count` segments.
pub fn segment_table_len(segment_count: usize) -> usize {
    segment_count * 4 + if segment_count % 2 == 0 { 8 } else { 4 }
}

/// Reads one message's segment table and segments from `read`.
///
/// Returns `Ok(None)` when `read` is exhausted exactly at a message
/// boundary (the clean end-of-stream case). Any other short read — a
/// partial header or a segment cut off mid-word — is a framing error.
pub fn read_message<R: Read>(read: &mut R) -> Result<Option<Segments>> {
    let mut count_buf = [0u8; 4];
    let n = read_fill(read, &mut count_buf)?;
    if n == 0 {
        return Ok(None);
    }
    if n != 4 {
        return Err(Error::Framing(format!(
            "short read of segment count: got {} of 4 bytes",
            n
        )));
    }

    let segment_count = (LittleEndian::read_u32(&count_buf) as u64 + 1) as u32;
    if segment_count == 0 || segment_count > MAX_SEGMENTS {
        return Err(Error::Framing(format!(
            "invalid segment count: {}",
            segment_count
        )));
    }

    let mut lengths = Vec::with_capacity(segment_count as usize);
    for _ in 0..segment_count {
        lengths.push(read
            .read_u32::<LittleEndian>()
            .map_err(|e| short_read_to_framing_error(e, "segment length"))?);
    }

    if segment_count % 2 == 0 {
        // Header word count (1 + segment_count) is odd; consume the padding
        // word so the 64-bit segment data starts word-aligned.
        let _ = read
            .read_u32::<LittleEndian>()
            .map_err(|e| short_read_to_framing_error(e, "header padding"))?;
    }

    let mut segments = Vec::with_capacity(lengths.len());
    for len in lengths {
        let mut words = Vec::with_capacity(len as usize);
        for _ in 0..len {
            words.push(
                read.read_u64::<LittleEndian>()
                    .map_err(|e| short_read_to_framing_error(e, "segment word"))?,
            );
        }
        segments.push(words);
    }

    debug!(
        "read message: {} segment(s), {} total words",
        segments.len(),
        segments.iter().map(Vec::len).sum::<usize>()
    );

    Ok(Some(Segments::new(segments)))
}

fn short_read_to_framing_error(e: std::io::Error, what: &str) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        warn!("short read mid-message while reading {}", what);
        Error::Framing(format!("short read while reading {}", what))
    } else {
        Error::Io(e)
    }
}

/// Fills `buf` completely or returns the number of bytes actually read if
/// the stream ended before `buf` was full (0 meaning a clean boundary).
fn read_fill<R: Read>(read: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match read.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(total)
}

/// Decodes a single message occupying the entirety of `buf`, failing if any
/// bytes are left over or the header claims more data than is present.
pub fn decode_message(buf: &[u8]) -> Result<Segments> {
    let mut cursor = buf;
    let segments = read_message(&mut cursor)?.ok_or_else(|| {
        Error::Framing("buffer did not contain a complete message".to_string())
    })?;
    let consumed = buf.len() - cursor.len();
    if consumed != buf.len() {
        return Err(Error::Framing(format!(
            "{} trailing bytes after message",
            buf.len() - consumed
        )));
    }
    Ok(segments)
}

/// Writes a message's segment table and segment words to `write`.
///
/// `segments` must contain at least one segment (the canonical output
/// always does: a single, possibly-empty, segment).
pub fn write_message<W: Write>(write: &mut W, segments: &[Vec<Word>]) -> Result<()> {
    assert!(!segments.is_empty(), "a message must have at least one segment");

    write.write_u32::<LittleEndian>(segments.len() as u32 - 1)?;
    for segment in segments {
        write.write_u32::<LittleEndian>(segment.len() as u32)?;
    }
    if segments.len() % 2 == 0 {
        write.write_u32::<LittleEndian>(0)?;
    }
    for segment in segments {
        for &word in segment {
            write.write_u64::<LittleEndian>(word)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn segment_table_len_matches_expected_sizes() {
        assert_eq!(8, segment_table_len(1));
        assert_eq!(16, segment_table_len(2));
        assert_eq!(16, segment_table_len(3));
        assert_eq!(24, segment_table_len(4));
    }

    #[test]
    fn round_trips_single_empty_segment() {
        let segments: Vec<Vec<Word>> = vec![vec![0]];
        let mut buf = Vec::new();
        write_message(&mut buf, &segments).unwrap();
        assert_eq!(
            buf,
            vec![0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        let decoded = decode_message(&buf).unwrap();
        assert_eq!(decoded.segment_count(), 1);
        assert_eq!(decoded.word_at(0, 0).unwrap(), 0);
    }

    #[test]
    fn round_trips_multiple_segments() {
        let segments: Vec<Vec<Word>> = vec![vec![1, 2], vec![3], vec![4, 5, 6]];
        let mut buf = Vec::new();
        write_message(&mut buf, &segments).unwrap();
        let decoded = decode_message(&buf).unwrap();
        assert_eq!(decoded.segment_count(), 3);
        assert_eq!(decoded.word_at(0, 1).unwrap(), 2);
        assert_eq!(decoded.word_at(2, 2).unwrap(), 6);
    }

    #[test]
    fn clean_eof_at_message_boundary_yields_none() {
        let mut cursor: &[u8] = &[];
        assert!(read_message(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn short_read_mid_header_is_a_framing_error() {
        // Claims 2 segments but only one length follows.
        let buf = [1, 0, 0, 0, 5, 0, 0, 0];
        let mut cursor: &[u8] = &buf;
        assert!(matches!(read_message(&mut cursor), Err(Error::Framing(_))));
    }

    #[test]
    fn oversized_segment_count_is_rejected() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut cursor: &[u8] = &buf;
        assert!(matches!(read_message(&mut cursor), Err(Error::Framing(_))));
    }

    #[test]
    fn trailing_bytes_after_message_is_an_error() {
        let segments: Vec<Vec<Word>> = vec![vec![0]];
        let mut buf = Vec::new();
        write_message(&mut buf, &segments).unwrap();
        buf.push(0xFF);
        assert!(decode_message(&buf).is_err());
    }

    #[test]
    fn iterates_two_messages_on_one_stream() {
        let mut buf = Vec::new();
        write_message(&mut buf, &[vec![1]]).unwrap();
        write_message(&mut buf, &[vec![2, 3]]).unwrap();

        let mut cursor: &[u8] = &buf;
        let first = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(first.word_at(0, 0).unwrap(), 1);
        let second = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(second.word_at(0, 1).unwrap(), 3);
        assert!(read_message(&mut cursor).unwrap().is_none());
    }
}
