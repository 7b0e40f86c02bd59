//! The immutable, multi-segment word storage backing an input message.

use log::warn;

use crate::error::{Error, Result};
use crate::word::Word;

/// An ordered collection of segments decoded from the wire. Indexed from 0;
/// read-only for the lifetime of a canonicalization pass.
#[derive(Debug, Clone)]
pub struct Segments {
    segments: Vec<Vec<Word>>,
}

impl Segments {
    pub fn new(segments: Vec<Vec<Word>>) -> Segments {
        Segments { segments }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment_len(&self, segment: usize) -> Result<usize> {
        self.segments
            .get(segment)
            .map(|s| s.len())
            .ok_or_else(|| Error::MalformedPointer(format!("no such segment {}", segment)))
    }

    /// Reads the word at `(segment, offset)`, failing if either index is
    /// out of bounds.
    pub fn word_at(&self, segment: usize, offset: usize) -> Result<Word> {
        let seg = self.segments.get(segment).ok_or_else(|| {
            warn!("pointer targets non-existent segment {}", segment);
            Error::MalformedPointer(format!("pointer targets non-existent segment {}", segment))
        })?;
        seg.get(offset).copied().ok_or_else(|| {
            warn!(
                "pointer targets out-of-bounds offset {} in segment {} (len {})",
                offset,
                segment,
                seg.len()
            );
            Error::MalformedPointer(format!(
                "pointer targets out-of-bounds offset {} in segment {} (len {})",
                offset,
                segment,
                seg.len()
            ))
        })
    }
}
