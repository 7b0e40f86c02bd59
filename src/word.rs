//! The atomic unit of a Cap'n Proto message: a 64-bit little-endian word,
//! plus the bit-field helpers used to decode and encode pointer words.

/// A single 64-bit word. Segments are sequences of these; on the wire they
/// are little-endian, but once loaded into memory we operate on the native
/// `u64` value directly.
pub type Word = u64;

/// The distinguished non-null pointer encoding used to avoid emitting a
/// pointer word that collides with the all-zeros Null pattern: a type-0
/// (struct) pointer with `offset = -1` and `data_len = pointer_len = 0`.
pub const SPECIAL_POINTER: Word = (1 << 32) - 4;

/// Bit widths, in bits, of the six primitive list element kinds.
/// Index 6 (pointer list) and 7 (composite list) are not primitive element
/// sizes and are handled separately by the reader.
pub const PRIMITIVE_BIT_SIZES: [u32; 6] = [0, 1, 8, 16, 32, 64];

/// Extracts bits `[first, last]` (inclusive, zero-indexed from the LSB) of
/// `word` and returns them right-aligned.
#[inline]
pub fn bits(word: Word, first: u32, last: u32) -> u64 {
    debug_assert!(first <= last && last < 64);
    let width = last - first + 1;
    let mask = if width == 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    };
    (word >> first) & mask
}

/// Interprets bits `[first, last]` of `word` as a two's-complement signed
/// integer of that width, sign-extended to `i64`.
#[inline]
pub fn bits_signed(word: Word, first: u32, last: u32) -> i64 {
    let width = last - first + 1;
    let raw = bits(word, first, last);
    let sign_bit = 1u64 << (width - 1);
    if raw & sign_bit != 0 {
        (raw as i64) - ((1i64) << width)
    } else {
        raw as i64
    }
}

/// Packs `value` (already masked to its field width by the caller) into a
/// word starting at bit `first` — the write-side inverse of `bits`.
#[inline]
pub fn pack(value: u64, first: u32) -> Word {
    value << first
}
