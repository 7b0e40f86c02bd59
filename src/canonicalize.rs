//! The canonicalizer: each typed view knows how to emit itself plus all of
//! its descendants into a single growing output segment.

use log::warn;

use crate::error::{Error, Result};
use crate::policy::ZeroPointerPolicy;
use crate::reader::{follow_pointer, Cursor, View};
use crate::segment::Segments;
use crate::word::{pack, PRIMITIVE_BIT_SIZES, SPECIAL_POINTER, Word};
use crate::writer::OutputSegment;

/// Bounds the struct/list tree recursion depth. A legitimate message tree
/// is never anywhere near this deep; a cyclic or adversarially deep input
/// is rejected as malformed rather than overflowing the call stack.
const MAX_EMIT_DEPTH: u32 = 256;

/// Canonicalizes one message, returning the single output segment's words.
///
/// The caller is responsible for framing the result (`crate::framing`).
pub fn canonicalize(segments: &Segments, policy: ZeroPointerPolicy) -> Result<Vec<Word>> {
    let root_view = follow_pointer(Cursor::root(segments))?;
    let mut out = OutputSegment::new();
    emit_pointer(&root_view, &mut out, 0, 0, policy)?;
    Ok(out.into_words())
}

fn emit_pointer(
    view: &View,
    out: &mut OutputSegment,
    slot: usize,
    depth: u32,
    policy: ZeroPointerPolicy,
) -> Result<()> {
    if depth > MAX_EMIT_DEPTH {
        warn!("message tree exceeds maximum recursion depth ({}); likely cyclic", depth);
        return Err(Error::MalformedPointer(
            "message tree exceeds maximum recursion depth; likely cyclic".to_string(),
        ));
    }

    match view {
        // The pointer slot was already zero-initialized by `append`/`new`;
        // leaving it untouched is exactly the Null encoding.
        View::Null => Ok(()),
        View::Struct {
            cursor,
            data_len,
            pointer_len,
        } => emit_struct(*cursor, *data_len, *pointer_len, out, slot, depth, policy),
        View::StructList {
            cursor,
            data_len,
            pointer_len,
            size,
        } => emit_struct_list(
            *cursor,
            *data_len,
            *pointer_len,
            *size,
            out,
            slot,
            depth,
            policy,
        ),
        View::IntList {
            cursor,
            element_kind,
            size,
        } => emit_int_list(*cursor, *element_kind, *size, out, slot, policy),
        View::PointerList { cursor, size } => {
            emit_pointer_list(*cursor, *size, out, slot, depth, policy)
        }
        View::Capability { index } => emit_capability(*index, out, slot),
    }
}

/// Encodes a non-far pointer word given the type/descriptor bits (with
/// the offset field left at zero) and the slot/payload positions,
/// applying the zero-pointer-avoidance policy.
///
/// Only a Struct pointer (type tag `00`) can ever naively encode to
/// exactly zero: List pointers always have their type tag bit set (`01`),
/// so `descriptor` is never zero for them and this function is a
/// transparent offset-encoder in that case.
fn encode_pointer_word(
    descriptor: Word,
    slot: usize,
    payload: usize,
    policy: ZeroPointerPolicy,
) -> Word {
    let adjacent = payload == slot + 1;
    if descriptor == 0 {
        let use_special = match policy {
            ZeroPointerPolicy::AlwaysMinusOne => true,
            ZeroPointerPolicy::WhenAdjacent => adjacent,
        };
        if use_special {
            return SPECIAL_POINTER;
        }
    }
    let relative = payload as i64 - slot as i64 - 1;
    debug_assert!(relative >= -1, "pointer offset underflows the 30-bit field");
    let offset_bits = ((relative as i64) & 0x3FFF_FFFF) as u64;
    descriptor | pack(offset_bits, 2)
}

fn emit_struct(
    cursor: Cursor,
    data_len: u32,
    pointer_len: u32,
    out: &mut OutputSegment,
    slot: usize,
    depth: u32,
    policy: ZeroPointerPolicy,
) -> Result<()> {
    let data_len = data_len as usize;
    let pointer_len = pointer_len as usize;

    let mut data_words = Vec::with_capacity(data_len);
    for i in 0..data_len {
        data_words.push(cursor.relative(i as i64)?.word()?);
    }
    let trimmed_data_len = trimmed_len(&data_words, |w| *w != 0);

    let mut pointer_views = Vec::with_capacity(pointer_len);
    let mut pointer_is_null = Vec::with_capacity(pointer_len);
    for i in 0..pointer_len {
        let ptr_cursor = cursor.relative((data_len + i) as i64)?;
        let is_null = ptr_cursor.word()? == 0;
        pointer_is_null.push(is_null);
        pointer_views.push(ptr_cursor);
    }
    let trimmed_pointer_len = trimmed_len(&pointer_is_null, |is_null| !*is_null);

    let region = out.append(trimmed_data_len + trimmed_pointer_len);
    let descriptor = pack(trimmed_data_len as u64, 32) | pack(trimmed_pointer_len as u64, 48);
    out.set(slot, encode_pointer_word(descriptor, slot, region, policy));

    for (i, &word) in data_words.iter().enumerate().take(trimmed_data_len) {
        out.set(region + i, word);
    }

    for i in 0..trimmed_pointer_len {
        let view = follow_pointer(pointer_views[i])?;
        emit_pointer(
            &view,
            out,
            region + trimmed_data_len + i,
            depth + 1,
            policy,
        )?;
    }

    Ok(())
}

/// Returns `1 + index of the last element satisfying `keep`, or 0 if none
/// do — the "trimmed length" computation used for both struct data/pointer
/// widths.
fn trimmed_len<T>(items: &[T], keep: impl Fn(&T) -> bool) -> usize {
    items
        .iter()
        .enumerate()
        .rev()
        .find(|(_, item)| keep(item))
        .map(|(i, _)| i + 1)
        .unwrap_or(0)
}

#[allow(clippy::too_many_arguments)]
fn emit_struct_list(
    cursor: Cursor,
    member_data_len: u32,
    member_pointer_len: u32,
    size: u32,
    out: &mut OutputSegment,
    slot: usize,
    depth: u32,
    policy: ZeroPointerPolicy,
) -> Result<()> {
    let member_data_len = member_data_len as usize;
    let member_pointer_len = member_pointer_len as usize;
    let size = size as usize;
    let member_word_len = member_data_len + member_pointer_len;

    // First pass: read every member's raw data/pointer words and compute
    // the list-wide trimmed widths (the max across all members).
    let mut members: Vec<(Vec<Word>, Vec<(Cursor, bool)>)> = Vec::with_capacity(size);
    let mut data_len = 0usize;
    let mut pointer_len = 0usize;

    for m in 0..size {
        let member_cursor = cursor.relative((m * member_word_len) as i64)?;

        let mut data_words = Vec::with_capacity(member_data_len);
        for i in 0..member_data_len {
            data_words.push(member_cursor.relative(i as i64)?.word()?);
        }
        data_len = data_len.max(trimmed_len(&data_words, |w| *w != 0));

        let mut pointers = Vec::with_capacity(member_pointer_len);
        for i in 0..member_pointer_len {
            let ptr_cursor = member_cursor.relative((member_data_len + i) as i64)?;
            let is_null = ptr_cursor.word()? == 0;
            pointers.push((ptr_cursor, is_null));
        }
        pointer_len = pointer_len.max(trimmed_len(&pointers, |(_, is_null)| !*is_null));

        members.push((data_words, pointers));
    }

    let body_len = size * (data_len + pointer_len);
    let tag_pos = out.append(1 + body_len);
    let tag_word = if size == 0 {
        0
    } else {
        pack(size as u64, 2) | pack(data_len as u64, 32) | pack(pointer_len as u64, 48)
    };
    out.set(tag_pos, tag_word);

    let list_descriptor = 1 | pack(7, 32) | pack(body_len as u64, 35);
    out.set(
        slot,
        encode_pointer_word(list_descriptor, slot, tag_pos, policy),
    );

    let body_start = tag_pos + 1;
    for (m, (data_words, pointers)) in members.into_iter().enumerate() {
        let member_out_start = body_start + m * (data_len + pointer_len);
        for (i, &word) in data_words.iter().enumerate().take(data_len) {
            out.set(member_out_start + i, word);
        }
        for i in 0..pointer_len {
            let view = follow_pointer(pointers[i].0)?;
            emit_pointer(
                &view,
                out,
                member_out_start + data_len + i,
                depth + 1,
                policy,
            )?;
        }
    }

    Ok(())
}

fn emit_int_list(
    cursor: Cursor,
    element_kind: u8,
    size: u32,
    out: &mut OutputSegment,
    slot: usize,
    policy: ZeroPointerPolicy,
) -> Result<()> {
    let bit_size = size as u64 * PRIMITIVE_BIT_SIZES[element_kind as usize] as u64;
    let word_len = (bit_size / 64) as usize;
    let tail_bits = (bit_size % 64) as u32;

    let region = out.append(word_len + if tail_bits > 0 { 1 } else { 0 });
    for i in 0..word_len {
        out.set(region + i, cursor.relative(i as i64)?.word()?);
    }
    if tail_bits > 0 {
        let tail_word = cursor.relative(word_len as i64)?.word()?;
        let mask = (1u64 << tail_bits) - 1;
        out.set(region + word_len, tail_word & mask);
    }

    let descriptor = 1 | pack(element_kind as u64, 32) | pack(size as u64, 35);
    out.set(slot, encode_pointer_word(descriptor, slot, region, policy));
    Ok(())
}

fn emit_pointer_list(
    cursor: Cursor,
    size: u32,
    out: &mut OutputSegment,
    slot: usize,
    depth: u32,
    policy: ZeroPointerPolicy,
) -> Result<()> {
    let size = size as usize;
    let region = out.append(size);
    let descriptor = 1 | pack(6, 32) | pack(size as u64, 35);
    out.set(slot, encode_pointer_word(descriptor, slot, region, policy));

    for i in 0..size {
        let ptr_cursor = cursor.relative(i as i64)?;
        let view = follow_pointer(ptr_cursor)?;
        emit_pointer(&view, out, region + i, depth + 1, policy)?;
    }
    Ok(())
}

fn emit_capability(index: u32, out: &mut OutputSegment, slot: usize) -> Result<()> {
    out.set(slot, 3 | pack(index as u64, 32));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::segment::Segments;

    fn canon(segments: Vec<Vec<Word>>) -> Vec<Word> {
        let segs = Segments::new(segments);
        canonicalize(&segs, ZeroPointerPolicy::AlwaysMinusOne).unwrap()
    }

    #[test]
    fn null_root_stays_null() {
        assert_eq!(canon(vec![vec![0]]), vec![0]);
    }

    #[test]
    fn trims_trailing_zero_data_and_null_pointer_words() {
        // Struct pointer: data_len=3, pointer_len=1; last two data words
        // are zero and the pointer is null, so canonical form trims to
        // data_len=1, pointer_len=0.
        let ptr: Word = (3u64 << 32) | (1u64 << 48);
        let root = vec![ptr, 7, 0, 0, 0];
        let out = canon(vec![root]);
        assert_eq!(out.len(), 2); // slot + 1 trimmed data word
        assert_eq!(out[1], 7);
        // D'=1, P'=0, offset=0
        assert_eq!(out[0], 1u64 << 32);
    }

    #[test]
    fn zero_size_struct_uses_special_pointer_under_policy_a() {
        // A pointer-list of one element whose element is a *real* (non-null
        // input pointer) struct with data_len=1 whose single data word is
        // zero: it decodes as Struct, not Null, but trims to D'=P'=0.
        let list_ptr: Word = 1 | (6u64 << 32) | (1u64 << 35);
        let struct_ptr: Word = 1u64 << 32; // D=1, P=0, offset=0
        let segs = Segments::new(vec![vec![list_ptr, struct_ptr, 0]]);
        let out = canonicalize(&segs, ZeroPointerPolicy::AlwaysMinusOne).unwrap();
        // out[0] = pointer list slot, out[1] = the one element slot.
        assert_eq!(out[1], SPECIAL_POINTER);
    }

    #[test]
    fn policy_b_keeps_natural_offset_when_not_adjacent() {
        // Root pointer-list of size 2: element 0 is a non-empty struct
        // (data_len=1, value 99) whose payload sits after both elements;
        // element 1 is a struct that trims to empty, whose natural
        // (non-adjacent) position is right after element 0's payload.
        let list_ptr: Word = 1 | (6u64 << 32) | (2u64 << 35);
        let ptr0: Word = (1u64 << 2) | (1u64 << 32); // offset=1, data_len=1
        let ptr1: Word = (1u64 << 2) | (1u64 << 32); // offset=1, data_len=1
        let segs = Segments::new(vec![vec![list_ptr, ptr0, ptr1, 99, 0]]);
        let out = canonicalize(&segs, ZeroPointerPolicy::WhenAdjacent).unwrap();
        // out layout: [list_descriptor, struct0_ptr, struct1_ptr, 99]
        // struct1 trims to D'=P'=0 but its natural position (end of
        // output) is not adjacent to its own slot, so Policy B leaves the
        // honest (nonzero) offset rather than forcing SPECIAL_POINTER.
        assert_ne!(out[2], SPECIAL_POINTER);
        assert_ne!(out[2], 0);
    }

    #[test]
    fn int_list_masks_tail_bits() {
        // 1-bit list of length 3; upper 61 bits of the source word are
        // garbage and must not survive canonicalization.
        let list_ptr: Word = 1 | (1u64 << 32) | (3u64 << 35);
        let garbage: Word = 0b111 | (0xDEAD_BEEFu64 << 8);
        let segs = Segments::new(vec![vec![list_ptr, garbage]]);
        let out = canonicalize(&segs, ZeroPointerPolicy::AlwaysMinusOne).unwrap();
        assert_eq!(out[1], 0b111);
    }

    #[test]
    fn capability_pointer_round_trips() {
        let word: Word = 3 | (7u64 << 32);
        let segs = Segments::new(vec![vec![word]]);
        let out = canonicalize(&segs, ZeroPointerPolicy::AlwaysMinusOne).unwrap();
        assert_eq!(out, vec![0x0000_0007_0000_0003]);
    }

    #[test]
    fn struct_list_trims_to_list_wide_maximum_width() {
        // Two members, member layout D=2,P=0. Member 0 has both data
        // words nonzero; member 1 has only its first word nonzero. The
        // list-wide trim should keep D'=2 (driven by member 0), not the
        // per-member minimum.
        let list_ptr: Word = 1 | (7u64 << 32) | (4u64 << 35); // size = 2*(2+0)
        let tag: Word = (2u64 << 2) | (2u64 << 32);
        let segs = Segments::new(vec![vec![list_ptr, tag, 1, 2, 3, 0]]);
        let out = canonicalize(&segs, ZeroPointerPolicy::AlwaysMinusOne).unwrap();
        // out: [slot, tag, m0d0, m0d1, m1d0, m1d1]
        assert_eq!(out.len(), 6);
        assert_eq!(out[2], 1);
        assert_eq!(out[3], 2);
        assert_eq!(out[4], 3);
        assert_eq!(out[5], 0);
    }

    #[test]
    fn idempotence_on_nested_message() {
        // Pointer list of 2: element 0 is a struct (D=1, P=1, its one
        // pointer field left Null) whose payload sits past both list
        // elements; element 1 is Null.
        let list_ptr: Word = 1 | (6u64 << 32) | (2u64 << 35);
        let s0: Word = (1u64 << 2) | (1u64 << 32) | (1u64 << 48); // offset=1, D=1, P=1
        let s1: Word = 0;
        let segs = Segments::new(vec![vec![list_ptr, s0, s1, 5, 0]]);
        let once = canonicalize(&segs, ZeroPointerPolicy::AlwaysMinusOne).unwrap();
        let twice_segs = Segments::new(vec![once.clone()]);
        let twice = canonicalize(&twice_segs, ZeroPointerPolicy::AlwaysMinusOne).unwrap();
        assert_eq!(once, twice);
    }
}
