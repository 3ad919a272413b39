//! Stream position arithmetic.
//!
//! A stream position is a linear byte count since the start of the stream.
//! It decomposes into a term id and a term offset:
//!
//! ```text
//! position = ((term_id - initial_term_id) as i64) << position_bits_to_shift) + term_offset
//! ```
//!
//! `term_id - initial_term_id` is computed with 32-bit wrapping arithmetic, so
//! term ids may wrap through `i32::MIN` while the position keeps growing. The
//! term count is only meaningful in `0..2^31`, which bounds the position space
//! at `term_length << 31`.
//!
//! A raw tail counter packs the same pair into one 64-bit word:
//!
//! ```text
//! [ term_id (32 bits) | term_offset (32 bits) ]
//!      bits 32-63          bits 0-31
//! ```

use crate::error::{Error, Result};

/// Minimum supported term length (64 KiB).
pub const TERM_MIN_LENGTH: i32 = 64 * 1024;

/// Maximum supported term length (1 GiB).
pub const TERM_MAX_LENGTH: i32 = 1024 * 1024 * 1024;

const TERM_OFFSET_MASK: i64 = 0xFFFF_FFFF;

/// Validates a term length.
pub fn check_term_length(term_length: i64) -> Result<()> {
    if term_length < TERM_MIN_LENGTH as i64 {
        return Err(Error::InvalidTermLength {
            term_length,
            reason: "less than 64 KiB",
        });
    }
    if term_length > TERM_MAX_LENGTH as i64 {
        return Err(Error::InvalidTermLength {
            term_length,
            reason: "greater than 1 GiB",
        });
    }
    if !(term_length as u64).is_power_of_two() {
        return Err(Error::InvalidTermLength {
            term_length,
            reason: "not a power of two",
        });
    }
    Ok(())
}

/// Number of bits a term count is shifted by to form a position.
///
/// Computed once per publication from the term length.
pub fn position_bits_to_shift(term_length: i32) -> Result<i32> {
    check_term_length(term_length as i64)?;
    Ok(term_length.trailing_zeros() as i32)
}

/// Position of `term_offset` within `active_term_id`.
#[inline(always)]
pub fn compute_position(
    active_term_id: i32,
    term_offset: i32,
    position_bits_to_shift: i32,
    initial_term_id: i32,
) -> i64 {
    compute_term_begin_position(active_term_id, position_bits_to_shift, initial_term_id)
        + term_offset as i64
}

/// Position at which `active_term_id` begins.
#[inline(always)]
pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: i32,
    initial_term_id: i32,
) -> i64 {
    let term_count = active_term_id.wrapping_sub(initial_term_id) as i64;
    term_count << position_bits_to_shift
}

/// Term id that contains `position`.
#[inline(always)]
pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: i32,
    initial_term_id: i32,
) -> i32 {
    ((position >> position_bits_to_shift) as i32).wrapping_add(initial_term_id)
}

/// Offset of `position` within its term.
#[inline(always)]
pub fn compute_term_offset_from_position(position: i64, position_bits_to_shift: i32) -> i32 {
    let mask = (1i64 << position_bits_to_shift) - 1;
    (position & mask) as i32
}

/// Packs a term id and term offset into a raw tail value.
#[inline(always)]
pub fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as i64 & TERM_OFFSET_MASK)
}

/// Term id held in a raw tail.
#[inline(always)]
pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Term offset held in a raw tail, without clamping.
///
/// May exceed the term length after a reservation overran the end of the term.
#[inline(always)]
pub fn raw_term_offset(raw_tail: i64) -> i64 {
    raw_tail & TERM_OFFSET_MASK
}

/// Term offset held in a raw tail, clamped to `term_length`.
#[inline(always)]
pub fn term_offset(raw_tail: i64, term_length: i32) -> i32 {
    raw_term_offset(raw_tail).min(term_length as i64) as i32
}
