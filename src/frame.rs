//! Data frame layout and the header writer.
//!
//! Every message in a term is one or more frames, each starting on a
//! [`FRAME_ALIGNMENT`] boundary with a fixed 32-byte little-endian header:
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +---------------------------------------------------------------+
//! |                         Frame Length                          |  0
//! +---------------+---------------+-------------------------------+
//! |    Version    |     Flags     |             Type              |  4
//! +---------------+---------------+-------------------------------+
//! |                          Term Offset                          |  8
//! +---------------------------------------------------------------+
//! |                          Session ID                           | 12
//! +---------------------------------------------------------------+
//! |                           Stream ID                           | 16
//! +---------------------------------------------------------------+
//! |                            Term ID                            | 20
//! +---------------------------------------------------------------+
//! |                        Reserved Value                         | 24
//! |                                                               |
//! +---------------------------------------------------------------+
//! ```
//!
//! The frame length is the visibility flag. It is written negative together
//! with version/flags/type when the header is stamped, and replaced by the
//! positive length with a release store once the frame is complete. Readers
//! treat anything `<= 0` as not yet available.

use crate::atomic_buffer::AtomicBuffer;

pub const HEADER_LENGTH: i32 = 32;
pub const FRAME_ALIGNMENT: i32 = 32;

pub const FRAME_LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const TERM_OFFSET_OFFSET: usize = 8;
pub const SESSION_ID_OFFSET: usize = 12;
pub const STREAM_ID_OFFSET: usize = 16;
pub const TERM_ID_OFFSET: usize = 20;
pub const RESERVED_VALUE_OFFSET: usize = 24;

pub const CURRENT_VERSION: u8 = 0;

pub const BEGIN_FRAG_FLAG: u8 = 0b1000_0000;
pub const END_FRAG_FLAG: u8 = 0b0100_0000;
pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;

pub const HDR_TYPE_PAD: u16 = 0x00;
pub const HDR_TYPE_DATA: u16 = 0x01;

/// Upper bound on a single message regardless of term length (16 MiB).
pub const MAX_MESSAGE_LENGTH: i32 = 16 * 1024 * 1024;

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
#[inline(always)]
pub const fn align(value: i32, alignment: i32) -> i32 {
    (value + (alignment - 1)) & !(alignment - 1)
}

/// Largest message a publication on a term of `term_length` accepts.
pub const fn compute_max_message_length(term_length: i32) -> i32 {
    let cap = term_length / 8;
    if cap < MAX_MESSAGE_LENGTH {
        cap
    } else {
        MAX_MESSAGE_LENGTH
    }
}

/// Bytes a message of `length` occupies in the term once fragmented into
/// frames carrying at most `max_payload_length` bytes each.
///
/// All fragments but the last are full (`max_payload_length + HEADER_LENGTH`,
/// already aligned because the MTU is); the last is aligned on its own.
#[inline(always)]
pub const fn compute_fragmented_frame_length(length: i32, max_payload_length: i32) -> i32 {
    let num_max_payloads = length / max_payload_length;
    let remaining_payload = length % max_payload_length;
    let last_frame_length = if remaining_payload > 0 {
        align(remaining_payload + HEADER_LENGTH, FRAME_ALIGNMENT)
    } else {
        0
    };

    num_max_payloads * (max_payload_length + HEADER_LENGTH) + last_frame_length
}

/// Publishes the frame length with release semantics, making the frame
/// visible.
#[inline(always)]
pub fn frame_length_ordered(buffer: &AtomicBuffer, frame_offset: usize, frame_length: i32) {
    buffer.put_i32_ordered(frame_offset + FRAME_LENGTH_OFFSET, frame_length);
}

#[inline(always)]
pub fn frame_length_volatile(buffer: &AtomicBuffer, frame_offset: usize) -> i32 {
    buffer.get_i32_volatile(frame_offset + FRAME_LENGTH_OFFSET)
}

#[inline(always)]
pub fn frame_type(buffer: &AtomicBuffer, frame_offset: usize, frame_type: u16) {
    buffer.put_u16(frame_offset + TYPE_OFFSET, frame_type);
}

#[inline(always)]
pub fn frame_flags(buffer: &AtomicBuffer, frame_offset: usize, flags: u8) {
    buffer.put_u8(frame_offset + FLAGS_OFFSET, flags);
}

#[inline(always)]
pub fn frame_reserved_value(buffer: &AtomicBuffer, frame_offset: usize, value: i64) {
    buffer.put_i64(frame_offset + RESERVED_VALUE_OFFSET, value);
}

/// Fills `buffer[..HEADER_LENGTH]` with the default data header for a stream.
///
/// This is the template the driver stores in log metadata and from which
/// every [`HeaderWriter`] is built.
pub fn write_default_header(buffer: &AtomicBuffer, session_id: i32, stream_id: i32) {
    buffer.set_memory(0, HEADER_LENGTH as usize, 0);
    buffer.put_u8(VERSION_OFFSET, CURRENT_VERSION);
    buffer.put_u8(FLAGS_OFFSET, UNFRAGMENTED);
    buffer.put_u16(TYPE_OFFSET, HDR_TYPE_DATA);
    buffer.put_i32(SESSION_ID_OFFSET, session_id);
    buffer.put_i32(STREAM_ID_OFFSET, stream_id);
}

/// Stamps data headers into a term buffer.
///
/// The invariant words of the default header are pre-shifted at construction
/// so that each write is three 64-bit stores, the first one ordered so that
/// the negative frame length lands before any other header byte.
#[derive(Debug, Clone, Copy)]
pub struct HeaderWriter {
    version_flags_type: i64,
    session_id: i64,
    stream_id: i64,
}

impl HeaderWriter {
    /// Builds a writer from a default header template.
    pub fn new(default_header: &AtomicBuffer) -> Self {
        Self {
            version_flags_type: (default_header.get_i32(VERSION_OFFSET) as i64) << 32,
            session_id: (default_header.get_i32(SESSION_ID_OFFSET) as i64) << 32,
            stream_id: default_header.get_i32(STREAM_ID_OFFSET) as i64 & 0xFFFF_FFFF,
        }
    }

    /// Writes a header for a frame of `length` bytes at `offset`.
    ///
    /// The frame is left in the not-yet-visible state (negative length) with
    /// the default flags and type; the caller finishes it with
    /// [`frame_length_ordered`].
    #[inline(always)]
    pub fn write(&self, term_buffer: &AtomicBuffer, offset: usize, length: i32, term_id: i32) {
        let negative_length = (length as i64).wrapping_neg() & 0xFFFF_FFFF;
        term_buffer.put_i64_ordered(offset + FRAME_LENGTH_OFFSET, self.version_flags_type | negative_length);
        term_buffer.put_i64(offset + TERM_OFFSET_OFFSET, self.session_id | offset as i64);
        term_buffer.put_i64(offset + STREAM_ID_OFFSET, ((term_id as i64) << 32) | self.stream_id);
    }
}
