//! Reserving space in a term and writing frames into it.
//!
//! Both appenders write frames the same way; they only differ in how the
//! tail counter is advanced:
//!
//! - [`TermAppender`] reserves with an atomic fetch-add, so any number of
//!   threads (or processes) may append to the same partition,
//! - [`ExclusiveTermAppender`] is told the current offset by its single
//!   owner and publishes the new tail with an ordered store.
//!
//! Append methods return the term offset just past the reservation, or
//! [`APPEND_FAILED`] when the reservation did not fit in the term. In that
//! case the unused remainder of the term has been turned into a padding frame
//! and the caller is expected to rotate the log.

use crate::atomic_buffer::AtomicBuffer;
use crate::buffer_claim::BufferClaim;
use crate::frame::{
    BEGIN_FRAG_FLAG, END_FRAG_FLAG, FRAME_ALIGNMENT, HDR_TYPE_PAD, HEADER_LENGTH, HeaderWriter,
    align, compute_fragmented_frame_length, frame_flags, frame_length_ordered,
    frame_reserved_value, frame_type,
};
use crate::log_buffer::tail_counter_offset;
use crate::position::{pack_tail, raw_term_offset, term_id};
use crate::publication::ReservedValueSupplier;

/// Returned by append operations that ran off the end of the term.
pub const APPEND_FAILED: i32 = -2;

/// Reserved value written when no supplier is given.
pub const DEFAULT_RESERVED_VALUE: i64 = 0;

// --- frame writing shared by both appenders --------------------------------

/// Pads the rest of the term from `term_offset` if any of it is left.
#[inline(never)]
fn handle_end_of_log(
    term_buffer: &AtomicBuffer,
    term_offset: i64,
    header: &HeaderWriter,
    term_length: i32,
    term_id: i32,
) -> i32 {
    if term_offset < term_length as i64 {
        let offset = term_offset as usize;
        let padding_length = term_length - term_offset as i32;
        write_padding(term_buffer, offset, header, padding_length, term_id);
    }
    APPEND_FAILED
}

#[inline(always)]
fn write_padding(term_buffer: &AtomicBuffer, offset: usize, header: &HeaderWriter, length: i32, term_id: i32) {
    header.write(term_buffer, offset, length, term_id);
    frame_type(term_buffer, offset, HDR_TYPE_PAD);
    frame_length_ordered(term_buffer, offset, length);
}

#[inline(always)]
fn write_reserved_value(
    term_buffer: &AtomicBuffer,
    frame_offset: usize,
    frame_length: i32,
    supplier: Option<&dyn ReservedValueSupplier>,
) {
    let value = match supplier {
        Some(supplier) => supplier.reserved_value(term_buffer, frame_offset as i32, frame_length),
        None => DEFAULT_RESERVED_VALUE,
    };
    frame_reserved_value(term_buffer, frame_offset, value);
}

/// Sequential reader over the parts of a gathered message.
struct Gather<'p, 'b> {
    parts: &'p [&'b [u8]],
    index: usize,
    offset: usize,
}

impl<'p, 'b> Gather<'p, 'b> {
    fn new(parts: &'p [&'b [u8]]) -> Self {
        Self {
            parts,
            index: 0,
            offset: 0,
        }
    }

    /// Copies the next `length` bytes of the message to `dst` in `term_buffer`.
    #[inline(always)]
    fn copy_to(&mut self, term_buffer: &AtomicBuffer, mut dst: usize, mut length: usize) {
        while length > 0 {
            let part = self.parts[self.index];
            let available = part.len() - self.offset;
            if available == 0 {
                self.index += 1;
                self.offset = 0;
                continue;
            }
            let chunk = available.min(length);
            term_buffer.put_bytes(dst, &part[self.offset..self.offset + chunk]);
            dst += chunk;
            length -= chunk;
            self.offset += chunk;
        }
    }
}

#[inline(always)]
fn write_unfragmented(
    term_buffer: &AtomicBuffer,
    frame_offset: usize,
    header: &HeaderWriter,
    parts: &[&[u8]],
    length: i32,
    supplier: Option<&dyn ReservedValueSupplier>,
    term_id: i32,
) {
    let frame_length = length + HEADER_LENGTH;
    header.write(term_buffer, frame_offset, frame_length, term_id);

    let mut dst = frame_offset + HEADER_LENGTH as usize;
    for part in parts {
        term_buffer.put_bytes(dst, part);
        dst += part.len();
    }

    write_reserved_value(term_buffer, frame_offset, frame_length, supplier);
    frame_length_ordered(term_buffer, frame_offset, frame_length);
}

#[allow(clippy::too_many_arguments)]
fn write_fragmented(
    term_buffer: &AtomicBuffer,
    term_offset: usize,
    header: &HeaderWriter,
    parts: &[&[u8]],
    length: i32,
    max_payload_length: i32,
    supplier: Option<&dyn ReservedValueSupplier>,
    term_id: i32,
) {
    let mut source = Gather::new(parts);
    let mut flags = BEGIN_FRAG_FLAG;
    let mut remaining = length;
    let mut frame_offset = term_offset;

    loop {
        let bytes_to_write = remaining.min(max_payload_length);
        let frame_length = bytes_to_write + HEADER_LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);

        header.write(term_buffer, frame_offset, frame_length, term_id);
        source.copy_to(
            term_buffer,
            frame_offset + HEADER_LENGTH as usize,
            bytes_to_write as usize,
        );

        if remaining <= max_payload_length {
            flags |= END_FRAG_FLAG;
        }
        frame_flags(term_buffer, frame_offset, flags);
        write_reserved_value(term_buffer, frame_offset, frame_length, supplier);
        frame_length_ordered(term_buffer, frame_offset, frame_length);

        flags = 0;
        frame_offset += aligned_length as usize;
        remaining -= bytes_to_write;
        if remaining <= 0 {
            break;
        }
    }
}

// --- concurrent ------------------------------------------------------------

/// Appender for one partition, safe for concurrent writers.
#[derive(Debug, Clone, Copy)]
pub struct TermAppender {
    term_buffer: AtomicBuffer,
    meta: AtomicBuffer,
    tail_offset: usize,
}

impl TermAppender {
    pub fn new(term_buffer: AtomicBuffer, meta: AtomicBuffer, partition_index: usize) -> Self {
        Self {
            term_buffer,
            meta,
            tail_offset: tail_counter_offset(partition_index),
        }
    }

    #[inline(always)]
    pub fn raw_tail_volatile(&self) -> i64 {
        self.meta.get_i64_volatile(self.tail_offset)
    }

    #[inline(always)]
    fn get_and_add_raw_tail(&self, aligned_length: i32) -> i64 {
        self.meta.get_and_add_i64(self.tail_offset, aligned_length as i64)
    }

    #[inline(always)]
    fn term_length(&self) -> i32 {
        self.term_buffer.capacity() as i32
    }

    /// Checks a reservation and decides whether it can be written.
    ///
    /// A reservation that landed in a different term than the caller resolved
    /// (the log rotated past it in between) is still ours to fill, so it is
    /// padded out and reported as failed.
    #[inline(always)]
    fn settle(
        &self,
        raw_tail: i64,
        required_length: i32,
        header: &HeaderWriter,
        active_term_id: i32,
    ) -> Result<usize, i32> {
        let term_length = self.term_length();
        let term_offset = raw_term_offset(raw_tail);
        let reserved_term_id = term_id(raw_tail);
        let resulting_offset = term_offset + required_length as i64;

        if resulting_offset > term_length as i64 {
            return Err(handle_end_of_log(
                &self.term_buffer,
                term_offset,
                header,
                term_length,
                reserved_term_id,
            ));
        }
        if reserved_term_id != active_term_id {
            write_padding(
                &self.term_buffer,
                term_offset as usize,
                header,
                required_length,
                reserved_term_id,
            );
            return Err(APPEND_FAILED);
        }
        Ok(term_offset as usize)
    }

    /// Reserves a frame for `length` bytes and points `claim` at it.
    pub fn claim(
        &self,
        header: &HeaderWriter,
        length: i32,
        claim: &mut BufferClaim<'_>,
        active_term_id: i32,
    ) -> i32 {
        let frame_length = length + HEADER_LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);
        let raw_tail = self.get_and_add_raw_tail(aligned_length);

        match self.settle(raw_tail, aligned_length, header, active_term_id) {
            Ok(term_offset) => {
                header.write(&self.term_buffer, term_offset, frame_length, active_term_id);
                claim.wrap(&self.term_buffer, term_offset, frame_length as usize);
                term_offset as i32 + aligned_length
            }
            Err(failed) => failed,
        }
    }

    /// Appends a message that fits in one frame.
    pub fn append_unfragmented(
        &self,
        header: &HeaderWriter,
        parts: &[&[u8]],
        length: i32,
        supplier: Option<&dyn ReservedValueSupplier>,
        active_term_id: i32,
    ) -> i32 {
        let aligned_length = align(length + HEADER_LENGTH, FRAME_ALIGNMENT);
        let raw_tail = self.get_and_add_raw_tail(aligned_length);

        match self.settle(raw_tail, aligned_length, header, active_term_id) {
            Ok(term_offset) => {
                write_unfragmented(
                    &self.term_buffer,
                    term_offset,
                    header,
                    parts,
                    length,
                    supplier,
                    active_term_id,
                );
                term_offset as i32 + aligned_length
            }
            Err(failed) => failed,
        }
    }

    /// Appends a message split into frames of at most `max_payload_length`.
    pub fn append_fragmented(
        &self,
        header: &HeaderWriter,
        parts: &[&[u8]],
        length: i32,
        max_payload_length: i32,
        supplier: Option<&dyn ReservedValueSupplier>,
        active_term_id: i32,
    ) -> i32 {
        let required_length = compute_fragmented_frame_length(length, max_payload_length);
        let raw_tail = self.get_and_add_raw_tail(required_length);

        match self.settle(raw_tail, required_length, header, active_term_id) {
            Ok(term_offset) => {
                write_fragmented(
                    &self.term_buffer,
                    term_offset,
                    header,
                    parts,
                    length,
                    max_payload_length,
                    supplier,
                    active_term_id,
                );
                term_offset as i32 + required_length
            }
            Err(failed) => failed,
        }
    }
}

// --- exclusive -------------------------------------------------------------

/// Appender for one partition owned by a single writer.
///
/// The owner tracks the term id and offset itself and passes them in; the
/// tail counter is only written, never read back.
#[derive(Debug, Clone, Copy)]
pub struct ExclusiveTermAppender {
    term_buffer: AtomicBuffer,
    meta: AtomicBuffer,
    tail_offset: usize,
}

impl ExclusiveTermAppender {
    pub fn new(term_buffer: AtomicBuffer, meta: AtomicBuffer, partition_index: usize) -> Self {
        Self {
            term_buffer,
            meta,
            tail_offset: tail_counter_offset(partition_index),
        }
    }

    #[inline(always)]
    fn put_raw_tail_ordered(&self, term_id: i32, term_offset: i32) {
        self.meta.put_i64_ordered(self.tail_offset, pack_tail(term_id, term_offset));
    }

    #[inline(always)]
    fn reserve(&self, term_id: i32, term_offset: i32, required_length: i32, header: &HeaderWriter) -> Result<usize, i32> {
        let term_length = self.term_buffer.capacity() as i32;
        let resulting_offset = term_offset + required_length;
        self.put_raw_tail_ordered(term_id, resulting_offset);

        if resulting_offset > term_length {
            return Err(handle_end_of_log(
                &self.term_buffer,
                term_offset as i64,
                header,
                term_length,
                term_id,
            ));
        }
        Ok(term_offset as usize)
    }

    pub fn claim(
        &self,
        term_id: i32,
        term_offset: i32,
        header: &HeaderWriter,
        length: i32,
        claim: &mut BufferClaim<'_>,
    ) -> i32 {
        let frame_length = length + HEADER_LENGTH;
        let aligned_length = align(frame_length, FRAME_ALIGNMENT);

        match self.reserve(term_id, term_offset, aligned_length, header) {
            Ok(offset) => {
                header.write(&self.term_buffer, offset, frame_length, term_id);
                claim.wrap(&self.term_buffer, offset, frame_length as usize);
                term_offset + aligned_length
            }
            Err(failed) => failed,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append_unfragmented(
        &self,
        term_id: i32,
        term_offset: i32,
        header: &HeaderWriter,
        parts: &[&[u8]],
        length: i32,
        supplier: Option<&dyn ReservedValueSupplier>,
    ) -> i32 {
        let aligned_length = align(length + HEADER_LENGTH, FRAME_ALIGNMENT);

        match self.reserve(term_id, term_offset, aligned_length, header) {
            Ok(offset) => {
                write_unfragmented(&self.term_buffer, offset, header, parts, length, supplier, term_id);
                term_offset + aligned_length
            }
            Err(failed) => failed,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append_fragmented(
        &self,
        term_id: i32,
        term_offset: i32,
        header: &HeaderWriter,
        parts: &[&[u8]],
        length: i32,
        max_payload_length: i32,
        supplier: Option<&dyn ReservedValueSupplier>,
    ) -> i32 {
        let required_length = compute_fragmented_frame_length(length, max_payload_length);

        match self.reserve(term_id, term_offset, required_length, header) {
            Ok(offset) => {
                write_fragmented(
                    &self.term_buffer,
                    offset,
                    header,
                    parts,
                    length,
                    max_payload_length,
                    supplier,
                    term_id,
                );
                term_offset + required_length
            }
            Err(failed) => failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LOW_LATENCY_CONFIG;
    use crate::frame::{
        FLAGS_OFFSET, HDR_TYPE_DATA, RESERVED_VALUE_OFFSET, TYPE_OFFSET, UNFRAGMENTED,
        frame_length_volatile,
    };
    use crate::log_buffer::{LogBuffers, default_frame_header, raw_tail_volatile_at};
    use std::sync::Arc;

    const TERM_LENGTH: i32 = 64 * 1024;

    fn log() -> Arc<LogBuffers> {
        LogBuffers::in_memory(&LOW_LATENCY_CONFIG.with_session_id(5).with_stream_id(6)).unwrap()
    }

    fn header(log: &LogBuffers) -> HeaderWriter {
        HeaderWriter::new(&default_frame_header(log.meta_data_buffer()))
    }

    fn concurrent(log: &LogBuffers, partition: usize) -> TermAppender {
        TermAppender::new(log.term_buffers()[partition], *log.meta_data_buffer(), partition)
    }

    #[test]
    fn unfragmented_append_writes_a_complete_frame() {
        let log = log();
        let appender = concurrent(&log, 0);
        let term = log.term_buffers()[0];

        let resulting = appender.append_unfragmented(&header(&log), &[&b"hello world"[..]], 11, None, 0);
        assert_eq!(resulting, 64);
        assert_eq!(frame_length_volatile(&term, 0), 43);
        assert_eq!(term.get_u8(FLAGS_OFFSET), UNFRAGMENTED);
        assert_eq!(term.get_u16(TYPE_OFFSET), HDR_TYPE_DATA);
        let mut payload = [0u8; 11];
        term.get_bytes(32, &mut payload);
        assert_eq!(&payload, b"hello world");
        assert_eq!(raw_tail_volatile_at(log.meta_data_buffer(), 0), pack_tail(0, 64));
    }

    #[test]
    fn gathered_parts_are_concatenated() {
        let log = log();
        let appender = concurrent(&log, 0);
        let term = log.term_buffers()[0];

        appender.append_unfragmented(&header(&log), &[&b"abc"[..], &b""[..], &b"defg"[..]], 7, None, 0);
        let mut payload = [0u8; 7];
        term.get_bytes(32, &mut payload);
        assert_eq!(&payload, b"abcdefg");
    }

    #[test]
    fn supplier_sees_the_frame_before_it_is_visible() {
        let log = log();
        let appender = concurrent(&log, 0);
        let term = log.term_buffers()[0];

        let supplier = |buffer: &AtomicBuffer, offset: i32, length: i32| -> i64 {
            assert!(frame_length_volatile(buffer, offset as usize) < 0);
            (offset as i64) << 32 | length as i64
        };
        appender.append_unfragmented(&header(&log), &[&[1u8; 10][..]], 10, None, 0);
        appender.append_unfragmented(&header(&log), &[&[1u8; 10][..]], 10, Some(&supplier as &dyn ReservedValueSupplier), 0);

        assert_eq!(term.get_i64(RESERVED_VALUE_OFFSET), DEFAULT_RESERVED_VALUE);
        assert_eq!(term.get_i64(64 + RESERVED_VALUE_OFFSET), (64i64 << 32) | 42);
    }

    #[test]
    fn fragmented_append_splits_and_flags_fragments() {
        let log = log();
        let appender = concurrent(&log, 0);
        let term = log.term_buffers()[0];
        let max_payload = 1408 - HEADER_LENGTH;
        let message: Vec<u8> = (0..(max_payload * 2 + 10)).map(|i| i as u8).collect();
        let (first, second) = message.split_at(500);

        let resulting = appender.append_fragmented(
            &header(&log),
            &[first, second],
            message.len() as i32,
            max_payload,
            None,
            0,
        );
        assert_eq!(resulting, 1408 * 2 + 64);

        assert_eq!(frame_length_volatile(&term, 0), 1408);
        assert_eq!(term.get_u8(FLAGS_OFFSET), BEGIN_FRAG_FLAG);
        assert_eq!(frame_length_volatile(&term, 1408), 1408);
        assert_eq!(term.get_u8(1408 + FLAGS_OFFSET), 0);
        assert_eq!(frame_length_volatile(&term, 2816), 42);
        assert_eq!(term.get_u8(2816 + FLAGS_OFFSET), END_FRAG_FLAG);

        let mut reassembled = Vec::new();
        for (offset, len) in [(0usize, max_payload), (1408, max_payload), (2816, 10)] {
            let mut chunk = vec![0u8; len as usize];
            term.get_bytes(offset + HEADER_LENGTH as usize, &mut chunk);
            reassembled.extend_from_slice(&chunk);
        }
        assert_eq!(reassembled, message);
    }

    #[test]
    fn overrun_pads_remainder_and_fails() {
        let log = log();
        let appender = concurrent(&log, 0);
        let term = log.term_buffers()[0];
        let meta = log.meta_data_buffer();
        meta.put_i64_ordered(tail_counter_offset(0), pack_tail(0, TERM_LENGTH - 64));

        let resulting = appender.append_unfragmented(&header(&log), &[&[0u8; 100][..]], 100, None, 0);
        assert_eq!(resulting, APPEND_FAILED);

        let pad_offset = (TERM_LENGTH - 64) as usize;
        assert_eq!(frame_length_volatile(&term, pad_offset), 64);
        assert_eq!(term.get_u16(pad_offset + TYPE_OFFSET), HDR_TYPE_PAD);
        assert_eq!(
            raw_term_offset(raw_tail_volatile_at(meta, 0)),
            (TERM_LENGTH - 64 + 160) as i64
        );
    }

    #[test]
    fn overrun_at_exact_end_writes_no_padding() {
        let log = log();
        let appender = concurrent(&log, 0);
        let meta = log.meta_data_buffer();
        meta.put_i64_ordered(tail_counter_offset(0), pack_tail(0, TERM_LENGTH));

        let mut claim = BufferClaim::new();
        assert_eq!(appender.claim(&header(&log), 10, &mut claim, 0), APPEND_FAILED);
        assert!(!claim.is_active());
    }

    #[test]
    fn reservation_in_a_stale_term_is_padded() {
        let log = log();
        let appender = concurrent(&log, 0);
        let term = log.term_buffers()[0];
        let meta = log.meta_data_buffer();
        meta.put_i64_ordered(tail_counter_offset(0), pack_tail(3, 128));

        let resulting = appender.append_unfragmented(&header(&log), &[&[0u8; 10][..]], 10, None, 0);
        assert_eq!(resulting, APPEND_FAILED);
        assert_eq!(frame_length_volatile(&term, 128), 64);
        assert_eq!(term.get_u16(128 + TYPE_OFFSET), HDR_TYPE_PAD);
    }

    #[test]
    fn claim_leaves_frame_invisible_until_commit() {
        let log = log();
        let appender = concurrent(&log, 0);
        let term = log.term_buffers()[0];

        let mut claim = BufferClaim::new();
        assert_eq!(appender.claim(&header(&log), 20, &mut claim, 0), 64);
        assert_eq!(frame_length_volatile(&term, 0), -52);
        claim.payload_mut().copy_from_slice(&[7u8; 20]);
        claim.commit().unwrap();
        assert_eq!(frame_length_volatile(&term, 0), 52);
    }

    #[test]
    fn exclusive_appender_publishes_tail_with_store() {
        let log = log();
        let appender = ExclusiveTermAppender::new(log.term_buffers()[1], *log.meta_data_buffer(), 1);
        let meta = log.meta_data_buffer();

        let resulting = appender.append_unfragmented(1, 0, &header(&log), &[&[9u8; 96][..]], 96, None);
        assert_eq!(resulting, 128);
        assert_eq!(raw_tail_volatile_at(meta, 1), pack_tail(1, 128));

        let mut claim = BufferClaim::new();
        assert_eq!(appender.claim(1, 128, &header(&log), 0, &mut claim), 160);
        claim.abort().unwrap();
        assert_eq!(raw_tail_volatile_at(meta, 1), pack_tail(1, 160));

        let failed = appender.append_unfragmented(1, TERM_LENGTH - 32, &header(&log), &[&[0u8; 1][..]], 1, None);
        assert_eq!(failed, APPEND_FAILED);
        assert_eq!(
            frame_length_volatile(&log.term_buffers()[1], (TERM_LENGTH - 32) as usize),
            32
        );
    }
}
