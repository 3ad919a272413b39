use crate::buffer_claim::BufferClaim;
use crate::conductor::Conductor;
use crate::counters::ReadablePosition;
use crate::error::{Error, Result};
use crate::log_buffer::{
    LogBuffers, PARTITION_COUNT, active_term_count, index_by_term_count, initialise_tail_with_term_id,
    next_partition_index, raw_tail_volatile_at, set_active_term_count_ordered,
};
use crate::position::{compute_term_begin_position, term_id, term_offset};
use crate::publication::{
    ADMIN_ACTION, CLOSED, Publication, PublicationCore, Registration, ReservedValueSupplier,
};
use crate::term_appender::ExclusiveTermAppender;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

/// Publication with a single writer.
///
/// The writer's term id and offset are kept locally rather than read back
/// from the log, so a write is a plain ordered store of the new tail instead
/// of a fetch-add, and the writer rotates the log itself when a term fills
/// up.
///
/// The local state lives in `Cell`s, which makes the type `Send` but not
/// `Sync`: it can be handed to another thread but never shared between two.
pub struct ExclusivePublication {
    core: PublicationCore,
    appenders: [ExclusiveTermAppender; PARTITION_COUNT],
    term_id: Cell<i32>,
    term_offset: Cell<i32>,
    active_partition_index: Cell<usize>,
    term_begin_position: Cell<i64>,
}

impl ExclusivePublication {
    /// Builds a publication over a log the driver has already initialised,
    /// resuming from the tail of its active term.
    ///
    /// Fails with [`Error::TermCountMismatch`] if the active term count and
    /// the active tail disagree; a single-writer log is never left mid
    /// rotation.
    pub fn new(
        conductor: Arc<dyn Conductor>,
        registration: Registration,
        log_buffers: Arc<LogBuffers>,
        position_limit: Arc<dyn ReadablePosition>,
    ) -> Result<Self> {
        let core = PublicationCore::new(conductor, registration, log_buffers, position_limit)?;
        let log = core.log_buffers();
        let meta = *log.meta_data_buffer();

        let term_count = active_term_count(&meta);
        let index = index_by_term_count(term_count);
        let raw_tail = raw_tail_volatile_at(&meta, index);
        let term_id = term_id(raw_tail);
        let initial_term_id = core.initial_term_id();
        if term_count != term_id.wrapping_sub(initial_term_id) {
            return Err(Error::TermCountMismatch {
                term_count,
                term_id,
                initial_term_id,
            });
        }

        let term_offset = term_offset(raw_tail, core.term_buffer_length());
        let term_begin_position =
            compute_term_begin_position(term_id, core.position_bits_to_shift(), initial_term_id);
        let appenders = std::array::from_fn(|i| ExclusiveTermAppender::new(log.term_buffers()[i], meta, i));

        Ok(Self {
            core,
            appenders,
            term_id: Cell::new(term_id),
            term_offset: Cell::new(term_offset),
            active_partition_index: Cell::new(index),
            term_begin_position: Cell::new(term_begin_position),
        })
    }

    /// Id of the term currently being written.
    pub fn term_id(&self) -> i32 {
        self.term_id.get()
    }

    /// Offset in the current term of the next write.
    pub fn term_offset(&self) -> i32 {
        self.term_offset.get()
    }

    #[inline(always)]
    fn active_appender(&self) -> &ExclusiveTermAppender {
        &self.appenders[self.active_partition_index.get()]
    }

    #[inline(always)]
    fn new_position(&self, resulting_offset: i32) -> i64 {
        if resulting_offset > 0 {
            self.term_offset.set(resulting_offset);
            return self.term_begin_position.get() + resulting_offset as i64;
        }

        let core = &self.core;
        let term_length = core.term_buffer_length() as i64;
        if self.term_begin_position.get() + term_length >= core.max_possible_position() {
            return core.position_exhausted();
        }
        self.rotate_term();
        ADMIN_ACTION
    }

    #[cold]
    fn rotate_term(&self) {
        let next_index = next_partition_index(self.active_partition_index.get());
        let next_term_id = self.term_id.get().wrapping_add(1);
        let term_count = next_term_id.wrapping_sub(self.core.initial_term_id());
        let meta = self.core.meta();

        self.active_partition_index.set(next_index);
        self.term_offset.set(0);
        self.term_id.set(next_term_id);
        self.term_begin_position
            .set(self.term_begin_position.get() + self.core.term_buffer_length() as i64);

        initialise_tail_with_term_id(meta, next_index, next_term_id);
        set_active_term_count_ordered(meta, term_count);
        tracing::trace!(next_term_id, term_count, "rotated log");
    }
}

impl Publication for ExclusivePublication {
    #[inline(always)]
    fn core(&self) -> &PublicationCore {
        &self.core
    }

    fn position(&self) -> i64 {
        if self.core.is_closed() {
            return CLOSED;
        }
        self.term_begin_position.get() + self.term_offset.get() as i64
    }

    fn offer_parts(
        &self,
        parts: &[&[u8]],
        reserved_value_supplier: Option<&dyn ReservedValueSupplier>,
    ) -> Result<i64> {
        let core = &self.core;
        if core.is_closed() {
            return Ok(CLOSED);
        }
        let length = PublicationCore::validate_and_compute_length(parts)?;
        let framed_length = core.framed_length(length)?;

        let term_offset = self.term_offset.get();
        let position = self.term_begin_position.get() + term_offset as i64;
        if let Some(status) = core.check_admission(position, framed_length) {
            return Ok(status);
        }

        let appender = self.active_appender();
        let resulting_offset = if length <= core.max_payload_length() {
            appender.append_unfragmented(
                self.term_id.get(),
                term_offset,
                core.header_writer(),
                parts,
                length,
                reserved_value_supplier,
            )
        } else {
            appender.append_fragmented(
                self.term_id.get(),
                term_offset,
                core.header_writer(),
                parts,
                length,
                core.max_payload_length(),
                reserved_value_supplier,
            )
        };

        Ok(self.new_position(resulting_offset))
    }

    fn try_claim<'a>(&'a self, length: i32, claim: &mut BufferClaim<'a>) -> Result<i64> {
        if claim.is_active() {
            return Err(Error::ClaimActive);
        }
        let core = &self.core;
        core.check_payload_length(length)?;
        if core.is_closed() {
            return Ok(CLOSED);
        }
        let framed_length = core.framed_length(length)?;

        let term_offset = self.term_offset.get();
        let position = self.term_begin_position.get() + term_offset as i64;
        if let Some(status) = core.check_admission(position, framed_length) {
            return Ok(status);
        }

        let resulting_offset = self.active_appender().claim(
            self.term_id.get(),
            term_offset,
            core.header_writer(),
            length,
            claim,
        );
        Ok(self.new_position(resulting_offset))
    }
}

impl fmt::Display for ExclusivePublication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_state(f, "ExclusivePublication", self.position())
    }
}

impl fmt::Debug for ExclusivePublication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusivePublication")
            .field("core", &self.core)
            .field("term_id", &self.term_id.get())
            .field("term_offset", &self.term_offset.get())
            .finish()
    }
}
