use crate::buffer_claim::BufferClaim;
use crate::conductor::Conductor;
use crate::counters::ReadablePosition;
use crate::error::{Error, Result};
use crate::log_buffer::{LogBuffers, PARTITION_COUNT, active_term_count, index_by_term_count, rotate_log};
use crate::position::{compute_term_begin_position, raw_term_offset, term_id};
use crate::publication::{
    ADMIN_ACTION, CLOSED, Publication, PublicationCore, Registration, ReservedValueSupplier,
};
use crate::term_appender::TermAppender;
use std::fmt;
use std::sync::Arc;

/// Publication that any number of threads may offer to at once.
///
/// Space in the active term is reserved with an atomic fetch-add on its tail
/// counter, so concurrent writers (in this process or another one mapping the
/// same log) always receive disjoint ranges. The publication is `Sync` and is
/// normally shared behind an `Arc`.
///
/// # Example
///
/// ```
/// use hft_publication::{ConcurrentPublication, LogBuffers, Publication, LOW_LATENCY_CONFIG};
/// # use hft_publication::{AtomicPosition, Conductor, Registration, Result};
/// # use std::sync::Arc;
/// # #[derive(Debug)]
/// # struct Local;
/// # impl Conductor for Local {
/// #     fn remove_publication(&self, _: i64) -> Result<()> { Ok(()) }
/// #     fn add_destination(&self, _: i64, _: &str) -> Result<()> { Ok(()) }
/// #     fn remove_destination(&self, _: i64, _: &str) -> Result<()> { Ok(()) }
/// #     fn remove_destination_by_id(&self, _: i64, _: i64) -> Result<()> { Ok(()) }
/// #     fn async_add_destination(&self, _: i64, _: &str) -> Result<i64> { Ok(1) }
/// #     fn async_remove_destination(&self, _: i64, _: &str) -> Result<i64> { Ok(2) }
/// #     fn async_remove_destination_by_id(&self, _: i64, _: i64) -> Result<i64> { Ok(3) }
/// #     fn channel_status(&self, _: i32) -> i64 { 1 }
/// #     fn local_socket_addresses(&self, _: i64, _: i32) -> Vec<String> { Vec::new() }
/// # }
/// # let registration = Registration {
/// #     channel: "aeron:ipc".into(), stream_id: 1, session_id: 1,
/// #     registration_id: 1, original_registration_id: 1, channel_status_id: 0,
/// # };
/// let log = LogBuffers::in_memory(&LOW_LATENCY_CONFIG)?;
/// let limit = AtomicPosition::new(0, 1 << 20);
/// let publication = ConcurrentPublication::new(Arc::new(Local), registration, log, limit)?;
///
/// assert_eq!(publication.offer(b"hello")?, 64);
/// # Ok::<(), hft_publication::Error>(())
/// ```
pub struct ConcurrentPublication {
    core: PublicationCore,
    appenders: [TermAppender; PARTITION_COUNT],
}

impl ConcurrentPublication {
    /// Builds a publication over a log the driver has already initialised.
    ///
    /// Called by the conductor once the driver has acknowledged the
    /// registration.
    pub fn new(
        conductor: Arc<dyn Conductor>,
        registration: Registration,
        log_buffers: Arc<LogBuffers>,
        position_limit: Arc<dyn ReadablePosition>,
    ) -> Result<Self> {
        let core = PublicationCore::new(conductor, registration, log_buffers, position_limit)?;
        let log = core.log_buffers();
        let meta = *log.meta_data_buffer();
        let appenders = std::array::from_fn(|i| TermAppender::new(log.term_buffers()[i], meta, i));
        Ok(Self { core, appenders })
    }

    /// Resolves the active term: its count, appender, term id, tail offset and
    /// the stream position of that offset.
    ///
    /// Returns `None` when the tail of the active partition does not yet
    /// belong to the active term count, i.e. a rotation is half done.
    #[inline(always)]
    fn active_term(&self) -> Option<(i32, &TermAppender, i32, i64, i64)> {
        let core = &self.core;
        let term_count = active_term_count(core.meta());
        let appender = &self.appenders[index_by_term_count(term_count)];
        let raw_tail = appender.raw_tail_volatile();
        let term_id = term_id(raw_tail);
        let term_offset = raw_term_offset(raw_tail);

        if term_count != term_id.wrapping_sub(core.initial_term_id()) {
            return None;
        }
        let position = compute_term_begin_position(term_id, core.position_bits_to_shift(), core.initial_term_id())
            + term_offset;
        Some((term_count, appender, term_id, term_offset, position))
    }

    /// Maps an appender result to the value returned to the caller, rotating
    /// the log when the reservation overran the term.
    #[inline(always)]
    fn new_position(&self, term_count: i32, term_offset: i64, term_id: i32, position: i64, resulting_offset: i32) -> i64 {
        let term_begin_position = position - term_offset;
        if resulting_offset > 0 {
            return term_begin_position + resulting_offset as i64;
        }

        let core = &self.core;
        if term_begin_position + core.term_buffer_length() as i64 >= core.max_possible_position() {
            return core.position_exhausted();
        }
        rotate_log(core.meta(), term_count, term_id);
        ADMIN_ACTION
    }
}

impl Publication for ConcurrentPublication {
    #[inline(always)]
    fn core(&self) -> &PublicationCore {
        &self.core
    }

    /// Position of the tail of the active term, or [`CLOSED`].
    ///
    /// During a rotation the tail may be past the end of the term, in which
    /// case the end of the term is reported.
    fn position(&self) -> i64 {
        if self.core.is_closed() {
            return CLOSED;
        }
        let meta = self.core.meta();
        let raw_tail = self.appenders[index_by_term_count(active_term_count(meta))].raw_tail_volatile();
        let term_offset = raw_term_offset(raw_tail).min(self.core.term_buffer_length() as i64);
        compute_term_begin_position(
            term_id(raw_tail),
            self.core.position_bits_to_shift(),
            self.core.initial_term_id(),
        ) + term_offset
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

        let Some((term_count, appender, term_id, term_offset, position)) = self.active_term() else {
            return Ok(ADMIN_ACTION);
        };
        if let Some(status) = core.check_admission(position, framed_length) {
            return Ok(status);
        }

        let resulting_offset = if length <= core.max_payload_length() {
            appender.append_unfragmented(
                core.header_writer(),
                parts,
                length,
                reserved_value_supplier,
                term_id,
            )
        } else {
            appender.append_fragmented(
                core.header_writer(),
                parts,
                length,
                core.max_payload_length(),
                reserved_value_supplier,
                term_id,
            )
        };

        Ok(self.new_position(term_count, term_offset, term_id, position, resulting_offset))
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

        let Some((term_count, appender, term_id, term_offset, position)) = self.active_term() else {
            return Ok(ADMIN_ACTION);
        };
        if let Some(status) = core.check_admission(position, framed_length) {
            return Ok(status);
        }

        let resulting_offset = appender.claim(core.header_writer(), length, claim, term_id);
        Ok(self.new_position(term_count, term_offset, term_id, position, resulting_offset))
    }
}

impl fmt::Display for ConcurrentPublication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_state(f, "ConcurrentPublication", self.position())
    }
}

impl fmt::Debug for ConcurrentPublication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentPublication").field("core", &self.core).finish()
    }
}
