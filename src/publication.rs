//! The publication contract shared by the concurrent and exclusive writers.
//!
//! Every write operation is non-blocking and returns either the new stream
//! position (`>= 0`) or one of five negative status codes:
//!
//! | code | constant                  | meaning                                    |
//! |------|---------------------------|--------------------------------------------|
//! | -1   | [`NOT_CONNECTED`]         | no subscriber; retry later                 |
//! | -2   | [`BACK_PRESSURED`]        | position limit reached; retry later        |
//! | -3   | [`ADMIN_ACTION`]          | term rotation in progress; retry now       |
//! | -4   | [`CLOSED`]                | the publication is closed                  |
//! | -5   | [`MAX_POSITION_EXCEEDED`] | position space exhausted; recreate         |
//!
//! Status codes are values, not errors. [`Error`] is reserved for calls that
//! break the caller contract (lengths out of range, destination commands after
//! close) and never carries an operational condition.
//!
//! A write attempt is decided in this order:
//!
//! 1. closed publication: [`CLOSED`],
//! 2. `position + framed_length >= max_possible_position`: [`MAX_POSITION_EXCEEDED`],
//! 3. `position + framed_length > position_limit`: [`BACK_PRESSURED`] when
//!    connected, otherwise [`NOT_CONNECTED`],
//! 4. reserve; a reservation that overran the term: [`ADMIN_ACTION`].

use crate::atomic_buffer::AtomicBuffer;
use crate::buffer_claim::BufferClaim;
use crate::conductor::{Conductor, channel_endpoint_status};
use crate::counters::ReadablePosition;
use crate::error::{Error, Result};
use crate::frame::{
    FRAME_ALIGNMENT, HEADER_LENGTH, HeaderWriter, align, compute_fragmented_frame_length,
    compute_max_message_length,
};
use crate::log_buffer::{LogBuffers, default_frame_header, initial_term_id, is_connected, mtu_length};
use crate::position::position_bits_to_shift;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// No subscriber is connected.
pub const NOT_CONNECTED: i64 = -1;

/// The position limit set by flow control has been reached.
pub const BACK_PRESSURED: i64 = -2;

/// The log is rotating to the next term; the next attempt should succeed.
pub const ADMIN_ACTION: i64 = -3;

/// The publication has been closed.
pub const CLOSED: i64 = -4;

/// The stream has used up its position space. The publication must be closed
/// and a new one added.
pub const MAX_POSITION_EXCEEDED: i64 = -5;

/// Name of a value returned by `offer`/`try_claim`.
///
/// ```
/// use hft_publication::publication::{error_string, BACK_PRESSURED};
///
/// assert_eq!(error_string(BACK_PRESSURED), "BACK_PRESSURED");
/// assert_eq!(error_string(4096), "NONE");
/// ```
pub fn error_string(position: i64) -> &'static str {
    match position {
        0.. => "NONE",
        NOT_CONNECTED => "NOT_CONNECTED",
        BACK_PRESSURED => "BACK_PRESSURED",
        ADMIN_ACTION => "ADMIN_ACTION",
        CLOSED => "CLOSED",
        MAX_POSITION_EXCEEDED => "MAX_POSITION_EXCEEDED",
        _ => "UNKNOWN",
    }
}

/// Typed view of the negative results of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicationStatus {
    NotConnected,
    BackPressured,
    AdminAction,
    Closed,
    MaxPositionExceeded,
}

impl PublicationStatus {
    /// Status for `position`, or `None` for a successful (or unknown) result.
    pub fn from_position(position: i64) -> Option<Self> {
        match position {
            NOT_CONNECTED => Some(Self::NotConnected),
            BACK_PRESSURED => Some(Self::BackPressured),
            ADMIN_ACTION => Some(Self::AdminAction),
            CLOSED => Some(Self::Closed),
            MAX_POSITION_EXCEEDED => Some(Self::MaxPositionExceeded),
            _ => None,
        }
    }

    pub const fn code(self) -> i64 {
        match self {
            Self::NotConnected => NOT_CONNECTED,
            Self::BackPressured => BACK_PRESSURED,
            Self::AdminAction => ADMIN_ACTION,
            Self::Closed => CLOSED,
            Self::MaxPositionExceeded => MAX_POSITION_EXCEEDED,
        }
    }

    /// Whether the same call may succeed later on the same publication.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::NotConnected | Self::BackPressured | Self::AdminAction)
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(error_string(self.code()))
    }
}

/// Computes the reserved value of a frame just before it becomes visible.
///
/// Called once per frame with the term buffer, the frame's offset in it and
/// the frame length (header included). Header and payload are already in
/// place, so the value can be a checksum over them.
pub trait ReservedValueSupplier {
    fn reserved_value(&self, term_buffer: &AtomicBuffer, term_offset: i32, frame_length: i32) -> i64;
}

impl<F> ReservedValueSupplier for F
where
    F: Fn(&AtomicBuffer, i32, i32) -> i64,
{
    #[inline(always)]
    fn reserved_value(&self, term_buffer: &AtomicBuffer, term_offset: i32, frame_length: i32) -> i64 {
        self(term_buffer, term_offset, frame_length)
    }
}

/// Identity assigned by the conductor when it registered the publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub channel: String,
    pub stream_id: i32,
    pub session_id: i32,
    pub registration_id: i64,
    /// Registration of the first publication on this log; equal to
    /// `registration_id` unless the log is shared.
    pub original_registration_id: i64,
    pub channel_status_id: i32,
}

/// State and behaviour common to both publication variants.
///
/// Holds the immutable identity and capacity limits, the close flag, and the
/// shared handles to the log, the position limit counter and the conductor.
pub struct PublicationCore {
    registration: Registration,
    initial_term_id: i32,
    term_buffer_length: i32,
    position_bits_to_shift: i32,
    max_possible_position: i64,
    max_payload_length: i32,
    max_message_length: i32,
    header_writer: HeaderWriter,
    is_closed: AtomicBool,
    exhausted: AtomicBool,
    position_limit: Arc<dyn ReadablePosition>,
    log_buffers: Arc<LogBuffers>,
    conductor: Arc<dyn Conductor>,
}

impl PublicationCore {
    pub(crate) fn new(
        conductor: Arc<dyn Conductor>,
        registration: Registration,
        log_buffers: Arc<LogBuffers>,
        position_limit: Arc<dyn ReadablePosition>,
    ) -> Result<Self> {
        let meta = log_buffers.meta_data_buffer();
        let term_buffer_length = log_buffers.term_length();
        let position_bits_to_shift = position_bits_to_shift(term_buffer_length)?;

        let core = Self {
            initial_term_id: initial_term_id(meta),
            term_buffer_length,
            position_bits_to_shift,
            max_possible_position: (term_buffer_length as i64) << 31,
            max_payload_length: mtu_length(meta) - HEADER_LENGTH,
            max_message_length: compute_max_message_length(term_buffer_length),
            header_writer: HeaderWriter::new(&default_frame_header(meta)),
            is_closed: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            position_limit,
            log_buffers,
            conductor,
            registration,
        };

        tracing::debug!(
            registration_id = core.registration.registration_id,
            session_id = core.registration.session_id,
            stream_id = core.registration.stream_id,
            channel = %core.registration.channel,
            term_length = term_buffer_length,
            "publication ready"
        );
        Ok(core)
    }

    // --- identity and limits -----------------------------------------------

    pub fn channel(&self) -> &str {
        &self.registration.channel
    }

    pub fn stream_id(&self) -> i32 {
        self.registration.stream_id
    }

    pub fn session_id(&self) -> i32 {
        self.registration.session_id
    }

    pub fn registration_id(&self) -> i64 {
        self.registration.registration_id
    }

    pub fn original_registration_id(&self) -> i64 {
        self.registration.original_registration_id
    }

    /// Whether this publication is the one that created the log.
    pub fn is_original(&self) -> bool {
        self.registration.original_registration_id == self.registration.registration_id
    }

    pub fn channel_status_id(&self) -> i32 {
        self.registration.channel_status_id
    }

    #[inline(always)]
    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    #[inline(always)]
    pub fn term_buffer_length(&self) -> i32 {
        self.term_buffer_length
    }

    #[inline(always)]
    pub fn position_bits_to_shift(&self) -> i32 {
        self.position_bits_to_shift
    }

    /// First position the stream can never reach: `term_length << 31`.
    #[inline(always)]
    pub fn max_possible_position(&self) -> i64 {
        self.max_possible_position
    }

    /// Largest payload carried by a single frame (`mtu - HEADER_LENGTH`).
    #[inline(always)]
    pub fn max_payload_length(&self) -> i32 {
        self.max_payload_length
    }

    /// Largest message an offer accepts, fragmented or not.
    #[inline(always)]
    pub fn max_message_length(&self) -> i32 {
        self.max_message_length
    }

    #[inline(always)]
    pub(crate) fn header_writer(&self) -> &HeaderWriter {
        &self.header_writer
    }

    #[inline(always)]
    pub(crate) fn log_buffers(&self) -> &LogBuffers {
        &self.log_buffers
    }

    #[inline(always)]
    pub(crate) fn meta(&self) -> &AtomicBuffer {
        self.log_buffers.meta_data_buffer()
    }

    // --- state -------------------------------------------------------------

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// Whether a subscriber is connected. Always `false` once closed.
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && is_connected(self.meta())
    }

    /// Current flow-control limit, or [`CLOSED`].
    pub fn position_limit(&self) -> i64 {
        if self.is_closed() {
            return CLOSED;
        }
        self.position_limit.get_volatile()
    }

    pub fn position_limit_id(&self) -> i32 {
        self.position_limit.id()
    }

    /// Status of the channel endpoint, or `NO_ID_ALLOCATED` once closed.
    pub fn channel_status(&self) -> i64 {
        if self.is_closed() {
            return channel_endpoint_status::NO_ID_ALLOCATED;
        }
        self.conductor.channel_status(self.registration.channel_status_id)
    }

    pub fn local_socket_addresses(&self) -> Vec<String> {
        self.conductor
            .local_socket_addresses(self.channel_status(), self.registration.channel_status_id)
    }

    /// Asks the conductor to release the publication and marks it closed once
    /// it has. Calling it again after that does nothing.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.conductor.remove_publication(self.registration.registration_id)?;
        self.internal_close();
        Ok(())
    }

    /// Marks the publication closed without involving the driver.
    ///
    /// Used by the conductor when it reclaims a publication.
    pub fn internal_close(&self) {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                registration_id = self.registration.registration_id,
                session_id = self.registration.session_id,
                stream_id = self.registration.stream_id,
                "publication closed"
            );
        }
    }

    // --- write path helpers ------------------------------------------------

    /// Total length of a gathered message.
    #[inline(always)]
    pub(crate) fn validate_and_compute_length(parts: &[&[u8]]) -> Result<i32> {
        let total: u64 = parts.iter().map(|part| part.len() as u64).sum();
        i32::try_from(total).map_err(|_| Error::LengthOverflow(total))
    }

    /// Rejects a claim that would not fit in one frame.
    #[inline(always)]
    pub(crate) fn check_payload_length(&self, length: i32) -> Result<()> {
        if length < 0 {
            return Err(Error::InvalidLength(length as i64));
        }
        if length > self.max_payload_length {
            return Err(Error::PayloadTooLong {
                length: length as i64,
                max_payload_length: self.max_payload_length,
            });
        }
        Ok(())
    }

    #[inline(always)]
    pub(crate) fn check_max_message_length(&self, length: i32) -> Result<()> {
        if length > self.max_message_length {
            return Err(Error::MessageTooLong {
                length: length as i64,
                max_message_length: self.max_message_length,
            });
        }
        Ok(())
    }

    /// Bytes a message of `length` takes in the term, header(s) included.
    #[inline(always)]
    pub(crate) fn framed_length(&self, length: i32) -> Result<i32> {
        if length <= self.max_payload_length {
            return Ok(align(length + HEADER_LENGTH, FRAME_ALIGNMENT));
        }
        self.check_max_message_length(length)?;
        Ok(compute_fragmented_frame_length(length, self.max_payload_length))
    }

    /// Decides whether a write of `framed_length` at `position` may proceed.
    ///
    /// Returns the status to report when it may not.
    #[inline(always)]
    pub(crate) fn check_admission(&self, position: i64, framed_length: i32) -> Option<i64> {
        let new_position = position + framed_length as i64;
        if new_position >= self.max_possible_position {
            return Some(self.position_exhausted());
        }
        if new_position > self.position_limit.get_volatile() {
            return Some(self.back_pressure_status());
        }
        None
    }

    #[inline(always)]
    fn back_pressure_status(&self) -> i64 {
        if is_connected(self.meta()) {
            BACK_PRESSURED
        } else {
            NOT_CONNECTED
        }
    }

    #[cold]
    pub(crate) fn position_exhausted(&self) -> i64 {
        if !self.exhausted.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                registration_id = self.registration.registration_id,
                max_possible_position = self.max_possible_position,
                "publication reached its maximum position"
            );
        }
        MAX_POSITION_EXCEEDED
    }

    // --- destinations ------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::PublicationClosed);
        }
        Ok(())
    }

    /// Adds a destination to a manually controlled multi-destination channel
    /// and waits for the driver to acknowledge it.
    pub fn add_destination(&self, endpoint_channel: &str) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!(registration_id = self.registration.registration_id, endpoint_channel, "add destination");
        self.conductor
            .add_destination(self.registration.original_registration_id, endpoint_channel)
    }

    pub fn remove_destination(&self, endpoint_channel: &str) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!(registration_id = self.registration.registration_id, endpoint_channel, "remove destination");
        self.conductor
            .remove_destination(self.registration.original_registration_id, endpoint_channel)
    }

    pub fn remove_destination_by_id(&self, destination_registration_id: i64) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!(
            registration_id = self.registration.registration_id,
            destination_registration_id,
            "remove destination"
        );
        self.conductor
            .remove_destination_by_id(self.registration.original_registration_id, destination_registration_id)
    }

    /// Sends an add-destination command without waiting; returns its
    /// correlation id.
    pub fn async_add_destination(&self, endpoint_channel: &str) -> Result<i64> {
        self.ensure_open()?;
        self.conductor
            .async_add_destination(self.registration.registration_id, endpoint_channel)
    }

    pub fn async_remove_destination(&self, endpoint_channel: &str) -> Result<i64> {
        self.ensure_open()?;
        self.conductor
            .async_remove_destination(self.registration.registration_id, endpoint_channel)
    }

    pub fn async_remove_destination_by_id(&self, destination_registration_id: i64) -> Result<i64> {
        self.ensure_open()?;
        self.conductor
            .async_remove_destination_by_id(self.registration.registration_id, destination_registration_id)
    }

    pub(crate) fn fmt_state(&self, f: &mut fmt::Formatter<'_>, name: &str, position: i64) -> fmt::Result {
        write!(
            f,
            "{name}{{original_registration_id={}, registration_id={}, is_closed={}, is_connected={}, \
             initial_term_id={}, term_buffer_length={}, session_id={}, stream_id={}, channel={}, position={}}}",
            self.registration.original_registration_id,
            self.registration.registration_id,
            self.is_closed(),
            self.is_connected(),
            self.initial_term_id,
            self.term_buffer_length,
            self.registration.session_id,
            self.registration.stream_id,
            self.registration.channel,
            position,
        )
    }
}

impl fmt::Debug for PublicationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicationCore")
            .field("registration", &self.registration)
            .field("initial_term_id", &self.initial_term_id)
            .field("term_buffer_length", &self.term_buffer_length)
            .field("max_payload_length", &self.max_payload_length)
            .field("is_closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Non-blocking writer of messages into a log.
///
/// Implemented by [`ConcurrentPublication`](crate::ConcurrentPublication),
/// which any number of threads may share, and by
/// [`ExclusivePublication`](crate::ExclusivePublication), which has a single
/// writer.
///
/// All write methods return `Ok(position)` with the stream position after the
/// message on success, or `Ok(status)` with one of the negative status codes.
/// `Err` is only returned for invalid arguments.
pub trait Publication: fmt::Display {
    /// Shared state and identity.
    fn core(&self) -> &PublicationCore;

    /// Position the next message would be written at, or [`CLOSED`].
    fn position(&self) -> i64;

    /// Writes the concatenation of `parts` as one message.
    ///
    /// Messages up to [`max_payload_length`](PublicationCore::max_payload_length)
    /// take a single frame; longer ones up to
    /// [`max_message_length`](PublicationCore::max_message_length) are split
    /// into fragments. When `reserved_value_supplier` is given it is called for
    /// every frame; otherwise the reserved value is 0.
    fn offer_parts(
        &self,
        parts: &[&[u8]],
        reserved_value_supplier: Option<&dyn ReservedValueSupplier>,
    ) -> Result<i64>;

    /// Reserves a single frame of `length` bytes for the caller to fill in
    /// place through `claim`.
    ///
    /// Claims never fragment, so `length` above `max_payload_length` is an
    /// error rather than a status.
    fn try_claim<'a>(&'a self, length: i32, claim: &mut BufferClaim<'a>) -> Result<i64>;

    /// Bytes that can be written before reaching the position limit.
    fn available_window(&self) -> i64 {
        if self.is_closed() {
            return CLOSED;
        }
        self.core().position_limit() - self.position()
    }

    fn offer(&self, buffer: &[u8]) -> Result<i64> {
        self.offer_parts(&[buffer], None)
    }

    fn offer_with(&self, buffer: &[u8], reserved_value_supplier: &dyn ReservedValueSupplier) -> Result<i64> {
        self.offer_parts(&[buffer], Some(reserved_value_supplier))
    }

    /// Writes `one` followed by `two` as one message.
    fn offer_two(&self, one: &[u8], two: &[u8]) -> Result<i64> {
        self.offer_parts(&[one, two], None)
    }

    fn offer_two_with(
        &self,
        one: &[u8],
        two: &[u8],
        reserved_value_supplier: &dyn ReservedValueSupplier,
    ) -> Result<i64> {
        self.offer_parts(&[one, two], Some(reserved_value_supplier))
    }

    /// Writes a vector of buffers as one message.
    fn offer_vectored(&self, parts: &[&[u8]]) -> Result<i64> {
        self.offer_parts(parts, None)
    }

    fn offer_vectored_with(&self, parts: &[&[u8]], reserved_value_supplier: &dyn ReservedValueSupplier) -> Result<i64> {
        self.offer_parts(parts, Some(reserved_value_supplier))
    }

    fn close(&self) -> Result<()> {
        self.core().close()
    }

    fn is_closed(&self) -> bool {
        self.core().is_closed()
    }

    fn is_connected(&self) -> bool {
        self.core().is_connected()
    }

    fn position_limit(&self) -> i64 {
        self.core().position_limit()
    }

    fn position_limit_id(&self) -> i32 {
        self.core().position_limit_id()
    }

    fn channel(&self) -> &str {
        self.core().channel()
    }

    fn stream_id(&self) -> i32 {
        self.core().stream_id()
    }

    fn session_id(&self) -> i32 {
        self.core().session_id()
    }

    fn initial_term_id(&self) -> i32 {
        self.core().initial_term_id()
    }

    fn registration_id(&self) -> i64 {
        self.core().registration_id()
    }

    fn original_registration_id(&self) -> i64 {
        self.core().original_registration_id()
    }

    fn is_original(&self) -> bool {
        self.core().is_original()
    }

    fn term_buffer_length(&self) -> i32 {
        self.core().term_buffer_length()
    }

    fn position_bits_to_shift(&self) -> i32 {
        self.core().position_bits_to_shift()
    }

    fn max_possible_position(&self) -> i64 {
        self.core().max_possible_position()
    }

    fn max_payload_length(&self) -> i32 {
        self.core().max_payload_length()
    }

    fn max_message_length(&self) -> i32 {
        self.core().max_message_length()
    }

    fn channel_status(&self) -> i64 {
        self.core().channel_status()
    }

    fn channel_status_id(&self) -> i32 {
        self.core().channel_status_id()
    }

    fn local_socket_addresses(&self) -> Vec<String> {
        self.core().local_socket_addresses()
    }

    fn add_destination(&self, endpoint_channel: &str) -> Result<()> {
        self.core().add_destination(endpoint_channel)
    }

    fn remove_destination(&self, endpoint_channel: &str) -> Result<()> {
        self.core().remove_destination(endpoint_channel)
    }

    fn remove_destination_by_id(&self, destination_registration_id: i64) -> Result<()> {
        self.core().remove_destination_by_id(destination_registration_id)
    }

    fn async_add_destination(&self, endpoint_channel: &str) -> Result<i64> {
        self.core().async_add_destination(endpoint_channel)
    }

    fn async_remove_destination(&self, endpoint_channel: &str) -> Result<i64> {
        self.core().async_remove_destination(endpoint_channel)
    }

    fn async_remove_destination_by_id(&self, destination_registration_id: i64) -> Result<i64> {
        self.core().async_remove_destination_by_id(destination_registration_id)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Registration;
    use crate::conductor::testing::RecordingConductor;
    use crate::config::LogBufferConfig;
    use crate::counters::AtomicPosition;
    use crate::log_buffer::LogBuffers;
    use std::sync::Arc;

    pub(crate) const REGISTRATION_ID: i64 = 7;
    pub(crate) const ORIGINAL_REGISTRATION_ID: i64 = 5;

    /// Everything a conductor would hand a publication at registration.
    pub(crate) struct Fixture {
        pub(crate) log: Arc<LogBuffers>,
        pub(crate) limit: Arc<AtomicPosition>,
        pub(crate) conductor: Arc<RecordingConductor>,
        pub(crate) registration: Registration,
    }

    pub(crate) fn fixture(config: &LogBufferConfig) -> Fixture {
        Fixture {
            log: LogBuffers::in_memory(config).unwrap(),
            limit: AtomicPosition::new(1, i64::MAX),
            conductor: Arc::new(RecordingConductor::default()),
            registration: Registration {
                channel: "aeron:ipc".to_string(),
                stream_id: config.stream_id,
                session_id: config.session_id,
                registration_id: REGISTRATION_ID,
                original_registration_id: ORIGINAL_REGISTRATION_ID,
                channel_status_id: 3,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::{ConcurrentPublication, ExclusivePublication};
    use crate::conductor::testing::{Command, RecordingConductor};
    use crate::config::LOW_LATENCY_CONFIG;

    fn publication(fixture: &Fixture) -> ConcurrentPublication {
        ConcurrentPublication::new(
            fixture.conductor.clone(),
            fixture.registration.clone(),
            fixture.log.clone(),
            fixture.limit.clone(),
        )
        .unwrap()
    }

    #[test]
    fn error_string_names_every_status() {
        assert_eq!(error_string(NOT_CONNECTED), "NOT_CONNECTED");
        assert_eq!(error_string(BACK_PRESSURED), "BACK_PRESSURED");
        assert_eq!(error_string(ADMIN_ACTION), "ADMIN_ACTION");
        assert_eq!(error_string(CLOSED), "CLOSED");
        assert_eq!(error_string(MAX_POSITION_EXCEEDED), "MAX_POSITION_EXCEEDED");
        assert_eq!(error_string(0), "NONE");
        assert_eq!(error_string(i64::MAX), "NONE");
        assert_eq!(error_string(-6), "UNKNOWN");
        assert_eq!(error_string(i64::MIN), "UNKNOWN");
    }

    #[test]
    fn status_enum_matches_codes() {
        for code in [NOT_CONNECTED, BACK_PRESSURED, ADMIN_ACTION, CLOSED, MAX_POSITION_EXCEEDED] {
            let status = PublicationStatus::from_position(code).unwrap();
            assert_eq!(status.code(), code);
            assert_eq!(status.to_string(), error_string(code));
        }
        assert_eq!(PublicationStatus::from_position(128), None);
        assert!(PublicationStatus::AdminAction.is_retryable());
        assert!(!PublicationStatus::Closed.is_retryable());
        assert!(!PublicationStatus::MaxPositionExceeded.is_retryable());
    }

    #[test]
    fn capacity_limits_follow_the_log() {
        let fixture = fixture(&LOW_LATENCY_CONFIG);
        let publication = publication(&fixture);

        assert_eq!(publication.term_buffer_length(), 64 * 1024);
        assert_eq!(publication.position_bits_to_shift(), 16);
        assert_eq!(publication.max_possible_position(), (64 * 1024i64) << 31);
        assert_eq!(publication.max_payload_length(), 1408 - 32);
        assert_eq!(publication.max_message_length(), 8 * 1024);
        assert!(!publication.is_original());
        assert_eq!(publication.position_limit_id(), 1);
        assert_eq!(publication.channel(), "aeron:ipc");
    }

    #[test]
    fn gathered_length_sums_every_part() {
        let parts: [&[u8]; 2] = [&[0u8; 4], &[0u8; 6]];
        assert_eq!(PublicationCore::validate_and_compute_length(&parts).unwrap(), 10);
        assert_eq!(PublicationCore::validate_and_compute_length(&[]).unwrap(), 0);
    }

    #[test]
    fn gathered_length_overflow_is_rejected() {
        // zeroed allocation, pages are never touched
        let half = vec![0u8; (1 << 30) + 1];
        let fixture = fixture(&LOW_LATENCY_CONFIG);

        let concurrent = publication(&fixture);
        assert!(matches!(
            concurrent.offer_two(&half, &half),
            Err(Error::LengthOverflow(2_147_483_650))
        ));
        assert_eq!(concurrent.position(), 0);

        let exclusive = ExclusivePublication::new(
            fixture.conductor.clone(),
            fixture.registration.clone(),
            fixture.log.clone(),
            fixture.limit.clone(),
        )
        .unwrap();
        assert!(matches!(
            exclusive.offer_two(&half, &half),
            Err(Error::LengthOverflow(2_147_483_650))
        ));
        assert_eq!(exclusive.position(), 0);
    }

    #[test]
    fn close_is_idempotent_and_acknowledged_once() {
        let fixture = fixture(&LOW_LATENCY_CONFIG);
        let publication = publication(&fixture);

        publication.close().unwrap();
        publication.close().unwrap();
        assert!(publication.is_closed());
        assert_eq!(fixture.conductor.commands(), vec![Command::RemovePublication(REGISTRATION_ID)]);
    }

    #[test]
    fn failed_removal_leaves_publication_open() {
        let mut fixture = fixture(&LOW_LATENCY_CONFIG);
        fixture.conductor = Arc::new(RecordingConductor::rejecting_removal());
        let publication = publication(&fixture);

        assert!(matches!(publication.close(), Err(Error::Conductor(_))));
        assert!(!publication.is_closed());
        assert!(publication.offer(b"still open").unwrap() > 0);
    }

    #[test]
    fn closed_publication_reports_closed_everywhere() {
        let fixture = fixture(&LOW_LATENCY_CONFIG);
        crate::log_buffer::set_connected(fixture.log.meta_data_buffer(), true);
        let publication = publication(&fixture);
        assert!(publication.is_connected());
        assert_eq!(publication.channel_status(), channel_endpoint_status::ACTIVE);

        publication.core().internal_close();

        assert!(!publication.is_connected());
        assert_eq!(publication.position(), CLOSED);
        assert_eq!(publication.position_limit(), CLOSED);
        assert_eq!(publication.available_window(), CLOSED);
        assert_eq!(publication.channel_status(), channel_endpoint_status::NO_ID_ALLOCATED);
        assert!(publication.local_socket_addresses().is_empty());
    }

    #[test]
    fn destinations_are_forwarded_with_the_right_registration() {
        let fixture = fixture(&LOW_LATENCY_CONFIG);
        let publication = publication(&fixture);

        publication.add_destination("aeron:udp?endpoint=host:4000").unwrap();
        publication.remove_destination("aeron:udp?endpoint=host:4000").unwrap();
        publication.remove_destination_by_id(99).unwrap();
        let first = publication.async_add_destination("aeron:udp?endpoint=host:4001").unwrap();
        let second = publication.async_remove_destination_by_id(98).unwrap();
        assert_ne!(first, second);

        assert_eq!(
            fixture.conductor.commands(),
            vec![
                Command::AddDestination(ORIGINAL_REGISTRATION_ID, "aeron:udp?endpoint=host:4000".into()),
                Command::RemoveDestination(ORIGINAL_REGISTRATION_ID, "aeron:udp?endpoint=host:4000".into()),
                Command::RemoveDestinationById(ORIGINAL_REGISTRATION_ID, 99),
                Command::AddDestination(REGISTRATION_ID, "aeron:udp?endpoint=host:4001".into()),
                Command::RemoveDestinationById(REGISTRATION_ID, 98),
            ]
        );
    }

    #[test]
    fn destination_commands_fail_after_close() {
        let fixture = fixture(&LOW_LATENCY_CONFIG);
        let publication = publication(&fixture);
        publication.close().unwrap();

        assert!(matches!(publication.add_destination("x"), Err(Error::PublicationClosed)));
        assert!(matches!(publication.remove_destination("x"), Err(Error::PublicationClosed)));
        assert!(matches!(publication.remove_destination_by_id(1), Err(Error::PublicationClosed)));
        assert!(matches!(publication.async_add_destination("x"), Err(Error::PublicationClosed)));
        assert!(matches!(publication.async_remove_destination("x"), Err(Error::PublicationClosed)));
        assert!(matches!(publication.async_remove_destination_by_id(1), Err(Error::PublicationClosed)));
        assert_eq!(fixture.conductor.commands().len(), 1);
    }

    #[test]
    fn local_socket_addresses_come_from_the_conductor() {
        let fixture = fixture(&LOW_LATENCY_CONFIG);
        let publication = publication(&fixture);
        assert_eq!(publication.local_socket_addresses(), vec!["127.0.0.1:40123".to_string()]);
    }

    #[test]
    fn display_renders_identity_and_position() {
        let fixture = fixture(&LOW_LATENCY_CONFIG.with_session_id(21).with_stream_id(1001));
        let publication = publication(&fixture);
        let rendered = publication.to_string();

        assert!(rendered.starts_with("ConcurrentPublication{"));
        assert!(rendered.contains("registration_id=7"));
        assert!(rendered.contains("session_id=21"));
        assert!(rendered.contains("stream_id=1001"));
        assert!(rendered.contains("position=0"));
    }
}
