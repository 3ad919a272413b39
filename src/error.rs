//! Error type for caller-contract violations and construction failures.
//!
//! Operational conditions on the hot path (back-pressure, disconnection,
//! rotation, exhaustion, closed) are **not** errors: they come back from
//! `offer`/`try_claim` as negative positions. Everything here indicates either
//! a programming error by the caller or a log buffer that cannot be used at all.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by publications, claims and log buffer construction.
#[derive(Error, Debug)]
pub enum Error {
    /// A length argument was negative.
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// A claim asked for more than fits in a single frame.
    #[error("claim exceeds max payload length of {max_payload_length}, length={length}")]
    PayloadTooLong {
        length: i64,
        max_payload_length: i32,
    },

    /// An offer asked for more than the term can carry as one message.
    #[error("message exceeds max message length of {max_message_length}, length={length}")]
    MessageTooLong {
        length: i64,
        max_message_length: i32,
    },

    /// The summed lengths of a gathered offer do not fit a signed 32-bit length.
    #[error("overflow of total length: {0}")]
    LengthOverflow(u64),

    /// A destination command or claim finalisation was attempted after close.
    #[error("publication is closed")]
    PublicationClosed,

    /// `commit`/`abort` was called on a claim that holds no reserved frame.
    #[error("buffer claim is not active")]
    ClaimNotActive,

    /// `try_claim` was handed a claim whose frame is still open.
    #[error("buffer claim already holds an open frame")]
    ClaimActive,

    /// A counter id does not address a record inside the values buffer.
    #[error("counter id {id} is outside a values buffer of {capacity} bytes")]
    InvalidCounterId { id: i32, capacity: usize },

    /// Term length is not a power of two or is outside the supported range.
    #[error("invalid term length {term_length}: {reason}")]
    InvalidTermLength { term_length: i64, reason: &'static str },

    /// MTU cannot frame at least one aligned payload.
    #[error("invalid mtu length {mtu_length}: {reason}")]
    InvalidMtuLength { mtu_length: i32, reason: &'static str },

    /// Page size is not a power of two or is below the minimum.
    #[error("invalid page size {page_size}: {reason}")]
    InvalidPageSize { page_size: i32, reason: &'static str },

    /// Metadata found in a mapped log disagrees with the mapping itself.
    #[error("malformed log metadata: {0}")]
    MalformedLog(String),

    /// The active term count does not match the tail of the active partition.
    #[error("active term count {term_count} does not match term id {term_id} (initial {initial_term_id})")]
    TermCountMismatch {
        term_count: i32,
        term_id: i32,
        initial_term_id: i32,
    },

    /// The conductor rejected or failed a command.
    #[error("conductor: {0}")]
    Conductor(String),

    /// Mapping or unmapping a log file failed.
    #[error("failed to map log at {path}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, Error>;
