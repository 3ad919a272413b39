//! # HFT Publication
//!
//! Publisher side of a shared-memory message log, for low-latency messaging
//! between threads and processes.
//!
//! A log is three equally sized *term* partitions followed by a metadata
//! partition. A publication appends framed messages to the active term and
//! rotates to the next one when it fills up; a driver (in this process or
//! another one mapping the same file) reads the frames and moves them on.
//! The driver also owns flow control: it publishes a position limit that the
//! publication must not write past.
//!
//! Every write is non-blocking. Instead of waiting, `offer` and `try_claim`
//! return a negative status code saying why nothing was written
//! (see [`publication`]), and the caller decides whether to retry.
//!
//! ## Publications
//!
//! - [`ConcurrentPublication`]: any number of writers; space is reserved with
//!   an atomic fetch-add on the tail counter.
//! - [`ExclusivePublication`]: a single writer; the tail is advanced with a
//!   plain ordered store and the type is not `Sync`.
//!
//! Both implement [`Publication`], which offers copying writes (single buffer,
//! two buffers, or a vector of buffers, fragmented across frames when larger
//! than one MTU) and zero-copy writes through a [`BufferClaim`].
//!
//! ## Memory ordering
//!
//! Frames become visible through their length field: the header is stamped
//! with a negative length, the payload is copied, and the positive length is
//! published with a release store. A reader acquiring a positive length sees
//! the whole frame.
//!
//! ## Modules
//!
//! - [`atomic_buffer`]: bounds-checked view over shared memory with atomic
//!   accessors.
//! - [`position`]: stream position arithmetic.
//! - [`frame`]: frame header layout and the header writer.
//! - [`config`]: log geometry and its validation.
//! - [`log_buffer`]: log layout, metadata fields, rotation and storage.
//! - [`counters`]: position limit counters published by the driver.
//! - [`term_appender`]: reserving space in a term and writing frames.
//! - [`buffer_claim`]: zero-copy claim handle.
//! - [`conductor`]: control-plane commands a publication forwards.
//! - [`publication`]: the publication contract and status codes.
//! - [`concurrent_publication`], [`exclusive_publication`]: the two writers.
//! - [`error`]: the crate error type.
//! - [`utils`]: benchmarking helpers.
//!
//! ## License
//!
//! Copyright © 2005–2025
//! IKH Software, Inc.
//!
//! Licensed under the terms of the **GNU Lesser General Public License**,
//! version 3.0, or (at your option) any later version.
//!
//! See <https://www.gnu.org/licenses/lgpl-3.0.html> for details.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

#[cfg(not(target_endian = "little"))]
compile_error!("The log format is little-endian; big-endian targets are not supported.");

pub mod atomic_buffer;
pub mod buffer_claim;
pub mod concurrent_publication;
pub mod conductor;
pub mod config;
pub mod counters;
pub mod error;
pub mod exclusive_publication;
pub mod frame;
pub mod log_buffer;
mod mmap;
pub mod position;
pub mod publication;
pub mod term_appender;
pub mod utils;

pub use atomic_buffer::AtomicBuffer;
pub use buffer_claim::BufferClaim;
pub use concurrent_publication::ConcurrentPublication;
pub use conductor::{Conductor, channel_endpoint_status};
pub use config::{HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG, LogBufferConfig};
pub use counters::{AtomicPosition, CounterPosition, ReadablePosition};
pub use error::{Error, Result};
pub use exclusive_publication::ExclusivePublication;
pub use log_buffer::LogBuffers;
pub use publication::{
    ADMIN_ACTION, BACK_PRESSURED, CLOSED, MAX_POSITION_EXCEEDED, NOT_CONNECTED, Publication,
    PublicationStatus, Registration, ReservedValueSupplier, error_string,
};
pub use utils::{LatencySamples, LatencySummary, mono_time_ns};
