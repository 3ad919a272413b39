//! The log buffer: three rotating term partitions plus a metadata partition.
//!
//! # Layout
//!
//! ```text
//! +----------------------------+
//! |           Term 0           |  term_length bytes
//! +----------------------------+
//! |           Term 1           |  term_length bytes
//! +----------------------------+
//! |           Term 2           |  term_length bytes
//! +----------------------------+
//! |          Metadata          |  LOG_META_DATA_LENGTH bytes
//! +----------------------------+
//! ```
//!
//! The metadata partition:
//!
//! ```text
//!   0  raw tail, partition 0      (i64)
//!   8  raw tail, partition 1      (i64)
//!  16  raw tail, partition 2      (i64)
//!  24  active term count          (i32)
//! 128  end of stream position     (i64)
//! 136  is connected               (i32)
//! 140  active transport count     (i32)
//! 256  correlation id             (i64)
//! 264  initial term id            (i32)
//! 268  default frame header len   (i32)
//! 272  mtu length                 (i32)
//! 276  term length                (i32)
//! 280  page size                  (i32)
//! 384  default frame header       (HEADER_LENGTH bytes)
//! ```
//!
//! The tail counters and active term count are the only fields a publication
//! writes. Everything else is owned by the driver.
//!
//! # Rotation
//!
//! Exactly one partition is active: `active_term_count % PARTITION_COUNT`.
//! When a reservation overruns the end of the active term, the writer that
//! observed the overrun calls [`rotate_log`], which moves the next partition's
//! tail to `(term_id + 1, 0)` and advances the active term count. Both steps
//! are compare-and-set, so racing writers that also observed the overrun
//! become no-ops.

use crate::atomic_buffer::AtomicBuffer;
use crate::config::LogBufferConfig;
use crate::error::{Error, Result};
use crate::frame::{HEADER_LENGTH, write_default_header};
use crate::mmap::{map_shared_file, unmap_shared_file};
use crate::position::{check_term_length, pack_tail, term_id};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

pub const PARTITION_COUNT: usize = 3;

pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_TERM_COUNT_OFFSET: usize = TERM_TAIL_COUNTERS_OFFSET + PARTITION_COUNT * 8;
pub const LOG_END_OF_STREAM_POSITION_OFFSET: usize = 128;
pub const LOG_IS_CONNECTED_OFFSET: usize = LOG_END_OF_STREAM_POSITION_OFFSET + 8;
pub const LOG_ACTIVE_TRANSPORT_COUNT_OFFSET: usize = LOG_IS_CONNECTED_OFFSET + 4;
pub const LOG_CORRELATION_ID_OFFSET: usize = 256;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = LOG_CORRELATION_ID_OFFSET + 8;
pub const LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET: usize = LOG_INITIAL_TERM_ID_OFFSET + 4;
pub const LOG_MTU_LENGTH_OFFSET: usize = LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET + 4;
pub const LOG_TERM_LENGTH_OFFSET: usize = LOG_MTU_LENGTH_OFFSET + 4;
pub const LOG_PAGE_SIZE_OFFSET: usize = LOG_TERM_LENGTH_OFFSET + 4;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = 384;
pub const LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH: usize = 128;
pub const LOG_META_DATA_LENGTH: usize = 4096;

// --- metadata field access -------------------------------------------------

#[inline(always)]
pub const fn tail_counter_offset(partition_index: usize) -> usize {
    TERM_TAIL_COUNTERS_OFFSET + partition_index * 8
}

#[inline(always)]
pub fn index_by_term_count(term_count: i32) -> usize {
    (term_count as u32 as usize) % PARTITION_COUNT
}

#[inline(always)]
pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    index_by_term_count(active_term_id.wrapping_sub(initial_term_id))
}

#[inline(always)]
pub fn next_partition_index(current_index: usize) -> usize {
    (current_index + 1) % PARTITION_COUNT
}

#[inline(always)]
pub fn active_term_count(meta: &AtomicBuffer) -> i32 {
    meta.get_i32_volatile(LOG_ACTIVE_TERM_COUNT_OFFSET)
}

#[inline(always)]
pub fn set_active_term_count_ordered(meta: &AtomicBuffer, term_count: i32) {
    meta.put_i32_ordered(LOG_ACTIVE_TERM_COUNT_OFFSET, term_count);
}

#[inline(always)]
pub fn cas_active_term_count(meta: &AtomicBuffer, expected: i32, update: i32) -> bool {
    meta.compare_and_set_i32(LOG_ACTIVE_TERM_COUNT_OFFSET, expected, update)
}

#[inline(always)]
pub fn raw_tail_volatile_at(meta: &AtomicBuffer, partition_index: usize) -> i64 {
    meta.get_i64_volatile(tail_counter_offset(partition_index))
}

/// Raw tail of the active partition.
#[inline(always)]
pub fn raw_tail_volatile(meta: &AtomicBuffer) -> i64 {
    raw_tail_volatile_at(meta, index_by_term_count(active_term_count(meta)))
}

#[inline(always)]
pub fn cas_raw_tail(meta: &AtomicBuffer, partition_index: usize, expected: i64, update: i64) -> bool {
    meta.compare_and_set_i64(tail_counter_offset(partition_index), expected, update)
}

/// Sets a partition's tail to the start of `term_id`.
pub fn initialise_tail_with_term_id(meta: &AtomicBuffer, partition_index: usize, term_id: i32) {
    meta.put_i64_ordered(tail_counter_offset(partition_index), pack_tail(term_id, 0));
}

#[inline(always)]
pub fn is_connected(meta: &AtomicBuffer) -> bool {
    meta.get_i32_volatile(LOG_IS_CONNECTED_OFFSET) == 1
}

pub fn set_connected(meta: &AtomicBuffer, connected: bool) {
    meta.put_i32_ordered(LOG_IS_CONNECTED_OFFSET, connected as i32);
}

pub fn end_of_stream_position(meta: &AtomicBuffer) -> i64 {
    meta.get_i64_volatile(LOG_END_OF_STREAM_POSITION_OFFSET)
}

pub fn active_transport_count(meta: &AtomicBuffer) -> i32 {
    meta.get_i32_volatile(LOG_ACTIVE_TRANSPORT_COUNT_OFFSET)
}

pub fn initial_term_id(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

pub fn mtu_length(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_MTU_LENGTH_OFFSET)
}

pub fn term_length(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_TERM_LENGTH_OFFSET)
}

pub fn page_size(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_PAGE_SIZE_OFFSET)
}

pub fn correlation_id(meta: &AtomicBuffer) -> i64 {
    meta.get_i64(LOG_CORRELATION_ID_OFFSET)
}

/// View of the default frame header template stored in metadata.
pub fn default_frame_header(meta: &AtomicBuffer) -> AtomicBuffer {
    meta.view(LOG_DEFAULT_FRAME_HEADER_OFFSET, HEADER_LENGTH as usize)
}

/// Moves the log from `current_term_id` to the next term.
///
/// The next partition's tail is only reset if it still holds the term that
/// last used that partition (`current_term_id + 1 - PARTITION_COUNT`), so a
/// duplicate call after another writer already rotated leaves it alone.
/// Returns `true` if this call advanced the active term count.
pub fn rotate_log(meta: &AtomicBuffer, current_term_count: i32, current_term_id: i32) -> bool {
    let next_term_id = current_term_id.wrapping_add(1);
    let next_term_count = current_term_count.wrapping_add(1);
    let next_index = index_by_term_count(next_term_count);
    let expected_term_id = next_term_id.wrapping_sub(PARTITION_COUNT as i32);

    loop {
        let raw_tail = raw_tail_volatile_at(meta, next_index);
        if expected_term_id != term_id(raw_tail) {
            break;
        }
        if cas_raw_tail(meta, next_index, raw_tail, pack_tail(next_term_id, 0)) {
            break;
        }
    }

    let rotated = cas_active_term_count(meta, current_term_count, next_term_count);
    if rotated {
        tracing::trace!(next_term_id, next_term_count, "rotated log");
    }
    rotated
}

/// Writes a fresh metadata partition for `config`, as the driver does when
/// it creates a log.
///
/// Partition 0 starts at `initial_term_id`; partitions 1 and 2 hold the term
/// ids that would have preceded them so that rotation into them succeeds.
pub fn initialise_meta_data(meta: &AtomicBuffer, config: &LogBufferConfig) {
    meta.set_memory(0, LOG_META_DATA_LENGTH, 0);
    meta.put_i64(LOG_END_OF_STREAM_POSITION_OFFSET, i64::MAX);
    meta.put_i64(LOG_CORRELATION_ID_OFFSET, config.correlation_id);
    meta.put_i32(LOG_INITIAL_TERM_ID_OFFSET, config.initial_term_id);
    meta.put_i32(LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET, HEADER_LENGTH);
    meta.put_i32(LOG_MTU_LENGTH_OFFSET, config.mtu_length);
    meta.put_i32(LOG_TERM_LENGTH_OFFSET, config.term_length);
    meta.put_i32(LOG_PAGE_SIZE_OFFSET, config.page_size);
    write_default_header(&default_frame_header(meta), config.session_id, config.stream_id);

    initialise_tail_with_term_id(meta, 0, config.initial_term_id);
    for i in 1..PARTITION_COUNT {
        let expected = config
            .initial_term_id
            .wrapping_sub(PARTITION_COUNT as i32)
            .wrapping_add(i as i32);
        initialise_tail_with_term_id(meta, i, expected);
    }
    set_active_term_count_ordered(meta, 0);
}

// --- storage ---------------------------------------------------------------

/// Backing memory of a log.
///
/// Implementors own (or map) a contiguous, 8-byte aligned region that stays
/// valid and at a fixed address for as long as the implementor is alive.
pub trait LogStorage: Send + Sync + Debug {
    fn ptr(&self) -> NonNull<u8>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Heap-allocated log, for an in-process driver or for tests.
#[derive(Debug)]
pub struct HeapLog {
    /// Owns the memory. `u64` elements give the region 8-byte alignment.
    _boxed: Box<[u64]>,
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for HeapLog {}
unsafe impl Sync for HeapLog {}

impl HeapLog {
    fn zeroed(len: usize) -> Self {
        let mut boxed = vec![0u64; len.div_ceil(8)].into_boxed_slice();
        let ptr = NonNull::from(&mut boxed[..]).cast::<u8>();
        Self {
            _boxed: boxed,
            ptr,
            len,
        }
    }
}

impl LogStorage for HeapLog {
    #[inline(always)]
    fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.len
    }
}

/// Log file mapped shared from disk (typically under `/dev/shm`).
///
/// Unmapped on drop.
#[derive(Debug)]
pub struct MappedLog {
    ptr: NonNull<u8>,
    len: usize,
    path: PathBuf,
}

unsafe impl Send for MappedLog {}
unsafe impl Sync for MappedLog {}

impl MappedLog {
    fn map(file: &File, len: usize, path: &Path) -> Result<Self> {
        let ptr = map_shared_file(file, len).map_err(|source| Error::Map {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            ptr,
            len,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStorage for MappedLog {
    #[inline(always)]
    fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MappedLog {
    fn drop(&mut self) {
        if let Err(e) = unsafe { unmap_shared_file(self.ptr, self.len) } {
            tracing::error!(path = %self.path.display(), error = %e, "failed to unmap log");
        }
    }
}

// --- LogBuffers ------------------------------------------------------------

/// Client-side view over a log: one [`AtomicBuffer`] per term plus the
/// metadata buffer, all pointing into storage this value keeps alive.
///
/// Shared between the conductor and its publications through an `Arc`. The
/// views handed out are only valid while that `Arc` is held.
#[derive(Debug)]
pub struct LogBuffers {
    storage: Box<dyn LogStorage>,
    term_length: i32,
    terms: [AtomicBuffer; PARTITION_COUNT],
    meta: AtomicBuffer,
}

impl LogBuffers {
    fn wrap(storage: Box<dyn LogStorage>, term_length: i32) -> Self {
        let whole = unsafe { AtomicBuffer::new(storage.ptr(), storage.len()) };
        let term_len = term_length as usize;
        let terms = std::array::from_fn(|i| whole.view(i * term_len, term_len));
        let meta = whole.view(PARTITION_COUNT * term_len, LOG_META_DATA_LENGTH);
        Self {
            storage,
            term_length,
            terms,
            meta,
        }
    }

    /// Allocates and initialises a log on the heap.
    pub fn in_memory(config: &LogBufferConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let storage = HeapLog::zeroed(config.log_length());
        let log = Self::wrap(Box::new(storage), config.term_length);
        initialise_meta_data(&log.meta, config);
        tracing::debug!(
            term_length = config.term_length,
            mtu_length = config.mtu_length,
            initial_term_id = config.initial_term_id,
            "created in-memory log"
        );
        Ok(Arc::new(log))
    }

    /// Creates (or truncates) a log file at `path`, maps it and initialises it.
    pub fn create(path: impl AsRef<Path>, config: &LogBufferConfig) -> Result<Arc<Self>> {
        let path = path.as_ref();
        config.validate()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| Error::Map {
                path: path.to_path_buf(),
                source,
            })?;
        file.set_len(config.log_length() as u64)?;

        let storage = MappedLog::map(&file, config.log_length(), path)?;
        let log = Self::wrap(Box::new(storage), config.term_length);
        initialise_meta_data(&log.meta, config);
        tracing::debug!(path = %path.display(), term_length = config.term_length, "created log file");
        Ok(Arc::new(log))
    }

    /// Maps an existing log file created by the driver.
    ///
    /// The term length is derived from the file length and must agree with
    /// the term length recorded in metadata.
    pub fn map_existing(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Map {
                path: path.to_path_buf(),
                source,
            })?;
        let log_length = file.metadata()?.len() as usize;
        if log_length <= LOG_META_DATA_LENGTH
            || (log_length - LOG_META_DATA_LENGTH) % PARTITION_COUNT != 0
        {
            return Err(Error::MalformedLog(format!(
                "log length {} is not three terms plus metadata",
                log_length
            )));
        }

        let derived_term_length = (log_length - LOG_META_DATA_LENGTH) / PARTITION_COUNT;
        check_term_length(derived_term_length as i64)?;

        let storage = MappedLog::map(&file, log_length, path)?;
        let log = Self::wrap(Box::new(storage), derived_term_length as i32);
        let recorded = term_length(&log.meta);
        if recorded as usize != derived_term_length {
            return Err(Error::MalformedLog(format!(
                "metadata term length {} does not match mapped term length {}",
                recorded, derived_term_length
            )));
        }
        crate::config::check_mtu_length(mtu_length(&log.meta), recorded)?;

        tracing::debug!(path = %path.display(), term_length = recorded, "mapped log file");
        Ok(Arc::new(log))
    }

    #[inline(always)]
    pub fn term_length(&self) -> i32 {
        self.term_length
    }

    #[inline(always)]
    pub fn term_buffers(&self) -> &[AtomicBuffer; PARTITION_COUNT] {
        &self.terms
    }

    #[inline(always)]
    pub fn meta_data_buffer(&self) -> &AtomicBuffer {
        &self.meta
    }

    /// Total mapped length in bytes.
    pub fn log_length(&self) -> usize {
        self.storage.len()
    }
}
