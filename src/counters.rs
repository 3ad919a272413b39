//! Position counters supplied by the driver.
//!
//! A publication never computes its own flow-control limit. The driver
//! publishes it in a counter and the publication only reads it, with acquire
//! semantics, before every write attempt.

use crate::atomic_buffer::AtomicBuffer;
use crate::error::{Error, Result};
use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicI64, Ordering};
use std::fmt::Debug;
use std::sync::Arc;

/// Length of one counter record in a counters values buffer.
pub const COUNTER_LENGTH: usize = 128;

/// A counter a publication can read but not write.
pub trait ReadablePosition: Send + Sync + Debug {
    /// Counter id, as registered with the driver.
    fn id(&self) -> i32;

    /// Current value with acquire semantics.
    fn get_volatile(&self) -> i64;
}

/// Process-local position counter.
///
/// Used when the limit is maintained in the same process (an embedded
/// driver, or tests). Cache padded because every offer reads it while the
/// limit owner keeps advancing it.
#[derive(Debug)]
pub struct AtomicPosition {
    id: i32,
    value: CachePadded<AtomicI64>,
}

impl AtomicPosition {
    pub fn new(id: i32, initial: i64) -> Arc<Self> {
        Arc::new(Self {
            id,
            value: CachePadded::new(AtomicI64::new(initial)),
        })
    }

    /// Publishes a new limit.
    pub fn set_ordered(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }
}

impl ReadablePosition for AtomicPosition {
    #[inline(always)]
    fn id(&self) -> i32 {
        self.id
    }

    #[inline(always)]
    fn get_volatile(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Counter record inside a shared counters values buffer.
#[derive(Debug, Clone, Copy)]
pub struct CounterPosition {
    id: i32,
    offset: usize,
    values: AtomicBuffer,
}

impl CounterPosition {
    /// Views counter `id` in `values`.
    ///
    /// `values` must outlive the returned counter; it is normally a view into
    /// a counters file the conductor keeps mapped.
    pub fn new(values: AtomicBuffer, id: i32) -> Result<Self> {
        let offset = usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_mul(COUNTER_LENGTH))
            .filter(|offset| offset.checked_add(COUNTER_LENGTH).is_some_and(|end| end <= values.capacity()))
            .ok_or(Error::InvalidCounterId {
                id,
                capacity: values.capacity(),
            })?;
        Ok(Self { id, offset, values })
    }

    pub fn set_ordered(&self, value: i64) {
        self.values.put_i64_ordered(self.offset, value);
    }
}

impl ReadablePosition for CounterPosition {
    #[inline(always)]
    fn id(&self) -> i32 {
        self.id
    }

    #[inline(always)]
    fn get_volatile(&self) -> i64 {
        self.values.get_i64_volatile(self.offset)
    }
}
