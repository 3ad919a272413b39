use portable_atomic::{AtomicI32, AtomicI64, Ordering};
use std::fmt::Debug;
use std::ptr::NonNull;

/// Non-owning, bounds-checked view over a fixed byte region.
///
/// An `AtomicBuffer` never owns the memory it points at. The region is owned
/// by whoever mapped or allocated it (a [`LogBuffers`](crate::LogBuffers), a
/// counters file, a test fixture) and must outlive every view created from it.
/// Views are `Copy` so that a publication can keep one per term partition and
/// hand sub-views to a [`BufferClaim`](crate::BufferClaim) without reference
/// counting on the hot path.
///
/// Every field access goes through a typed helper:
///
/// - plain `get_*`/`put_*` accessors use little-endian byte order and do not
///   require alignment,
/// - `*_volatile` loads use `Acquire`, `*_ordered` stores use `Release`,
/// - `get_and_add_i64` and `compare_and_set_*` are full read-modify-write
///   operations and require natural alignment of the index.
///
/// The region may be concurrently read and written by another process. The
/// view itself imposes no ownership discipline beyond bounds checks; callers
/// must only write into ranges they have reserved through the log protocol.
#[derive(Clone, Copy)]
pub struct AtomicBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
}

unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

impl AtomicBuffer {
    /// Wraps `capacity` bytes starting at `ptr`.
    ///
    /// # Safety
    ///
    /// - `ptr` must be valid for reads and writes of `capacity` bytes for as
    ///   long as this view (or any copy or sub-view of it) is used.
    /// - `ptr` must be aligned to at least 8 bytes so that naturally aligned
    ///   indices can be used for 64-bit atomics.
    #[inline]
    pub unsafe fn new(ptr: NonNull<u8>, capacity: usize) -> Self {
        debug_assert_eq!(ptr.as_ptr() as usize % 8, 0, "base must be 8-byte aligned");
        Self { ptr, capacity }
    }

    /// Length of the region in bytes.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a view of `length` bytes starting at `offset`.
    ///
    /// The sub-view shares the underlying memory. `offset` must keep 8-byte
    /// alignment if the sub-view will be used for 64-bit atomics.
    #[inline]
    pub fn view(&self, offset: usize, length: usize) -> AtomicBuffer {
        self.bounds_check(offset, length);
        Self {
            ptr: unsafe { self.ptr.add(offset) },
            capacity: length,
        }
    }

    #[inline(always)]
    fn bounds_check(&self, index: usize, length: usize) {
        assert!(
            index
                .checked_add(length)
                .is_some_and(|end| end <= self.capacity),
            "index={} length={} capacity={}",
            index,
            length,
            self.capacity
        );
    }

    #[inline(always)]
    fn at(&self, index: usize, length: usize) -> *mut u8 {
        self.bounds_check(index, length);
        unsafe { self.ptr.as_ptr().add(index) }
    }

    #[inline(always)]
    fn atomic_i64(&self, index: usize) -> &AtomicI64 {
        let p = self.at(index, 8);
        assert_eq!(p as usize % 8, 0, "unaligned 64-bit atomic at index {}", index);
        unsafe { AtomicI64::from_ptr(p.cast()) }
    }

    #[inline(always)]
    fn atomic_i32(&self, index: usize) -> &AtomicI32 {
        let p = self.at(index, 4);
        assert_eq!(p as usize % 4, 0, "unaligned 32-bit atomic at index {}", index);
        unsafe { AtomicI32::from_ptr(p.cast()) }
    }

    // --- plain little-endian accessors -------------------------------------

    #[inline(always)]
    pub fn get_u8(&self, index: usize) -> u8 {
        unsafe { self.at(index, 1).read() }
    }

    #[inline(always)]
    pub fn put_u8(&self, index: usize, value: u8) {
        unsafe { self.at(index, 1).write(value) }
    }

    #[inline(always)]
    pub fn get_u16(&self, index: usize) -> u16 {
        u16::from_le(unsafe { self.at(index, 2).cast::<u16>().read_unaligned() })
    }

    #[inline(always)]
    pub fn put_u16(&self, index: usize, value: u16) {
        unsafe { self.at(index, 2).cast::<u16>().write_unaligned(value.to_le()) }
    }

    #[inline(always)]
    pub fn get_i32(&self, index: usize) -> i32 {
        i32::from_le(unsafe { self.at(index, 4).cast::<i32>().read_unaligned() })
    }

    #[inline(always)]
    pub fn put_i32(&self, index: usize, value: i32) {
        unsafe { self.at(index, 4).cast::<i32>().write_unaligned(value.to_le()) }
    }

    #[inline(always)]
    pub fn get_i64(&self, index: usize) -> i64 {
        i64::from_le(unsafe { self.at(index, 8).cast::<i64>().read_unaligned() })
    }

    #[inline(always)]
    pub fn put_i64(&self, index: usize, value: i64) {
        unsafe { self.at(index, 8).cast::<i64>().write_unaligned(value.to_le()) }
    }

    // --- ordered / volatile accessors --------------------------------------

    #[inline(always)]
    pub fn get_i32_volatile(&self, index: usize) -> i32 {
        self.atomic_i32(index).load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn put_i32_ordered(&self, index: usize, value: i32) {
        self.atomic_i32(index).store(value, Ordering::Release)
    }

    #[inline(always)]
    pub fn compare_and_set_i32(&self, index: usize, expected: i32, update: i32) -> bool {
        self.atomic_i32(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline(always)]
    pub fn get_i64_volatile(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn put_i64_ordered(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value, Ordering::Release)
    }

    /// Atomically adds `delta` and returns the previous value.
    #[inline(always)]
    pub fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        self.atomic_i64(index).fetch_add(delta, Ordering::AcqRel)
    }

    #[inline(always)]
    pub fn compare_and_set_i64(&self, index: usize, expected: i64, update: i64) -> bool {
        self.atomic_i64(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // --- bulk --------------------------------------------------------------

    #[inline(always)]
    pub fn put_bytes(&self, index: usize, src: &[u8]) {
        let dst = self.at(index, src.len());
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) }
    }

    #[inline(always)]
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        let src = self.at(index, dst.len());
        unsafe { std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) }
    }

    pub fn set_memory(&self, index: usize, length: usize, value: u8) {
        let dst = self.at(index, length);
        unsafe { std::ptr::write_bytes(dst, value, length) }
    }

    /// Borrows the whole region as a byte slice.
    ///
    /// # Safety
    ///
    /// No other party may write the region while the slice is alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    /// Borrows the whole region as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive write access to the region (for log
    /// partitions: the range was reserved through a tail-counter advance) and
    /// must not create overlapping borrows.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl Debug for AtomicBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backing(words: usize) -> Box<[u64]> {
        vec![0u64; words].into_boxed_slice()
    }

    fn wrap(storage: &mut [u64]) -> AtomicBuffer {
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe { AtomicBuffer::new(ptr, storage.len() * 8) }
    }

    #[test]
    fn plain_accessors_are_little_endian() {
        let mut storage = backing(4);
        let buf = wrap(&mut storage);

        buf.put_i32(0, 0x0403_0201);
        assert_eq!(buf.get_u8(0), 0x01);
        assert_eq!(buf.get_u8(3), 0x04);
        assert_eq!(buf.get_u16(0), 0x0201);

        buf.put_i64(8, -2);
        assert_eq!(buf.get_i64(8), -2);
        assert_eq!(buf.get_i32(8), -2);
        assert_eq!(buf.get_i32(12), -1);

        // unaligned plain access is fine
        buf.put_i32(17, 77);
        assert_eq!(buf.get_i32(17), 77);
    }

    #[test]
    fn get_and_add_returns_previous_value() {
        let mut storage = backing(2);
        let buf = wrap(&mut storage);

        buf.put_i64_ordered(8, 100);
        assert_eq!(buf.get_and_add_i64(8, 32), 100);
        assert_eq!(buf.get_i64_volatile(8), 132);
    }

    #[test]
    fn compare_and_set_only_applies_on_match() {
        let mut storage = backing(2);
        let buf = wrap(&mut storage);

        assert!(buf.compare_and_set_i64(0, 0, 5));
        assert!(!buf.compare_and_set_i64(0, 0, 6));
        assert_eq!(buf.get_i64_volatile(0), 5);

        assert!(buf.compare_and_set_i32(8, 0, 9));
        assert!(!buf.compare_and_set_i32(8, 0, 10));
        assert_eq!(buf.get_i32_volatile(8), 9);
    }

    #[test]
    fn views_share_memory_with_parent() {
        let mut storage = backing(8);
        let buf = wrap(&mut storage);
        let view = buf.view(32, 16);

        view.put_i64(0, 42);
        assert_eq!(buf.get_i64(32), 42);
        assert_eq!(view.capacity(), 16);
    }

    #[test]
    fn bulk_copy_in_and_out() {
        let mut storage = backing(4);
        let buf = wrap(&mut storage);

        buf.put_bytes(3, b"hello");
        let mut out = [0u8; 5];
        buf.get_bytes(3, &mut out);
        assert_eq!(&out, b"hello");

        buf.set_memory(0, 32, 0xAA);
        assert!(unsafe { buf.as_slice() }.iter().all(|b| *b == 0xAA));
    }

    #[test]
    #[should_panic(expected = "capacity=16")]
    fn out_of_bounds_access_panics() {
        let mut storage = backing(2);
        let buf = wrap(&mut storage);
        buf.get_i64(12);
    }

    #[test]
    #[should_panic(expected = "unaligned 64-bit atomic")]
    fn unaligned_atomic_panics() {
        let mut storage = backing(2);
        let buf = wrap(&mut storage);
        buf.get_i64_volatile(4);
    }
}
