use crate::atomic_buffer::AtomicBuffer;
use crate::error::{Error, Result};
use crate::frame::{
    FLAGS_OFFSET, HDR_TYPE_PAD, HEADER_LENGTH, RESERVED_VALUE_OFFSET, TYPE_OFFSET,
    frame_length_ordered, frame_type,
};
use crate::log_buffer::LogBuffers;
use std::marker::PhantomData;

/// Zero-copy write handle for a frame reserved with `try_claim`.
///
/// After a successful claim the frame header is already stamped and its
/// length is negative, so nothing downstream will read it. The caller writes
/// the payload in place and then calls exactly one of:
///
/// - [`commit`](Self::commit): publishes the positive frame length,
/// - [`abort`](Self::abort): turns the frame into padding and publishes it.
///
/// Either call releases the frame; a second call fails with
/// [`Error::ClaimNotActive`]. The same handle can then be passed to the next
/// `try_claim`; passing it while its frame is still open fails with
/// [`Error::ClaimActive`].
///
/// The `'a` lifetime ties the handle to the publication that filled it, which
/// keeps the underlying log mapped while the claim is in use.
///
/// A claim left open long enough is padded over by the driver; committing it
/// afterwards corrupts nothing but the caller's own data.
#[derive(Debug, Default)]
pub struct BufferClaim<'a> {
    frame: Option<AtomicBuffer>,
    _log: PhantomData<&'a LogBuffers>,
}

impl<'a> BufferClaim<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points the claim at `frame_length` bytes at `frame_offset` in `term_buffer`.
    #[inline(always)]
    pub(crate) fn wrap(&mut self, term_buffer: &AtomicBuffer, frame_offset: usize, frame_length: usize) {
        self.frame = Some(term_buffer.view(frame_offset, frame_length));
    }

    /// Whether the claim holds a frame that has not been committed or aborted.
    pub fn is_active(&self) -> bool {
        self.frame.is_some()
    }

    /// The whole frame, header included.
    pub fn buffer(&self) -> Option<&AtomicBuffer> {
        self.frame.as_ref()
    }

    /// Offset of the payload within [`buffer`](Self::buffer).
    pub fn offset(&self) -> usize {
        HEADER_LENGTH as usize
    }

    /// Payload length in bytes, 0 when inactive.
    pub fn length(&self) -> usize {
        self.frame
            .map_or(0, |frame| frame.capacity() - HEADER_LENGTH as usize)
    }

    /// The claimed payload as a mutable slice (empty when inactive).
    pub fn payload_mut(&mut self) -> &mut [u8] {
        match &self.frame {
            // SAFETY: the range was reserved by a tail advance made for this
            // claim and nothing else writes it until commit/abort.
            Some(frame) => unsafe { &mut frame.as_mut_slice()[HEADER_LENGTH as usize..] },
            None => &mut [],
        }
    }

    /// Copies `src` into the payload at `offset`.
    pub fn put_bytes(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let frame = self.active()?;
        let end = offset.checked_add(src.len());
        if end.is_none_or(|end| end > frame.capacity() - HEADER_LENGTH as usize) {
            return Err(Error::InvalidLength(src.len() as i64));
        }
        frame.put_bytes(HEADER_LENGTH as usize + offset, src);
        Ok(())
    }

    pub fn flags(&self) -> Result<u8> {
        Ok(self.active()?.get_u8(FLAGS_OFFSET))
    }

    pub fn set_flags(&mut self, flags: u8) -> Result<()> {
        self.active()?.put_u8(FLAGS_OFFSET, flags);
        Ok(())
    }

    pub fn header_type(&self) -> Result<u16> {
        Ok(self.active()?.get_u16(TYPE_OFFSET))
    }

    pub fn set_header_type(&mut self, header_type: u16) -> Result<()> {
        self.active()?.put_u16(TYPE_OFFSET, header_type);
        Ok(())
    }

    pub fn reserved_value(&self) -> Result<i64> {
        Ok(self.active()?.get_i64(RESERVED_VALUE_OFFSET))
    }

    pub fn set_reserved_value(&mut self, value: i64) -> Result<()> {
        self.active()?.put_i64(RESERVED_VALUE_OFFSET, value);
        Ok(())
    }

    /// Makes the frame visible.
    pub fn commit(&mut self) -> Result<()> {
        let frame = self.frame.take().ok_or(Error::ClaimNotActive)?;
        frame_length_ordered(&frame, 0, frame.capacity() as i32);
        Ok(())
    }

    /// Releases the frame as padding so readers skip it.
    pub fn abort(&mut self) -> Result<()> {
        let frame = self.frame.take().ok_or(Error::ClaimNotActive)?;
        frame_type(&frame, 0, HDR_TYPE_PAD);
        frame_length_ordered(&frame, 0, frame.capacity() as i32);
        Ok(())
    }

    #[inline(always)]
    fn active(&self) -> Result<AtomicBuffer> {
        self.frame.ok_or(Error::ClaimNotActive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{HDR_TYPE_DATA, UNFRAGMENTED, frame_length_volatile};
    use std::ptr::NonNull;

    fn wrap(storage: &mut [u64]) -> AtomicBuffer {
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe { AtomicBuffer::new(ptr, storage.len() * 8) }
    }

    fn stamped(term: &AtomicBuffer, offset: usize, frame_length: i32) {
        term.put_i32(offset, -frame_length);
        term.put_u8(offset + FLAGS_OFFSET, UNFRAGMENTED);
        term.put_u16(offset + TYPE_OFFSET, HDR_TYPE_DATA);
    }

    #[test]
    fn inactive_claim_rejects_finalisation() {
        let mut claim = BufferClaim::new();
        assert!(!claim.is_active());
        assert_eq!(claim.length(), 0);
        assert!(claim.payload_mut().is_empty());
        assert!(matches!(claim.commit(), Err(Error::ClaimNotActive)));
        assert!(matches!(claim.abort(), Err(Error::ClaimNotActive)));
        assert!(matches!(claim.flags(), Err(Error::ClaimNotActive)));
    }

    #[test]
    fn commit_publishes_positive_length_once() {
        let mut storage = vec![0u64; 32];
        let term = wrap(&mut storage);
        stamped(&term, 64, 72);

        let mut claim = BufferClaim::new();
        claim.wrap(&term, 64, 72);
        assert_eq!(claim.length(), 40);
        assert_eq!(claim.offset(), 32);

        claim.payload_mut()[..3].copy_from_slice(b"abc");
        claim.put_bytes(37, b"xyz").unwrap();
        claim.set_reserved_value(-9).unwrap();
        assert_eq!(frame_length_volatile(&term, 64), -72);

        claim.commit().unwrap();
        assert_eq!(frame_length_volatile(&term, 64), 72);
        assert_eq!(term.get_u16(64 + TYPE_OFFSET), HDR_TYPE_DATA);
        assert_eq!(term.get_i64(64 + RESERVED_VALUE_OFFSET), -9);
        let mut payload = [0u8; 3];
        term.get_bytes(96, &mut payload);
        assert_eq!(&payload, b"abc");
        term.get_bytes(96 + 37, &mut payload);
        assert_eq!(&payload, b"xyz");

        assert!(!claim.is_active());
        assert!(matches!(claim.commit(), Err(Error::ClaimNotActive)));
    }

    #[test]
    fn abort_publishes_padding() {
        let mut storage = vec![0u64; 16];
        let term = wrap(&mut storage);
        stamped(&term, 0, 64);

        let mut claim = BufferClaim::new();
        claim.wrap(&term, 0, 64);
        claim.abort().unwrap();

        assert_eq!(frame_length_volatile(&term, 0), 64);
        assert_eq!(term.get_u16(TYPE_OFFSET), HDR_TYPE_PAD);
        assert!(matches!(claim.abort(), Err(Error::ClaimNotActive)));
    }

    #[test]
    fn put_bytes_past_payload_is_rejected() {
        let mut storage = vec![0u64; 16];
        let term = wrap(&mut storage);
        let mut claim = BufferClaim::new();
        claim.wrap(&term, 0, 48);

        assert!(claim.put_bytes(10, &[0u8; 6]).is_ok());
        assert!(matches!(claim.put_bytes(11, &[0u8; 6]), Err(Error::InvalidLength(6))));
    }

    #[test]
    fn header_fields_are_editable_before_commit() {
        let mut storage = vec![0u64; 16];
        let term = wrap(&mut storage);
        stamped(&term, 0, 64);
        let mut claim = BufferClaim::new();
        claim.wrap(&term, 0, 64);

        claim.set_flags(0x80).unwrap();
        claim.set_header_type(0x05).unwrap();
        assert_eq!(claim.flags().unwrap(), 0x80);
        assert_eq!(claim.header_type().unwrap(), 0x05);
    }
}
