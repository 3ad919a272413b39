use std::fs::File;
use std::os::fd::AsRawFd;
use std::ptr::NonNull;

/// Maps `size` bytes of `file` as shared, read-write memory.
///
/// The mapping stays valid after `file` is closed.
pub(crate) fn map_shared_file(file: &File, size: usize) -> Result<NonNull<u8>, std::io::Error> {
    if size == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "cannot map an empty log",
        ));
    }

    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }

    NonNull::new(addr.cast::<u8>()).ok_or_else(|| std::io::Error::other("mmap returned null"))
}

/// Unmaps a region previously returned by [`map_shared_file`].
///
/// # Safety
///
/// `ptr`/`size` must describe exactly one live mapping and no view into it
/// may be used afterwards.
pub(crate) unsafe fn unmap_shared_file(ptr: NonNull<u8>, size: usize) -> Result<(), std::io::Error> {
    unsafe {
        if libc::munmap(ptr.as_ptr().cast(), size) == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
