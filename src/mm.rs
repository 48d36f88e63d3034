//! Memory-mapping calls, which the kernel does not provide.
//!
//! `mmap` hands out zeroed heap memory and `munmap` frees it; the rest
//! succeed without doing anything. Every call logs a warning, since callers
//! get none of the mapping semantics they asked for.

use core::ffi::c_void;
use rustix::fd::BorrowedFd;
use rustix::io::{self, Errno};
use rustix::mm::{Advice, MapFlags, MprotectFlags, MsyncFlags, ProtFlags};

macro_rules! unimplemented_warning {
    ($name:literal) => {
        #[cfg(feature = "log")]
        log::warn!(concat!("Called unimplemented function ", $name, "()"));
    };
}

/// Allocate `len` zeroed bytes.
///
/// The address hint, protection, flags, file, and offset are ignored; the
/// memory is always private, readable, and writable. Release it with
/// [`munmap`].
pub fn mmap(
    addr: *mut c_void,
    len: usize,
    prot: ProtFlags,
    flags: MapFlags,
    fd: Option<BorrowedFd<'_>>,
    offset: u64,
) -> io::Result<*mut c_void> {
    unimplemented_warning!("mmap");
    let _ = (addr, prot, flags, fd, offset);

    if len == 0 {
        return Err(Errno::INVAL);
    }
    let ptr = unsafe { libc::calloc(1, len) };
    if ptr.is_null() {
        return Err(Errno::NOMEM);
    }
    Ok(ptr)
}

/// Release memory obtained from [`mmap`].
///
/// # Safety
///
/// `addr` must have been returned by [`mmap`] and not released since.
pub unsafe fn munmap(addr: *mut c_void, len: usize) -> io::Result<()> {
    unimplemented_warning!("munmap");
    let _ = len;

    unsafe { libc::free(addr) };
    Ok(())
}

/// Does nothing.
///
/// # Safety
///
/// This is `unsafe` to match the signature of a real `madvise`.
pub unsafe fn madvise(addr: *mut c_void, len: usize, advice: Advice) -> io::Result<()> {
    unimplemented_warning!("madvise");
    let _ = (addr, len, advice);
    Ok(())
}

/// Does nothing.
///
/// # Safety
///
/// This is `unsafe` to match the signature of a real `mlock`.
pub unsafe fn mlock(addr: *mut c_void, len: usize) -> io::Result<()> {
    unimplemented_warning!("mlock");
    let _ = (addr, len);
    Ok(())
}

/// Does nothing.
///
/// # Safety
///
/// This is `unsafe` to match the signature of a real `munlock`.
pub unsafe fn munlock(addr: *mut c_void, len: usize) -> io::Result<()> {
    unimplemented_warning!("munlock");
    let _ = (addr, len);
    Ok(())
}

/// Does nothing.
///
/// # Safety
///
/// This is `unsafe` to match the signature of a real `msync`.
pub unsafe fn msync(addr: *mut c_void, len: usize, flags: MsyncFlags) -> io::Result<()> {
    unimplemented_warning!("msync");
    let _ = (addr, len, flags);
    Ok(())
}

/// Does nothing; the memory stays readable and writable.
///
/// # Safety
///
/// This is `unsafe` to match the signature of a real `mprotect`.
pub unsafe fn mprotect(addr: *mut c_void, len: usize, flags: MprotectFlags) -> io::Result<()> {
    unimplemented_warning!("mprotect");
    let _ = (addr, len, flags);
    Ok(())
}
