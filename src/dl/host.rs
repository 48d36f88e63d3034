//! Forwarding to the host's dynamic loader.

use super::{Library, OpenFlags};
use core::ffi::{CStr, c_int, c_void};
use core::ptr::{NonNull, null};

fn raw_flags(flags: OpenFlags) -> c_int {
    let mut raw = 0;
    if flags.contains(OpenFlags::LAZY) {
        raw |= libc::RTLD_LAZY;
    }
    if flags.contains(OpenFlags::NOW) {
        raw |= libc::RTLD_NOW;
    }
    if flags.contains(OpenFlags::GLOBAL) {
        raw |= libc::RTLD_GLOBAL;
    }
    if flags.contains(OpenFlags::LOCAL) {
        raw |= libc::RTLD_LOCAL;
    }
    raw
}

/// Load the library at `path`, or the main program if `path` is `None`.
pub fn open_with(path: Option<&CStr>, flags: OpenFlags) -> Option<Library> {
    let path = path.map_or(null(), CStr::as_ptr);
    let handle = unsafe { libc::dlopen(path, raw_flags(flags)) };
    NonNull::new(handle).map(Library)
}

/// Look up the address of `symbol` in `library`.
pub fn resolve(library: &Library, symbol: &CStr) -> Option<NonNull<c_void>> {
    NonNull::new(unsafe { libc::dlsym(library.as_ptr(), symbol.as_ptr()) })
}

/// Unload `library`.
///
/// # Safety
///
/// No address resolved from `library` may be used afterwards.
pub unsafe fn close(library: Library) {
    if unsafe { libc::dlclose(library.as_ptr()) } != 0 {
        #[cfg(feature = "log")]
        log::warn!("dlclose failed: {:?}", last_error());
    }
}

/// Return the description of the most recent loader failure on this thread,
/// and clear it.
pub fn last_error() -> Option<String> {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
}
