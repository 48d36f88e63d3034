//! No dynamic loader.

use super::{Library, OpenFlags};
use core::ffi::{CStr, c_void};
use core::ptr::NonNull;

/// Report that no library can be loaded.
pub fn open_with(path: Option<&CStr>, flags: OpenFlags) -> Option<Library> {
    let _ = (path, flags);
    None
}

/// Report that no symbol can be found.
pub fn resolve(library: &Library, symbol: &CStr) -> Option<NonNull<c_void>> {
    let _ = (library, symbol);
    None
}

/// Do nothing.
///
/// # Safety
///
/// This is `unsafe` to match the host loader's `close`.
pub unsafe fn close(library: Library) {
    let _ = library;
}

/// Report that there is no error to describe.
pub fn last_error() -> Option<String> {
    None
}
