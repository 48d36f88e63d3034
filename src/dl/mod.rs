//! The dynamic loader.
//!
//! The console has no dynamic loader, so by default every function here
//! reports failure. With the `dynamic-loader` feature they are forwarded to
//! the host's loader.

use bitflags::bitflags;
use core::ffi::c_void;
use core::ptr::NonNull;

#[cfg_attr(feature = "dynamic-loader", path = "host.rs")]
#[cfg_attr(not(feature = "dynamic-loader"), path = "disabled.rs")]
mod imp;

pub use imp::{close, last_error, open_with, resolve};

bitflags! {
    /// Flags for [`open_with`].
    #[repr(transparent)]
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct OpenFlags: u32 {
        /// Resolve symbols when they are first used.
        const LAZY = 1 << 0;
        /// Resolve all symbols when the library is loaded.
        const NOW = 1 << 1;
        /// Make the library's symbols available to libraries loaded later.
        const GLOBAL = 1 << 2;
        /// Keep the library's symbols to itself.
        const LOCAL = 1 << 3;
    }
}

/// A loaded library.
#[derive(Debug)]
pub struct Library(NonNull<c_void>);

// SAFETY: Loader handles may be used from any thread.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Return the loader's handle.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Load the library at `path`, or the main program if `path` is `None`,
/// resolving symbols lazily and keeping them local.
pub fn open(path: Option<&core::ffi::CStr>) -> Option<Library> {
    open_with(path, OpenFlags::LOCAL | OpenFlags::LAZY)
}
