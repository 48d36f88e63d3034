//! The console kernel's synchronization and thread services.
//!
//! The shim in the rest of this crate is written against these primitives:
//! an owner-tagged [`Mutex`] word, a re-entrant [`RMutex`] layered on it, a
//! [`CondVar`] that atomically releases a `Mutex` while waiting, and
//! [`Thread`] objects that are created unstarted, configured, started, waited
//! for, and closed.
//!
//! On a development host there is no such kernel, so the primitives here
//! reproduce its contracts on top of host threads. Waiting is arbitrated by
//! address through a process-wide arbiter, the way the console kernel does
//! it, so that waking a waiter never touches the primitive's memory after it
//! has been released.

use core::cell::Cell;
use core::ffi::c_void;
use core::ptr::null_mut;
use std::time::Duration;

mod arbiter;
mod thread;

pub use arbiter::{CondVar, Mutex, RMutex};
pub use thread::{exit_thread, Thread, ThreadFunc};

/// A kernel object handle.
pub type Handle = u32;

/// The handle value that never names an object.
pub const INVALID_HANDLE: Handle = 0;

/// Bit set in a [`Mutex`] tag while other threads wait for it.
pub const HANDLE_WAIT_MASK: u32 = 0x4000_0000;

/// Marker stored in a [`ThreadVars`] block once the kernel has set it up.
pub const THREAD_VARS_MAGIC: u32 = 0x2154_5624;

/// Lowest (most urgent) thread priority.
pub const PRIORITY_MIN: i32 = 0;

/// Highest (least urgent) thread priority.
pub const PRIORITY_MAX: i32 = 0x3F;

/// Core id meaning "the process's default core".
pub const DEFAULT_CORE_ID: i32 = -2;

/// Number of application cores.
pub const CORE_COUNT: i32 = 4;

/// Stack sizes must be a multiple of this.
pub const STACK_ALIGNMENT: usize = 0x1000;

/// Result-code module of the kernel.
const MODULE_KERNEL: u32 = 1;

/// Kernel error results.
///
/// Each variant corresponds to one kernel result description; [`code`]
/// yields the raw 32-bit result value.
///
/// [`code`]: KernelError::code
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// A size argument is zero or misaligned.
    #[error("invalid size")]
    InvalidSize,
    /// No memory or thread resources are left.
    #[error("out of resource")]
    OutOfResource,
    /// A priority is outside `PRIORITY_MIN..=PRIORITY_MAX`.
    #[error("invalid priority")]
    InvalidPriority,
    /// A core id or core mask names cores the process may not use.
    #[error("invalid core id")]
    InvalidCoreId,
    /// A handle does not name a live object.
    #[error("invalid handle")]
    InvalidHandle,
    /// A combination of arguments is not allowed, eg. an empty core mask.
    #[error("invalid combination")]
    InvalidCombination,
    /// A wait timed out.
    #[error("timed out")]
    TimedOut,
    /// The object is not in a state that allows the operation.
    #[error("invalid state")]
    InvalidState,
}

impl KernelError {
    /// The description number within the kernel module.
    const fn description(self) -> u32 {
        match self {
            Self::InvalidSize => 101,
            Self::OutOfResource => 103,
            Self::InvalidPriority => 112,
            Self::InvalidCoreId => 113,
            Self::InvalidHandle => 114,
            Self::InvalidCombination => 116,
            Self::TimedOut => 117,
            Self::InvalidState => 125,
        }
    }

    /// The raw result code, eg. `0xEA01` for [`KernelError::TimedOut`].
    #[must_use]
    pub const fn code(self) -> u32 {
        MODULE_KERNEL | (self.description() << 9)
    }
}

/// Per-thread block the kernel sets up for every thread it starts.
#[derive(Clone, Copy, Debug)]
pub struct ThreadVars {
    /// [`THREAD_VARS_MAGIC`] once set up; anything else means "absent".
    pub magic: u32,
    /// Handle of the thread's kernel object.
    pub handle: Handle,
    /// Opaque pointer supplied when the thread was created.
    pub thread_ptr: *mut c_void,
}

impl ThreadVars {
    const EMPTY: Self = Self {
        magic: 0,
        handle: INVALID_HANDLE,
        thread_ptr: null_mut(),
    };
}

std::thread_local! {
    static THREAD_VARS: Cell<ThreadVars> = const { Cell::new(ThreadVars::EMPTY) };
}

/// Return the calling thread's [`ThreadVars`].
///
/// Threads the kernel did not start (the process's initial thread, or host
/// threads spawned some other way) get a block whose `magic` is zero.
#[inline]
#[must_use]
pub fn thread_vars() -> ThreadVars {
    THREAD_VARS
        .try_with(Cell::get)
        .unwrap_or(ThreadVars::EMPTY)
}

fn set_thread_vars(vars: ThreadVars) {
    let _ = THREAD_VARS.try_with(|cell| cell.set(vars));
}

/// Return the tag identifying the calling thread as a [`Mutex`] owner.
///
/// Tags are never zero and never contain [`HANDLE_WAIT_MASK`].
#[inline]
#[must_use]
pub fn thread_tag() -> u32 {
    let tid = rustix::thread::gettid().as_raw_nonzero().get() as u32;
    debug_assert_eq!(tid & HANDLE_WAIT_MASK, 0);
    tid
}

/// Return the mask of cores the current process may run threads on.
///
/// Host CPUs numbered 64 and up have no bit; if the process may only use
/// those, the mask is empty.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn process_core_mask() -> Result<u64, KernelError> {
    unsafe {
        let mut set: libc::cpu_set_t = core::mem::zeroed();
        if libc::sched_getaffinity(0, size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Err(KernelError::InvalidHandle);
        }
        Ok(core_mask_of(&set))
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn core_mask_of(set: &libc::cpu_set_t) -> u64 {
    (0..u64::BITS as usize)
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, set) })
        .fold(0, |mask, cpu| mask | (1 << cpu))
}

/// Return the mask of cores the current process may run threads on.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn process_core_mask() -> Result<u64, KernelError> {
    Ok((1 << CORE_COUNT) - 1)
}

/// Restrict the calling thread to the cores in `mask`.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn apply_core_mask(mask: u64) {
    unsafe {
        let mut set: libc::cpu_set_t = core::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for cpu in 0..64 {
            if mask & (1 << cpu) != 0 {
                libc::CPU_SET(cpu, &mut set);
            }
        }
        if libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &set) != 0 {
            #[cfg(feature = "log")]
            log::warn!("failed to apply core mask {mask:#x}");
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn apply_core_mask(_mask: u64) {}

/// Suspend the calling thread for `ns` nanoseconds.
///
/// Zero and negative values are the kernel's yield requests: the thread gives
/// up the rest of its time slice without sleeping.
pub fn sleep_thread(ns: i64) {
    match u64::try_from(ns) {
        Ok(ns) if ns > 0 => std::thread::sleep(Duration::from_nanos(ns)),
        _ => std::thread::yield_now(),
    }
}
