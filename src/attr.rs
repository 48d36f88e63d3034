//! Thread, mutex, and condition-variable attribute objects.
//!
//! Attribute objects start out uninitialized (their `Default` value) and
//! must be initialized with `init` before use. Every accessor checks for the
//! initialization marker and fails with `EINVAL` if it is absent.

use crate::kernel;
use core::ffi::c_void;
use core::ptr::null_mut;
use rustix::io::{self, Errno};
use rustix::time::ClockId;

/// Marker stored in an attribute object by its `init` function.
pub const ATTR_MAGIC: i32 = 0x4154_5452;

/// Default stack size of threads, in bytes.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Default thread priority.
pub const DEFAULT_PRIORITY: i32 = 0x3B;

/// The only scheduling policy; requests for others are ignored.
pub const SCHED_OTHER: i32 = 0;

/// Mutex kind: plain, non-recursive.
pub const PTHREAD_MUTEX_NORMAL: i32 = 0;
/// Mutex kind: recursive.
pub const PTHREAD_MUTEX_RECURSIVE: i32 = 1;
/// Mutex kind: error-checking. Behaves as [`PTHREAD_MUTEX_NORMAL`].
pub const PTHREAD_MUTEX_ERRORCHECK: i32 = 2;
/// The default mutex kind.
pub const PTHREAD_MUTEX_DEFAULT: i32 = PTHREAD_MUTEX_NORMAL;

#[inline]
fn check(is_initialized: i32) -> io::Result<()> {
    if is_initialized == ATTR_MAGIC {
        Ok(())
    } else {
        Err(Errno::INVAL)
    }
}

/// Scheduling parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedParam {
    /// Kernel priority, `0..=0x3F`; lower values are more urgent.
    pub sched_priority: i32,
}

/// Whether a thread is created joinable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum DetachState {
    /// The thread's resources are released when it exits.
    #[default]
    Detached = 0,
    /// The thread must be joined.
    Joinable = 1,
}

/// Thread attributes.
#[derive(Clone, Debug)]
pub struct ThreadAttr {
    is_initialized: i32,
    stackaddr: *mut c_void,
    stacksize: usize,
    schedparam: SchedParam,
    detachstate: DetachState,
}

impl Default for ThreadAttr {
    /// Return an uninitialized attribute object.
    fn default() -> Self {
        Self {
            is_initialized: 0,
            stackaddr: null_mut(),
            stacksize: 0,
            schedparam: SchedParam::default(),
            detachstate: DetachState::default(),
        }
    }
}

impl ThreadAttr {
    /// Return an initialized attribute object holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        let mut attr = Self::default();
        attr.init();
        attr
    }

    /// Initialize with the defaults: no stack address, a
    /// [`DEFAULT_STACK_SIZE`] stack, [`DEFAULT_PRIORITY`], joinable.
    pub fn init(&mut self) {
        *self = Self {
            is_initialized: ATTR_MAGIC,
            stackaddr: null_mut(),
            stacksize: DEFAULT_STACK_SIZE,
            schedparam: SchedParam {
                sched_priority: DEFAULT_PRIORITY,
            },
            detachstate: DetachState::Joinable,
        };
    }

    /// Test whether `init` has been called.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.is_initialized == ATTR_MAGIC
    }

    /// Return the priority new threads are created with.
    pub fn sched_param(&self) -> io::Result<SchedParam> {
        check(self.is_initialized)?;
        Ok(self.schedparam)
    }

    /// Set the priority new threads are created with, `0..=0x3F`.
    pub fn set_sched_param(&mut self, param: SchedParam) -> io::Result<()> {
        check(self.is_initialized)?;
        if !(kernel::PRIORITY_MIN..=kernel::PRIORITY_MAX).contains(&param.sched_priority) {
            return Err(Errno::INVAL);
        }
        self.schedparam = param;
        Ok(())
    }

    /// Return the stack address and size.
    pub fn stack(&self) -> io::Result<(*mut c_void, usize)> {
        check(self.is_initialized)?;
        Ok((self.stackaddr, self.stacksize))
    }

    /// Return the stack size new threads are created with.
    pub fn stack_size(&self) -> io::Result<usize> {
        check(self.is_initialized)?;
        Ok(self.stacksize)
    }

    /// Set the stack size new threads are created with.
    ///
    /// The size is checked when a thread is created: it must be a non-zero
    /// multiple of the 4 KiB page size.
    pub fn set_stack_size(&mut self, stacksize: usize) -> io::Result<()> {
        check(self.is_initialized)?;
        self.stacksize = stacksize;
        Ok(())
    }

    /// Return the recorded detach state.
    pub fn detach_state(&self) -> io::Result<DetachState> {
        check(self.is_initialized)?;
        Ok(self.detachstate)
    }

    /// Record the detach state.
    ///
    /// Threads are always created joinable; the recorded state is only
    /// reported back.
    pub fn set_detach_state(&mut self, state: DetachState) -> io::Result<()> {
        check(self.is_initialized)?;
        self.detachstate = state;
        Ok(())
    }

    /// Return the scheduling policy, which is always [`SCHED_OTHER`].
    pub fn sched_policy(&self) -> io::Result<i32> {
        check(self.is_initialized)?;
        Ok(SCHED_OTHER)
    }

    /// Accept and ignore a scheduling policy.
    pub fn set_sched_policy(&mut self, _policy: i32) -> io::Result<()> {
        check(self.is_initialized)
    }

    /// Return the guard size, which is always zero.
    pub fn guard_size(&self) -> io::Result<usize> {
        check(self.is_initialized)?;
        Ok(0)
    }

    /// Accept and ignore a guard size.
    pub fn set_guard_size(&mut self, _guardsize: usize) -> io::Result<()> {
        check(self.is_initialized)
    }

    pub(crate) fn fill(&mut self, stacksize: usize, priority: i32) {
        self.init();
        self.stacksize = stacksize;
        self.schedparam.sched_priority = priority;
    }
}

/// Mutex attributes.
#[derive(Clone, Copy, Debug, Default)]
pub struct MutexAttr {
    is_initialized: i32,
    kind: i32,
}

impl MutexAttr {
    /// Return an initialized attribute object for a plain mutex.
    #[must_use]
    pub fn new() -> Self {
        let mut attr = Self::default();
        attr.init();
        attr
    }

    /// Initialize for a plain mutex.
    pub fn init(&mut self) {
        self.is_initialized = ATTR_MAGIC;
        self.kind = PTHREAD_MUTEX_DEFAULT;
    }

    /// Make the object uninitialized again.
    pub fn destroy(&mut self) -> io::Result<()> {
        check(self.is_initialized)?;
        self.is_initialized = 0;
        Ok(())
    }

    /// Set the mutex kind, one of the `PTHREAD_MUTEX_*` constants.
    pub fn set_type(&mut self, kind: i32) -> io::Result<()> {
        check(self.is_initialized)?;
        match kind {
            PTHREAD_MUTEX_NORMAL | PTHREAD_MUTEX_RECURSIVE | PTHREAD_MUTEX_ERRORCHECK => {
                self.kind = kind;
                Ok(())
            }
            _ => Err(Errno::INVAL),
        }
    }

    /// Return the mutex kind.
    pub fn kind(&self) -> io::Result<i32> {
        check(self.is_initialized)?;
        Ok(self.kind)
    }

    /// Select a recursive or a plain mutex.
    pub fn set_recursive(&mut self, recursive: bool) -> io::Result<()> {
        self.set_type(if recursive {
            PTHREAD_MUTEX_RECURSIVE
        } else {
            PTHREAD_MUTEX_NORMAL
        })
    }

    /// Test whether mutexes initialized from this object are recursive.
    pub fn is_recursive(&self) -> io::Result<bool> {
        Ok(self.kind()? == PTHREAD_MUTEX_RECURSIVE)
    }
}

/// Condition-variable attributes.
#[derive(Clone, Copy, Debug)]
pub struct CondAttr {
    is_initialized: i32,
    clock: ClockId,
}

impl Default for CondAttr {
    /// Return an uninitialized attribute object.
    fn default() -> Self {
        Self {
            is_initialized: 0,
            clock: ClockId::Realtime,
        }
    }
}

impl CondAttr {
    /// Return an initialized attribute object using the realtime clock.
    #[must_use]
    pub fn new() -> Self {
        let mut attr = Self::default();
        attr.init();
        attr
    }

    /// Initialize, selecting the realtime clock.
    pub fn init(&mut self) {
        self.is_initialized = ATTR_MAGIC;
        self.clock = ClockId::Realtime;
    }

    /// Return the clock that timed-wait deadlines are measured against.
    pub fn clock(&self) -> io::Result<ClockId> {
        check(self.is_initialized)?;
        Ok(self.clock)
    }

    /// Set the clock that timed-wait deadlines are measured against, either
    /// realtime or monotonic.
    pub fn set_clock(&mut self, clock: ClockId) -> io::Result<()> {
        check(self.is_initialized)?;
        match clock {
            ClockId::Realtime | ClockId::Monotonic => {
                self.clock = clock;
                Ok(())
            }
            _ => Err(Errno::INVAL),
        }
    }
}
