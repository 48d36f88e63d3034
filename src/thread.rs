//! Thread startup, joining, and exit.

use crate::attr::{CondAttr, DetachState, MutexAttr, SchedParam, ThreadAttr};
use crate::cond::Condvar;
use crate::key::SpecificSlots;
use crate::kernel::{self, KernelError};
use crate::mutex::Mutex;
use core::ffi::c_void;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering::{Relaxed, SeqCst};
use core::sync::atomic::{AtomicBool, AtomicI32};
use rustix::io::{self, Errno};
use std::alloc::{Layout, alloc};
use std::sync::OnceLock;

/// The error number reported when the kernel refuses to create or start a
/// thread.
pub const UNSPECIFIED_ERRNO: i32 = 2000;

/// The start routine of a thread: takes the creator's argument and returns
/// the thread's exit value.
pub type StartRoutine = unsafe fn(*mut c_void) -> *mut c_void;

/// A thread handle.
///
/// Handles of threads created by [`create`] point to a control block that
/// lives until the thread is [`join`]ed. Threads this layer did not create
/// all share the [`Pthread::MAIN`] handle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pthread(NonNull<ThreadControl>);

// SAFETY: The control block is shared between the thread and its joiner, and
// every field that both touch is atomic or synchronized.
unsafe impl Send for Pthread {}
unsafe impl Sync for Pthread {}

impl Pthread {
    /// The handle of every thread not created by [`create`].
    pub const MAIN: Self =
        Self(unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(usize::MAX)) });

    /// Test whether this is [`Pthread::MAIN`].
    #[inline]
    #[must_use]
    pub fn is_main(self) -> bool {
        self.0.as_ptr().addr() == usize::MAX
    }

    /// Convert to `Self` from a raw pointer.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw.cast()).map(Self)
    }

    /// Convert to a raw pointer from a `Self`.
    #[inline]
    #[must_use]
    pub fn to_raw(self) -> *mut c_void {
        self.0.as_ptr().cast()
    }

    /// # Safety
    ///
    /// `self` must not be `MAIN` and must not have been joined.
    #[inline]
    pub(crate) unsafe fn control(&self) -> &ThreadControl {
        unsafe { self.0.as_ref() }
    }
}

/// The heap block behind a [`Pthread`].
pub(crate) struct ThreadControl {
    thr: OnceLock<kernel::Thread>,
    rc: AtomicI32,
    /// Set by the new thread before it releases its creator.
    running: AtomicBool,
    pub(crate) specific: SpecificSlots,
}

impl ThreadControl {
    fn alloc() -> Option<NonNull<Self>> {
        let layout = Layout::new::<Self>();
        let raw = NonNull::new(unsafe { alloc(layout) }.cast::<Self>())?;
        unsafe {
            raw.write(Self {
                thr: OnceLock::new(),
                rc: AtomicI32::new(0),
                running: AtomicBool::new(false),
                specific: SpecificSlots::new(),
            });
        }
        Some(raw)
    }

    /// # Safety
    ///
    /// `raw` must come from `alloc`, and nothing may use it afterwards.
    unsafe fn free(raw: NonNull<Self>) {
        #[cfg(feature = "log")]
        log::trace!("Thread[{:?}] freed", raw);

        drop(unsafe { Box::from_raw(raw.as_ptr()) });
    }
}

/// Where a created thread is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Started by the kernel but not yet through the start handshake.
    Starting,
    /// Running its start routine.
    Running,
    /// Finished, and waiting to be joined.
    Exited,
}

/// The creator and the new thread meet here before `create` returns.
struct StartInfo {
    func: StartRoutine,
    arg: *mut c_void,
    started: AtomicBool,
    mutex: Mutex,
    cond: Condvar,
}

fn unspecified_error(err: KernelError) -> Errno {
    #[cfg(feature = "log")]
    log::trace!("Thread creation failed: {err} ({:#x})", err.code());

    let _ = err;
    Errno::from_raw_os_error(UNSPECIFIED_ERRNO)
}

/// Creates a new thread running `func(arg)`.
///
/// The stack size and priority come from `attr`, or from the defaults if
/// `attr` is `None`. This returns once the new thread is running.
///
/// # Safety
///
/// `func(arg)` on the new thread must have defined behavior, and the thread
/// must eventually be [`join`]ed to release its resources.
pub unsafe fn create(
    attr: Option<&ThreadAttr>,
    func: StartRoutine,
    arg: *mut c_void,
) -> io::Result<Pthread> {
    let default_attr;
    let attr = match attr {
        Some(attr) => attr,
        None => {
            default_attr = ThreadAttr::new();
            &default_attr
        }
    };
    let (_, stack_size) = attr.stack()?;
    let priority = attr.sched_param()?.sched_priority;

    let core_mask = kernel::process_core_mask().map_err(|_| Errno::PERM)?;

    let info = StartInfo {
        func,
        arg,
        started: AtomicBool::new(false),
        mutex: Mutex::init(Some(&MutexAttr::new()))?,
        cond: Condvar::init(Some(&CondAttr::new()))?,
    };

    let raw = ThreadControl::alloc().ok_or(Errno::AGAIN)?;
    let control = unsafe { raw.as_ref() };

    let thr = match unsafe {
        kernel::Thread::create(
            trampoline,
            ptr::from_ref(&info).cast_mut().cast(),
            raw.as_ptr().cast(),
            stack_size,
            priority,
            kernel::DEFAULT_CORE_ID,
        )
    } {
        Ok(thr) => thr,
        Err(err) => {
            unsafe { ThreadControl::free(raw) };
            return Err(unspecified_error(err));
        }
    };
    let thr = control.thr.get_or_init(|| thr);

    // An empty mask means the process runs only on host CPUs the kernel
    // cannot name; the new thread then inherits the creator's affinity.
    let configured = match core_mask {
        0 => Ok(()),
        mask => thr.set_core_mask(-1, mask),
    };
    if let Err(err) = configured.and_then(|()| thr.start()) {
        let _ = thr.close();
        unsafe { ThreadControl::free(raw) };
        return Err(unspecified_error(err));
    }

    let _ = info.mutex.lock();
    while !info.started.load(Relaxed) {
        let _ = info.cond.wait(&info.mutex);
    }
    let _ = info.mutex.unlock();

    #[cfg(feature = "log")]
    log::trace!(
        "Thread[{:?}] launched with handle {:#x}",
        raw,
        thr.handle()
    );

    Ok(Pthread(raw))
}

/// The kernel entry point of every thread started by [`create`].
unsafe fn trampoline(arg: *mut c_void) {
    let (func, arg) = {
        let info = unsafe { &*arg.cast::<StartInfo>() };
        let start = (info.func, info.arg);
        let _ = info.mutex.lock();
        let me = current();
        unsafe { me.control() }.running.store(true, SeqCst);
        info.started.store(true, Relaxed);
        let _ = info.cond.signal();
        // `info` lives on the creator's stack, which may be gone once the
        // creator sees `started`.
        let _ = info.mutex.unlock();
        start
    };

    #[cfg(feature = "log")]
    log::trace!(
        "Thread[{:?}] started on tid {:?}",
        current().0,
        rustix::thread::gettid().as_raw_nonzero()
    );

    let retval = unsafe { func(arg) };
    exit(retval)
}

/// Creates a new thread running the closure `f`, whose return value becomes
/// the thread's exit code.
pub fn spawn<F>(attr: Option<&ThreadAttr>, f: F) -> io::Result<Pthread>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    unsafe fn call<F: FnOnce() -> i32>(arg: *mut c_void) -> *mut c_void {
        let f = unsafe { Box::from_raw(arg.cast::<F>()) };
        ptr::without_provenance_mut(f() as isize as usize)
    }

    let arg = Box::into_raw(Box::new(f)).cast::<c_void>();
    match unsafe { create(attr, call::<F>, arg) } {
        Ok(thread) => Ok(thread),
        Err(err) => {
            drop(unsafe { Box::from_raw(arg.cast::<F>()) });
            Err(err)
        }
    }
}

/// Waits for `thread` to exit, releases its resources, and returns its exit
/// code.
///
/// `MAIN` cannot be joined. If a panic escaped the thread's start routine,
/// the thread is still released but this fails with `ECANCELED`.
///
/// # Safety
///
/// `thread` must have come from [`create`] or [`spawn`] and must not have
/// been joined already.
pub unsafe fn join(thread: Pthread) -> io::Result<i32> {
    if thread.is_main() {
        return Err(Errno::INVAL);
    }

    #[cfg(feature = "log")]
    log::trace!("Thread[{:?}] is being joined", thread.0);

    let control = unsafe { thread.control() };
    let thr = control.thr.get().ok_or(Errno::INVAL)?;
    thr.wait_for_exit().map_err(|_| Errno::INVAL)?;
    let rc = control.rc.load(SeqCst);
    let aborted = thr.ended_abnormally();
    let closed = thr.close();
    unsafe { ThreadControl::free(thread.0) };
    closed.map_err(|_| Errno::INVAL)?;
    if aborted {
        return Err(Errno::CANCELED);
    }
    Ok(rc)
}

/// Terminates the calling thread with exit value `retval`.
///
/// Thread-specific destructors run first. The exit value is truncated to an
/// `i32` exit code, which [`join`] returns. Only the calling thread's stack
/// is unwound; other threads keep running.
///
/// Unwinding through an `extern "C"` frame aborts the process, so this must
/// not be called beneath one.
pub fn exit(retval: *mut c_void) -> ! {
    crate::key::run_destructors();

    let me = current();
    if me.is_main() {
        #[cfg(feature = "log")]
        log::warn!("exit called on a thread that was not created by this layer");
    } else {
        let control = unsafe { me.control() };
        control.rc.store(retval.addr() as i32, SeqCst);

        #[cfg(feature = "log")]
        log::trace!(
            "Thread[{:?}] exiting with code {}",
            me.0,
            retval.addr() as i32
        );
    }

    kernel::exit_thread()
}

/// Return the calling thread's handle.
#[inline]
#[must_use]
pub fn current() -> Pthread {
    let vars = kernel::thread_vars();
    if vars.magic != kernel::THREAD_VARS_MAGIC {
        return Pthread::MAIN;
    }
    NonNull::new(vars.thread_ptr.cast()).map_or(Pthread::MAIN, Pthread)
}

/// Return where `thread` is in its lifecycle.
///
/// A thread returned by [`create`] is never [`ThreadState::Starting`].
///
/// # Safety
///
/// `thread` must not have been joined.
pub unsafe fn state(thread: Pthread) -> io::Result<ThreadState> {
    if thread.is_main() {
        return Err(Errno::INVAL);
    }
    let control = unsafe { thread.control() };
    let thr = control.thr.get().ok_or(Errno::INVAL)?;
    Ok(if thr.has_exited() {
        ThreadState::Exited
    } else if control.running.load(SeqCst) {
        ThreadState::Running
    } else {
        ThreadState::Starting
    })
}

/// Test whether two handles name the same thread.
#[inline]
#[must_use]
pub fn equal(a: Pthread, b: Pthread) -> bool {
    a == b
}

/// Accept a request to detach `thread`, and ignore it; the thread must
/// still be joined.
pub fn detach(thread: Pthread) -> io::Result<()> {
    let _ = thread;
    Ok(())
}

/// Return the attributes of a live thread: its stack size, current priority,
/// and joinability. The stack address is not known.
///
/// # Safety
///
/// `thread` must not have been joined.
pub unsafe fn attr_of(thread: Pthread) -> io::Result<ThreadAttr> {
    if thread.is_main() {
        return Err(Errno::INVAL);
    }
    let thr = unsafe { thread.control() }.thr.get().ok_or(Errno::INVAL)?;
    let priority = thr.priority().map_err(|_| Errno::INVAL)?;
    let mut attr = ThreadAttr::default();
    attr.fill(thr.stack_size(), priority);
    attr.set_detach_state(DetachState::Joinable)?;
    Ok(attr)
}

/// Set the priority of a live thread. `policy` is ignored.
///
/// # Safety
///
/// `thread` must not have been joined.
pub unsafe fn set_sched_param(thread: Pthread, policy: i32, param: &SchedParam) -> io::Result<()> {
    let _ = policy;
    if thread.is_main() {
        return Err(Errno::INVAL);
    }
    let thr = unsafe { thread.control() }.thr.get().ok_or(Errno::INVAL)?;
    thr.set_priority(param.sched_priority)
        .map_err(|_| Errno::INVAL)
}
