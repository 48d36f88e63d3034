//! Kernel thread objects.
//!
//! A [`Thread`] is created unstarted, may have its core mask and priority
//! adjusted, is started once, and is then waited for and closed. Host threads
//! do the actual running; the kernel object tracks what the console kernel
//! would.

use super::{
    CORE_COUNT, DEFAULT_CORE_ID, Handle, KernelError, PRIORITY_MAX, PRIORITY_MIN, STACK_ALIGNMENT,
    THREAD_VARS_MAGIC, ThreadVars, apply_core_mask, process_core_mask, set_thread_vars,
};
use core::ffi::c_void;
use core::sync::atomic::Ordering::Relaxed;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The entry point of a kernel thread.
pub type ThreadFunc = unsafe fn(*mut c_void);

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(0x1000);

/// The unwind payload used by [`exit_thread`].
struct ExitThread;

struct SendPtr(*mut c_void);

// SAFETY: `SendPtr` carries the creator's pointers to the new thread, which
// is what `Thread::create`'s contract hands over.
unsafe impl Send for SendPtr {}

struct Launch {
    entry: ThreadFunc,
    arg: SendPtr,
    thread_ptr: SendPtr,
}

struct ThreadObject {
    priority: AtomicI32,
    /// Affinity applied when the thread starts; `0` inherits the creator's.
    core_mask: AtomicU64,
    launch: parking_lot::Mutex<Option<Launch>>,
    join: parking_lot::Mutex<Option<JoinHandle<()>>>,
    exited: parking_lot::Mutex<bool>,
    exit_cond: parking_lot::Condvar,
    /// Set when a panic escaped the entry point.
    aborted: AtomicBool,
}

/// Marks the object exited when the host thread finishes, however it
/// finishes.
struct ExitNotifier<'a>(&'a ThreadObject);

impl Drop for ExitNotifier<'_> {
    fn drop(&mut self) {
        let mut exited = self.0.exited.lock();
        *exited = true;
        self.0.exit_cond.notify_all();
    }
}

/// A kernel thread object.
pub struct Thread {
    handle: Handle,
    stack_size: usize,
    object: Arc<ThreadObject>,
}

impl Thread {
    /// Create a thread that will run `entry(arg)` once started.
    ///
    /// `thread_ptr` is published to the new thread through its
    /// [`ThreadVars`] block. `cpuid` is [`DEFAULT_CORE_ID`] or a core number.
    ///
    /// # Safety
    ///
    /// `entry(arg)` must have defined behavior when called on the new thread.
    pub unsafe fn create(
        entry: ThreadFunc,
        arg: *mut c_void,
        thread_ptr: *mut c_void,
        stack_size: usize,
        priority: i32,
        cpuid: i32,
    ) -> Result<Self, KernelError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(KernelError::InvalidPriority);
        }
        if cpuid != DEFAULT_CORE_ID && !(0..CORE_COUNT).contains(&cpuid) {
            return Err(KernelError::InvalidCoreId);
        }
        if stack_size == 0 || stack_size % STACK_ALIGNMENT != 0 {
            return Err(KernelError::InvalidSize);
        }

        let core_mask = if cpuid == DEFAULT_CORE_ID {
            0
        } else {
            1 << cpuid
        };
        Ok(Self {
            handle: NEXT_HANDLE.fetch_add(1, Relaxed),
            stack_size,
            object: Arc::new(ThreadObject {
                priority: AtomicI32::new(priority),
                core_mask: AtomicU64::new(core_mask),
                launch: parking_lot::Mutex::new(Some(Launch {
                    entry,
                    arg: SendPtr(arg),
                    thread_ptr: SendPtr(thread_ptr),
                })),
                join: parking_lot::Mutex::new(None),
                exited: parking_lot::Mutex::new(false),
                exit_cond: parking_lot::Condvar::new(),
                aborted: AtomicBool::new(false),
            }),
        })
    }

    /// Return the thread's handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Return the stack size the thread was created with.
    #[inline]
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Set the cores the thread may run on.
    ///
    /// A `preferred_core` of `-1` leaves the preferred core unchanged. The
    /// mask must be non-empty and within the process's core mask. Only a mask
    /// set before [`Thread::start`] is applied.
    pub fn set_core_mask(&self, preferred_core: i32, mask: u64) -> Result<(), KernelError> {
        if preferred_core != -1 && preferred_core != DEFAULT_CORE_ID {
            if !(0..CORE_COUNT).contains(&preferred_core) {
                return Err(KernelError::InvalidCoreId);
            }
            if mask & (1 << preferred_core) == 0 {
                return Err(KernelError::InvalidCombination);
            }
        }
        if mask == 0 {
            return Err(KernelError::InvalidCombination);
        }
        if mask & !process_core_mask()? != 0 {
            return Err(KernelError::InvalidCoreId);
        }
        self.object.core_mask.store(mask, Relaxed);
        Ok(())
    }

    /// Return the thread's priority.
    pub fn priority(&self) -> Result<i32, KernelError> {
        Ok(self.object.priority.load(Relaxed))
    }

    /// Set the thread's priority.
    pub fn set_priority(&self, priority: i32) -> Result<(), KernelError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(KernelError::InvalidPriority);
        }
        self.object.priority.store(priority, Relaxed);
        Ok(())
    }

    /// Start running the thread.
    ///
    /// A thread can only be started once.
    pub fn start(&self) -> Result<(), KernelError> {
        let launch = self
            .object
            .launch
            .lock()
            .take()
            .ok_or(KernelError::InvalidState)?;
        let object = self.object.clone();
        let handle = self.handle;
        let join = std::thread::Builder::new()
            .name(format!("kthread-{handle:#x}"))
            .stack_size(self.stack_size)
            .spawn(move || run(&object, launch, handle))
            .map_err(|_| KernelError::OutOfResource)?;
        *self.object.join.lock() = Some(join);
        Ok(())
    }

    /// Block until the thread has exited.
    pub fn wait_for_exit(&self) -> Result<(), KernelError> {
        if self.object.launch.lock().is_some() {
            return Err(KernelError::InvalidState);
        }
        let mut exited = self.object.exited.lock();
        while !*exited {
            self.object.exit_cond.wait(&mut exited);
        }
        Ok(())
    }

    /// Test whether the thread has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        *self.object.exited.lock()
    }

    /// Test whether the thread ended by panicking rather than by returning
    /// from its entry point or calling [`exit_thread`].
    #[must_use]
    pub fn ended_abnormally(&self) -> bool {
        self.object.aborted.load(Relaxed)
    }

    /// Release the kernel resources of the thread.
    ///
    /// If the thread is still running, this waits for it to finish.
    pub fn close(&self) -> Result<(), KernelError> {
        let join = self.object.join.lock().take();
        if let Some(join) = join {
            // A panic escaping the entry point has already been reported on
            // that thread.
            let _ = join.join();
        }
        Ok(())
    }
}

fn run(object: &ThreadObject, launch: Launch, handle: Handle) {
    set_thread_vars(ThreadVars {
        magic: THREAD_VARS_MAGIC,
        handle,
        thread_ptr: launch.thread_ptr.0,
    });
    let mask = object.core_mask.load(Relaxed);
    if mask != 0 {
        apply_core_mask(mask);
    }

    let _notifier = ExitNotifier(object);
    let Launch { entry, arg, .. } = launch;
    let outcome = panic::catch_unwind(AssertUnwindSafe(move || unsafe { entry(arg.0) }));
    set_thread_vars(ThreadVars::EMPTY);
    if let Err(payload) = outcome {
        if !payload.is::<ExitThread>() {
            object.aborted.store(true, Relaxed);
            panic::resume_unwind(payload);
        }
    }
}

/// Terminate the calling thread.
///
/// The thread's stack is unwound, running destructors, up to the frame where
/// the kernel started it. On a thread the kernel did not start, the unwind
/// reaches the top of that thread's stack instead.
///
/// Unwinding through an `extern "C"` frame aborts the process, so this must
/// not be called beneath one.
pub fn exit_thread() -> ! {
    panic::resume_unwind(Box::new(ExitThread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::thread_vars;
    use core::sync::atomic::AtomicUsize;
    use core::sync::atomic::Ordering::SeqCst;

    static RAN: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count(arg: *mut c_void) {
        assert_eq!(thread_vars().magic, THREAD_VARS_MAGIC);
        assert_eq!(thread_vars().thread_ptr, arg);
        RAN.fetch_add(1, SeqCst);
    }

    unsafe fn exit_early(arg: *mut c_void) {
        unsafe { arg.cast::<AtomicUsize>().as_ref() }
            .unwrap()
            .store(1, SeqCst);
        exit_thread();
    }

    #[test]
    fn create_validates() {
        let create = |stack, priority, cpuid| unsafe {
            Thread::create(count, core::ptr::null_mut(), core::ptr::null_mut(), stack, priority, cpuid)
                .err()
        };
        assert_eq!(create(0x8000, 0x40, -2), Some(KernelError::InvalidPriority));
        assert_eq!(create(0x8000, -1, -2), Some(KernelError::InvalidPriority));
        assert_eq!(create(0x8000, 0x2C, 4), Some(KernelError::InvalidCoreId));
        assert_eq!(create(0, 0x2C, -2), Some(KernelError::InvalidSize));
        assert_eq!(create(0x8001, 0x2C, -2), Some(KernelError::InvalidSize));
        assert_eq!(create(0x8000, 0x2C, -2), None);
        assert_eq!(create(0x8000, 0x2C, 0), None);
    }

    #[test]
    fn start_wait_close() {
        let mut marker = 0_u8;
        let ptr = (&raw mut marker).cast::<c_void>();
        let thread = unsafe { Thread::create(count, ptr, ptr, 0x10000, 0x2C, -2) }.unwrap();
        assert_eq!(thread.wait_for_exit(), Err(KernelError::InvalidState));
        thread.start().unwrap();
        assert_eq!(thread.start(), Err(KernelError::InvalidState));
        thread.wait_for_exit().unwrap();
        thread.close().unwrap();
        assert!(RAN.load(SeqCst) >= 1);
    }

    #[test]
    fn exit_thread_ends_only_that_thread() {
        let flag = AtomicUsize::new(0);
        let ptr = core::ptr::from_ref(&flag).cast_mut().cast::<c_void>();
        let thread =
            unsafe { Thread::create(exit_early, ptr, core::ptr::null_mut(), 0x10000, 0x2C, -2) }
                .unwrap();
        thread.start().unwrap();
        thread.wait_for_exit().unwrap();
        thread.close().unwrap();
        assert_eq!(flag.load(SeqCst), 1);
    }

    unsafe fn panics(_arg: *mut c_void) {
        panic!("entry point failed");
    }

    #[test]
    fn panics_are_recorded() {
        let thread = unsafe {
            Thread::create(panics, core::ptr::null_mut(), core::ptr::null_mut(), 0x10000, 0x2C, -2)
        }
        .unwrap();
        assert!(!thread.has_exited());
        thread.start().unwrap();
        thread.wait_for_exit().unwrap();
        assert!(thread.has_exited());
        assert!(thread.ended_abnormally());
        thread.close().unwrap();

        let flag = AtomicUsize::new(0);
        let ptr = core::ptr::from_ref(&flag).cast_mut().cast::<c_void>();
        let thread =
            unsafe { Thread::create(exit_early, ptr, core::ptr::null_mut(), 0x10000, 0x2C, -2) }
                .unwrap();
        thread.start().unwrap();
        thread.wait_for_exit().unwrap();
        assert!(!thread.ended_abnormally());
        thread.close().unwrap();
    }

    #[test]
    fn priorities() {
        let thread = unsafe {
            Thread::create(count, core::ptr::null_mut(), core::ptr::null_mut(), 0x10000, 0x3B, -2)
        }
        .unwrap();
        assert_eq!(thread.priority(), Ok(0x3B));
        thread.set_priority(0x20).unwrap();
        assert_eq!(thread.priority(), Ok(0x20));
        assert_eq!(thread.set_priority(0x40), Err(KernelError::InvalidPriority));
        assert_eq!(thread.set_core_mask(-1, 0), Err(KernelError::InvalidCombination));
        thread.close().unwrap();
    }
}
