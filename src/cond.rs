//! POSIX condition variables over the kernel's condition variable.

use crate::attr::CondAttr;
use crate::kernel::{self, KernelError};
use crate::mutex::{Kind, Mutex};
use core::sync::atomic::Ordering::Relaxed;
use rustix::io::{self, Errno};
use rustix::time::{ClockId, Timespec, clock_gettime};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// A condition variable.
#[derive(Debug)]
pub struct Condvar {
    cond: kernel::CondVar,
    clock: ClockId,
}

impl Condvar {
    /// Initialize a condition variable.
    ///
    /// `attr` only selects the clock that [`Condvar::timed_wait`] deadlines
    /// are measured against; without it, or if it is uninitialized, the
    /// realtime clock is used.
    pub fn init(attr: Option<&CondAttr>) -> io::Result<Self> {
        let clock = attr
            .and_then(|attr| attr.clock().ok())
            .unwrap_or(ClockId::Realtime);
        Ok(Self {
            cond: kernel::CondVar::new(),
            clock,
        })
    }

    /// Release `mutex`, wait to be signaled, and reacquire `mutex`.
    ///
    /// The calling thread must hold `mutex`; a recursive `mutex` must be held
    /// exactly once.
    pub fn wait(&self, mutex: &Mutex) -> io::Result<()> {
        self.wait_timeout(mutex, u64::MAX)
    }

    /// Like [`Condvar::wait`], but give up with `ETIMEDOUT` once the clock
    /// reaches `abstime`.
    ///
    /// `mutex` is reacquired in either case.
    pub fn timed_wait(&self, mutex: &Mutex, abstime: Option<&Timespec>) -> io::Result<()> {
        let abstime = abstime.ok_or(Errno::INVAL)?;
        let timeout = self.timeout_until(abstime)?;
        self.wait_timeout(mutex, timeout)
    }

    /// Wake one waiting thread.
    pub fn signal(&self) -> io::Result<()> {
        self.cond.wake_one().map_err(|_| Errno::INVAL)
    }

    /// Wake every waiting thread.
    pub fn broadcast(&self) -> io::Result<()> {
        self.cond.wake_all().map_err(|_| Errno::INVAL)
    }

    /// Destroy the condition variable. There is nothing to release.
    pub fn destroy(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Convert an absolute deadline into nanoseconds from now.
    fn timeout_until(&self, abstime: &Timespec) -> io::Result<u64> {
        let nsec = i128::from(abstime.tv_nsec);
        if !(0..NANOS_PER_SEC).contains(&nsec) {
            return Err(Errno::INVAL);
        }
        let now = clock_gettime(self.clock);
        let deadline = i128::from(abstime.tv_sec) * NANOS_PER_SEC + nsec;
        let now = i128::from(now.tv_sec) * NANOS_PER_SEC + i128::from(now.tv_nsec);
        // `u64::MAX` means "forever" to the kernel.
        Ok(u64::try_from(deadline - now)
            .unwrap_or(0)
            .min(u64::MAX - 1))
    }

    fn wait_timeout(&self, mutex: &Mutex, timeout: u64) -> io::Result<()> {
        let result = match mutex.kind() {
            Kind::Plain(mutex) => self.cond.wait_timeout(mutex, timeout),
            Kind::Recursive(rmutex) => {
                if rmutex.counter.load(Relaxed) != 1 {
                    return Err(Errno::INVAL);
                }
                let thread_tag = rmutex.thread_tag.swap(0, Relaxed);
                rmutex.counter.store(0, Relaxed);
                let result = self.cond.wait_timeout(&rmutex.lock, timeout);
                rmutex.thread_tag.store(thread_tag, Relaxed);
                rmutex.counter.store(1, Relaxed);
                result
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(KernelError::TimedOut) => Err(Errno::TIMEDOUT),
            Err(_) => Err(Errno::INVAL),
        }
    }
}
