//! POSIX mutexes over the kernel's plain and recursive mutexes.

use crate::attr::MutexAttr;
use crate::kernel;
use rustix::io::{self, Errno};

/// A mutex, plain or recursive as selected when it was initialized.
#[derive(Debug)]
pub struct Mutex {
    kind: Kind,
}

#[derive(Debug)]
pub(crate) enum Kind {
    Plain(kernel::Mutex),
    Recursive(kernel::RMutex),
}

impl Mutex {
    /// Initialize a mutex from `attr`.
    ///
    /// `attr` must be present and initialized; its type selects a recursive
    /// or a plain mutex. Error-checking mutexes are plain.
    pub fn init(attr: Option<&MutexAttr>) -> io::Result<Self> {
        let attr = attr.ok_or(Errno::INVAL)?;
        let kind = if attr.is_recursive()? {
            Kind::Recursive(kernel::RMutex::new())
        } else {
            Kind::Plain(kernel::Mutex::new())
        };
        Ok(Self { kind })
    }

    /// Test whether this is a recursive mutex.
    #[must_use]
    pub fn is_recursive(&self) -> bool {
        matches!(self.kind, Kind::Recursive(_))
    }

    /// Block until the calling thread holds the mutex.
    ///
    /// A recursive mutex held by the calling thread is locked again; a plain
    /// one deadlocks.
    pub fn lock(&self) -> io::Result<()> {
        match &self.kind {
            Kind::Plain(mutex) => mutex.lock(),
            Kind::Recursive(rmutex) => rmutex.lock(),
        }
        Ok(())
    }

    /// Release the mutex, or one level of a recursive mutex.
    pub fn unlock(&self) -> io::Result<()> {
        match &self.kind {
            Kind::Plain(mutex) => mutex.unlock(),
            Kind::Recursive(rmutex) => rmutex.unlock(),
        }
        Ok(())
    }

    /// Lock the mutex if that can be done without blocking.
    ///
    /// Failure to lock is reported as `EINVAL`, not `EBUSY`.
    pub fn try_lock(&self) -> io::Result<()> {
        let locked = match &self.kind {
            Kind::Plain(mutex) => mutex.try_lock(),
            Kind::Recursive(rmutex) => rmutex.try_lock(),
        };
        if locked { Ok(()) } else { Err(Errno::INVAL) }
    }

    /// Destroy the mutex. There is nothing to release.
    pub fn destroy(&mut self) -> io::Result<()> {
        Ok(())
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.kind
    }
}
