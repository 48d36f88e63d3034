//! Mutexes and condition variables.
//!
//! Every blocking operation goes through one process-wide arbiter: a table of
//! waiters keyed by the address of the primitive being waited on, and a
//! condition variable on which all blocked threads park. Uncontended locking
//! and unlocking never touch the arbiter.

use super::{HANDLE_WAIT_MASK, KernelError, thread_tag};
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use parking_lot::MutexGuard;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

struct Arbiter {
    table: parking_lot::Mutex<Waiters>,
    wake: parking_lot::Condvar,
}

static ARBITER: Arbiter = Arbiter {
    table: parking_lot::const_mutex(Waiters::new()),
    wake: parking_lot::Condvar::new(),
};

/// Waiters of one condition variable.
///
/// Every waiter draws a ticket on entry. A wakeup moves the oldest ticket
/// from `waiting` to `woken`, so it can only be consumed by a thread that
/// was already blocked when the wakeup was sent.
#[derive(Default)]
struct CondWaiters {
    next_ticket: u64,
    waiting: BTreeSet<u64>,
    woken: BTreeSet<u64>,
}

struct Waiters {
    /// Threads blocked acquiring each mutex.
    locks: BTreeMap<usize, usize>,
    /// Threads blocked on each condition variable.
    conds: BTreeMap<usize, CondWaiters>,
}

impl Waiters {
    const fn new() -> Self {
        Self {
            locks: BTreeMap::new(),
            conds: BTreeMap::new(),
        }
    }

    fn lock_waiters(&self, key: usize) -> usize {
        self.locks.get(&key).copied().unwrap_or(0)
    }

    fn add_lock_waiter(&mut self, key: usize) {
        *self.locks.entry(key).or_insert(0) += 1;
    }

    fn remove_lock_waiter(&mut self, key: usize) {
        if let Some(count) = self.locks.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.locks.remove(&key);
            }
        }
    }

    fn enter_cond(&mut self, key: usize) -> u64 {
        let entry = self.conds.entry(key).or_default();
        let ticket = entry.next_ticket;
        entry.next_ticket += 1;
        entry.waiting.insert(ticket);
        ticket
    }

    fn is_woken(&self, key: usize, ticket: u64) -> bool {
        self.conds
            .get(&key)
            .is_some_and(|entry| entry.woken.contains(&ticket))
    }

    fn leave_cond(&mut self, key: usize, ticket: u64) {
        if let Some(entry) = self.conds.get_mut(&key) {
            entry.waiting.remove(&ticket);
            entry.woken.remove(&ticket);
            if entry.waiting.is_empty() && entry.woken.is_empty() {
                self.conds.remove(&key);
            }
        }
    }
}

type Table = MutexGuard<'static, Waiters>;

/// A kernel mutex: a 32-bit word holding `0` when unlocked, or the owner's
/// [`thread_tag`], with [`HANDLE_WAIT_MASK`] set while others wait.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct Mutex {
    tag: AtomicU32,
}

impl Mutex {
    /// Construct a new unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tag: AtomicU32::new(0),
        }
    }

    #[inline]
    fn key(&self) -> usize {
        core::ptr::from_ref(&self.tag).addr()
    }

    /// Block until the calling thread owns the mutex.
    ///
    /// Locking a mutex the calling thread already owns never returns.
    pub fn lock(&self) {
        let me = thread_tag();
        if self.tag.compare_exchange(0, me, Acquire, Relaxed).is_ok() {
            return;
        }
        let mut table = ARBITER.table.lock();
        self.acquire(&mut table, me);
    }

    /// Acquire the mutex without blocking, returning whether it was acquired.
    pub fn try_lock(&self) -> bool {
        self.tag
            .compare_exchange(0, thread_tag(), Acquire, Relaxed)
            .is_ok()
    }

    /// Release the mutex and wake any threads blocked on it.
    ///
    /// `self` is not touched once the word has been cleared, so the memory
    /// may be reused as soon as another thread acquires it.
    pub fn unlock(&self) {
        if self.tag.swap(0, Release) & HANDLE_WAIT_MASK != 0 {
            let _table = ARBITER.table.lock();
            ARBITER.wake.notify_all();
        }
    }

    /// Test whether any thread owns the mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.tag.load(Relaxed) != 0
    }

    /// Return the raw tag word.
    #[must_use]
    pub fn tag(&self) -> u32 {
        self.tag.load(Relaxed)
    }

    /// Release with the arbiter table already held.
    fn unlock_locked(&self) {
        if self.tag.swap(0, Release) & HANDLE_WAIT_MASK != 0 {
            ARBITER.wake.notify_all();
        }
    }

    /// Slow path of `lock`, with the arbiter table held.
    fn acquire(&self, table: &mut Table, me: u32) {
        let key = self.key();
        loop {
            let current = self.tag.load(Relaxed);
            if current == 0 {
                let tag = if table.lock_waiters(key) > 0 {
                    me | HANDLE_WAIT_MASK
                } else {
                    me
                };
                if self.tag.compare_exchange(0, tag, Acquire, Relaxed).is_ok() {
                    return;
                }
                continue;
            }
            if current & HANDLE_WAIT_MASK == 0
                && self
                    .tag
                    .compare_exchange(current, current | HANDLE_WAIT_MASK, Relaxed, Relaxed)
                    .is_err()
            {
                continue;
            }
            table.add_lock_waiter(key);
            ARBITER.wake.wait(table);
            table.remove_lock_waiter(key);
        }
    }
}

/// A kernel recursive mutex.
///
/// The fields are public because the condition-variable layer takes the
/// ownership apart around a wait and puts it back afterwards.
#[derive(Debug, Default)]
pub struct RMutex {
    /// The underlying mutex, held while `counter` is non-zero.
    pub lock: Mutex,
    /// [`thread_tag`] of the owner, or `0`.
    pub thread_tag: AtomicU32,
    /// Number of times the owner has locked it.
    pub counter: AtomicU32,
}

impl RMutex {
    /// Construct a new unlocked recursive mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(),
            thread_tag: AtomicU32::new(0),
            counter: AtomicU32::new(0),
        }
    }

    /// Lock, blocking unless the calling thread already owns it.
    pub fn lock(&self) {
        let me = thread_tag();
        if self.thread_tag.load(Relaxed) != me {
            self.lock.lock();
            self.thread_tag.store(me, Relaxed);
        }
        self.counter.fetch_add(1, Relaxed);
    }

    /// Lock without blocking, returning whether the lock was taken.
    pub fn try_lock(&self) -> bool {
        let me = thread_tag();
        if self.thread_tag.load(Relaxed) != me {
            if !self.lock.try_lock() {
                return false;
            }
            self.thread_tag.store(me, Relaxed);
        }
        self.counter.fetch_add(1, Relaxed);
        true
    }

    /// Undo one `lock`, releasing the mutex when the count reaches zero.
    pub fn unlock(&self) {
        if self.counter.fetch_sub(1, Relaxed) == 1 {
            self.thread_tag.store(0, Relaxed);
            self.lock.unlock();
        }
    }
}

/// A kernel condition variable.
#[derive(Debug, Default)]
pub struct CondVar {
    // Waiters are tracked by the arbiter under this field's address.
    _key: u32,
}

impl CondVar {
    /// Construct a new condition variable.
    #[must_use]
    pub const fn new() -> Self {
        Self { _key: 0 }
    }

    #[inline]
    fn key(&self) -> usize {
        core::ptr::from_ref(self).addr()
    }

    /// Release `mutex`, wait for a wakeup or for `timeout` nanoseconds to
    /// elapse, and reacquire `mutex`.
    ///
    /// The calling thread must own `mutex`. A `timeout` of `u64::MAX` waits
    /// forever. The mutex is reacquired whether or not the wait timed out.
    pub fn wait_timeout(&self, mutex: &Mutex, timeout: u64) -> Result<(), KernelError> {
        let key = self.key();
        let me = thread_tag();
        let deadline = if timeout == u64::MAX {
            None
        } else {
            Instant::now().checked_add(Duration::from_nanos(timeout))
        };

        let mut table = ARBITER.table.lock();
        let ticket = table.enter_cond(key);
        mutex.unlock_locked();

        let result = loop {
            if table.is_woken(key, ticket) {
                break Ok(());
            }
            match deadline {
                None => ARBITER.wake.wait(&mut table),
                Some(deadline) => {
                    if ARBITER.wake.wait_until(&mut table, deadline).timed_out() {
                        break if table.is_woken(key, ticket) {
                            Ok(())
                        } else {
                            Err(KernelError::TimedOut)
                        };
                    }
                }
            }
        };
        table.leave_cond(key, ticket);
        mutex.acquire(&mut table, me);
        result
    }

    /// Release `mutex`, wait for a wakeup, and reacquire `mutex`.
    pub fn wait(&self, mutex: &Mutex) -> Result<(), KernelError> {
        self.wait_timeout(mutex, u64::MAX)
    }

    /// Wake the longest-waiting thread, if any.
    pub fn wake_one(&self) -> Result<(), KernelError> {
        let mut table = ARBITER.table.lock();
        if let Some(entry) = table.conds.get_mut(&self.key()) {
            if let Some(ticket) = entry.waiting.pop_first() {
                entry.woken.insert(ticket);
                ARBITER.wake.notify_all();
            }
        }
        Ok(())
    }

    /// Wake every thread that is waiting.
    pub fn wake_all(&self) -> Result<(), KernelError> {
        let mut table = ARBITER.table.lock();
        if let Some(entry) = table.conds.get_mut(&self.key()) {
            if !entry.waiting.is_empty() {
                let mut waiting = core::mem::take(&mut entry.waiting);
                entry.woken.append(&mut waiting);
                ARBITER.wake.notify_all();
            }
        }
        Ok(())
    }
}
