//! Thread-specific data keys.
//!
//! The process has [`KEYS_MAX`] keys. Each key slot carries a sequence
//! number: even while the key is free, odd while it is allocated. Each
//! thread stores, per key, the value it set and the sequence number the key
//! had at the time, so values set under a deleted key are never seen through
//! a later key that reuses the slot.

use crate::thread;
use core::cell::UnsafeCell;
use core::ffi::c_void;
use core::ptr::null_mut;
use parking_lot::Mutex;
use rustix::io::{self, Errno};
use std::sync::OnceLock;

/// Number of keys available to the process.
pub const KEYS_MAX: usize = 32;

/// Number of times destructors are run on thread exit while values remain.
pub const DESTRUCTOR_ITERATIONS: usize = 4;

/// A thread-specific data key.
pub type Key = u32;

/// A function run on thread exit for each non-null value of a key.
pub type Destructor = unsafe fn(*mut c_void);

#[derive(Clone, Copy)]
struct KeySlot {
    seq: u32,
    destructor: Option<Destructor>,
}

impl KeySlot {
    const VACANT: Self = Self {
        seq: 0,
        destructor: None,
    };

    #[inline]
    fn in_use(&self) -> bool {
        self.seq & 1 == 1
    }
}

struct KeyRegistry {
    slots: [KeySlot; KEYS_MAX],
}

static REGISTRY: OnceLock<Mutex<KeyRegistry>> = OnceLock::new();

fn registry() -> &'static Mutex<KeyRegistry> {
    REGISTRY.get_or_init(|| {
        Mutex::new(KeyRegistry {
            slots: [KeySlot::VACANT; KEYS_MAX],
        })
    })
}

#[derive(Clone, Copy)]
struct Specific {
    seq: u32,
    data: *mut c_void,
}

impl Specific {
    const EMPTY: Self = Self {
        seq: 0,
        data: null_mut(),
    };
}

/// One thread's values for every key.
pub(crate) struct SpecificSlots(UnsafeCell<[Specific; KEYS_MAX]>);

// SAFETY: Only the owning thread reads or writes its slots.
unsafe impl Sync for SpecificSlots {}

impl SpecificSlots {
    pub(crate) const fn new() -> Self {
        Self(UnsafeCell::new([Specific::EMPTY; KEYS_MAX]))
    }
}

std::thread_local! {
    /// Slots for threads that were not created by this layer.
    static FOREIGN_SLOTS: SpecificSlots = const { SpecificSlots::new() };
}

/// Run `f` on the calling thread's slots.
///
/// `f` must not call back into this module.
fn with_slots<R>(f: impl FnOnce(&mut [Specific; KEYS_MAX]) -> R) -> R {
    let me = thread::current();
    if me.is_main() {
        FOREIGN_SLOTS.with(|slots| f(unsafe { &mut *slots.0.get() }))
    } else {
        f(unsafe { &mut *me.control().specific.0.get() })
    }
}

#[inline]
fn index(key: Key) -> Option<usize> {
    let index = usize::try_from(key).ok()?;
    (index < KEYS_MAX).then_some(index)
}

/// Allocate a key, with an optional destructor for the values threads leave
/// in it.
///
/// Fails with `EAGAIN` if all keys are in use.
pub fn create(destructor: Option<Destructor>) -> io::Result<Key> {
    let mut registry = registry().lock();
    let (index, slot) = registry
        .slots
        .iter_mut()
        .enumerate()
        .find(|(_, slot)| !slot.in_use())
        .ok_or(Errno::AGAIN)?;
    slot.seq = slot.seq.wrapping_add(1);
    slot.destructor = destructor;

    #[cfg(feature = "log")]
    log::trace!("Key {index} created");

    Ok(index as Key)
}

/// Free `key`. Values threads have stored under it are not destroyed.
pub fn delete(key: Key) -> io::Result<()> {
    let index = index(key).ok_or(Errno::INVAL)?;
    let mut registry = registry().lock();
    let slot = &mut registry.slots[index];
    if !slot.in_use() {
        return Err(Errno::INVAL);
    }
    slot.seq = slot.seq.wrapping_add(1);
    slot.destructor = None;
    Ok(())
}

/// Return the calling thread's value for `key`, or null if it has none.
#[must_use]
pub fn get(key: Key) -> *mut c_void {
    let Some(index) = index(key) else {
        return null_mut();
    };
    let seq = registry().lock().slots[index].seq;
    with_slots(|slots| {
        let specific = slots[index];
        if specific.seq == seq {
            specific.data
        } else {
            null_mut()
        }
    })
}

/// Set the calling thread's value for `key`.
pub fn set(key: Key, data: *const c_void) -> io::Result<()> {
    let index = index(key).ok_or(Errno::INVAL)?;
    let slot = registry().lock().slots[index];
    if !slot.in_use() {
        return Err(Errno::INVAL);
    }
    with_slots(|slots| {
        slots[index] = Specific {
            seq: slot.seq,
            data: data.cast_mut(),
        };
    });
    Ok(())
}

/// Run the destructors for the calling thread's values.
///
/// Each value is cleared before its destructor runs. Destructors may set new
/// values, so this repeats up to [`DESTRUCTOR_ITERATIONS`] times.
pub(crate) fn run_destructors() {
    for _ in 0..DESTRUCTOR_ITERATIONS {
        let registry = registry().lock().slots;
        let pending = with_slots(|slots| {
            let mut pending = Vec::new();
            for (specific, slot) in slots.iter_mut().zip(registry.iter()) {
                if specific.data.is_null() || specific.seq != slot.seq {
                    continue;
                }
                if let Some(destructor) = slot.destructor {
                    pending.push((destructor, specific.data));
                    specific.data = null_mut();
                }
            }
            pending
        });
        if pending.is_empty() {
            return;
        }
        for (destructor, data) in pending {
            unsafe { destructor(data) };
        }
    }
}

/// Free every key.
///
/// Keys created afterwards start out with no values in any thread.
pub fn teardown() {
    let mut registry = registry().lock();
    for slot in &mut registry.slots {
        if slot.in_use() {
            slot.seq = slot.seq.wrapping_add(1);
        }
        slot.destructor = None;
    }
}
