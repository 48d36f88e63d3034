//! Threads, mutexes, and condition variables working together.

use core::ffi::c_void;
use core::ptr::{null_mut, without_provenance, without_provenance_mut};
use horizon_pthread::thread::{self, Pthread, ThreadState};
use horizon_pthread::{CondAttr, Condvar, Mutex, MutexAttr, ThreadAttr, key};
use rustix::io::Errno;
use rustix::time::{ClockId, clock_gettime};
use std::sync::Arc;
use std::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::sync::atomic::{AtomicU64, AtomicUsize};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

unsafe fn echo(arg: *mut c_void) -> *mut c_void {
    arg
}

#[test]
fn every_thread_sees_its_own_argument() {
    init_logger();
    let threads: Vec<_> = (0..32)
        .map(|i| unsafe { thread::create(None, echo, without_provenance_mut(i)) }.unwrap())
        .collect();
    for (i, thread) in threads.into_iter().enumerate() {
        assert_eq!(unsafe { thread::join(thread) }.unwrap(), i as i32);
    }
}

unsafe fn count_start(arg: *mut c_void) -> *mut c_void {
    let started = unsafe { &*arg.cast::<AtomicUsize>() };
    without_provenance_mut(started.fetch_add(1, SeqCst) + 1)
}

#[test]
fn create_returns_after_the_thread_starts() {
    init_logger();
    let started = AtomicUsize::new(0);
    let arg = core::ptr::from_ref(&started).cast_mut().cast();
    let threads: Vec<_> = (0..16)
        .map(|_| {
            let thread = unsafe { thread::create(None, count_start, arg) }.unwrap();
            assert_ne!(unsafe { thread::state(thread) }, Ok(ThreadState::Starting));
            thread
        })
        .collect();
    let mut seen: Vec<_> = threads
        .into_iter()
        .map(|thread| unsafe { thread::join(thread) }.unwrap())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (1..=16).collect::<Vec<_>>());
    assert_eq!(started.load(SeqCst), 16);
}

#[cfg(target_pointer_width = "64")]
#[test]
fn exit_codes_are_truncated() {
    init_logger();
    let big = without_provenance_mut(0x1_0000_0007_usize);
    let thread = unsafe { thread::create(None, echo, big) }.unwrap();
    assert_eq!(unsafe { thread::join(thread) }.unwrap(), 7);
}

#[test]
fn shared_counter() {
    init_logger();
    let shared = Arc::new((
        Mutex::init(Some(&MutexAttr::new())).unwrap(),
        AtomicU64::new(0),
    ));
    let threads: Vec<_> = (0..2)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(None, move || {
                let (mutex, counter) = &*shared;
                for _ in 0..10_000 {
                    mutex.lock().unwrap();
                    let value = counter.load(Relaxed);
                    counter.store(value + 1, Relaxed);
                    mutex.unlock().unwrap();
                }
                0
            })
            .unwrap()
        })
        .collect();
    for thread in threads {
        unsafe { thread::join(thread) }.unwrap();
    }
    assert_eq!(shared.1.load(SeqCst), 20_000);
}

#[test]
fn sentinel_thread() {
    init_logger();
    let me = thread::current();
    assert_eq!(me, Pthread::MAIN);
    assert!(thread::equal(me, thread::current()));
    assert_eq!(unsafe { thread::join(me) }, Err(Errno::INVAL));

    let child = thread::spawn(None, || {
        let me = thread::current();
        i32::from(!me.is_main() && thread::equal(me, thread::current()))
    })
    .unwrap();
    assert!(!thread::equal(child, Pthread::MAIN));
    thread::detach(child).unwrap();
    assert_eq!(unsafe { thread::join(child) }.unwrap(), 1);
}

#[test]
fn specific_values_are_per_thread() {
    init_logger();
    let key = key::create(None).unwrap();
    key::set(key, without_provenance(100)).unwrap();

    let threads: Vec<_> = (1..=2)
        .map(|i| {
            thread::spawn(None, move || {
                if !key::get(key).is_null() {
                    return -1;
                }
                key::set(key, without_provenance(i)).unwrap();
                key::get(key).addr() as i32
            })
            .unwrap()
        })
        .collect();
    for (i, thread) in (1..=2).zip(threads) {
        assert_eq!(unsafe { thread::join(thread) }.unwrap(), i);
    }
    assert_eq!(key::get(key).addr(), 100);
    key::delete(key).unwrap();
}

static DESTROYED: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_destruction(value: *mut c_void) {
    DESTROYED.fetch_add(value.addr(), SeqCst);
}

#[test]
fn destructors_run_on_exit() {
    init_logger();
    let key = key::create(Some(count_destruction)).unwrap();
    let thread = thread::spawn(None, move || {
        key::set(key, without_provenance(5)).unwrap();
        0
    })
    .unwrap();
    unsafe { thread::join(thread) }.unwrap();

    let thread = thread::spawn(None, move || {
        key::set(key, without_provenance(3)).unwrap();
        key::set(key, null_mut()).unwrap();
        thread::exit(without_provenance_mut(4))
    })
    .unwrap();
    assert_eq!(unsafe { thread::join(thread) }.unwrap(), 4);

    assert_eq!(DESTROYED.load(SeqCst), 5);
    key::delete(key).unwrap();
}

#[test]
fn recursive_lock_depth() {
    init_logger();
    let mut attr = MutexAttr::new();
    attr.set_recursive(true).unwrap();
    let mutex = Arc::new(Mutex::init(Some(&attr)).unwrap());

    let holder = {
        let mutex = mutex.clone();
        thread::spawn(None, move || {
            for _ in 0..3 {
                mutex.lock().unwrap();
            }
            for _ in 0..3 {
                mutex.unlock().unwrap();
            }
            0
        })
        .unwrap()
    };
    unsafe { thread::join(holder) }.unwrap();

    mutex.try_lock().unwrap();
    mutex.unlock().unwrap();
}

#[test]
fn timed_wait_in_the_past() {
    init_logger();
    let mutex = Mutex::init(Some(&MutexAttr::new())).unwrap();
    let cond = Condvar::init(Some(&CondAttr::new())).unwrap();
    let mut deadline = clock_gettime(ClockId::Realtime);
    deadline.tv_sec -= 10;

    mutex.lock().unwrap();
    assert_eq!(cond.timed_wait(&mutex, Some(&deadline)), Err(Errno::TIMEDOUT));
    assert_eq!(mutex.try_lock(), Err(Errno::INVAL));
    mutex.unlock().unwrap();
}

#[test]
fn signal_goes_to_a_thread_already_waiting() {
    init_logger();
    let shared = Arc::new((
        Mutex::init(Some(&MutexAttr::new())).unwrap(),
        Condvar::init(Some(&CondAttr::new())).unwrap(),
        AtomicUsize::new(0),
    ));

    let waiter = {
        let shared = shared.clone();
        thread::spawn(None, move || {
            let (mutex, cond, waiting) = &*shared;
            let mut deadline = clock_gettime(ClockId::Realtime);
            deadline.tv_sec += 5;
            mutex.lock().unwrap();
            waiting.store(1, Relaxed);
            let woken = cond.timed_wait(mutex, Some(&deadline)).is_ok();
            mutex.unlock().unwrap();
            i32::from(woken)
        })
        .unwrap()
    };

    let (mutex, cond, waiting) = &*shared;
    loop {
        mutex.lock().unwrap();
        if waiting.load(Relaxed) != 0 {
            break;
        }
        mutex.unlock().unwrap();
        horizon_pthread::sched::yield_now();
    }
    cond.signal().unwrap();
    let now = clock_gettime(ClockId::Realtime);
    assert_eq!(cond.timed_wait(mutex, Some(&now)), Err(Errno::TIMEDOUT));
    mutex.unlock().unwrap();

    assert_eq!(unsafe { thread::join(waiter) }.unwrap(), 1);
}

#[test]
fn broadcast_releases_all_waiters() {
    init_logger();
    let shared = Arc::new((
        Mutex::init(Some(&MutexAttr::new())).unwrap(),
        Condvar::init(None).unwrap(),
        AtomicUsize::new(0),
    ));
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(None, move || {
                let (mutex, cond, go) = &*shared;
                mutex.lock().unwrap();
                while go.load(Relaxed) == 0 {
                    cond.wait(mutex).unwrap();
                }
                mutex.unlock().unwrap();
                1
            })
            .unwrap()
        })
        .collect();

    let (mutex, cond, go) = &*shared;
    mutex.lock().unwrap();
    go.store(1, Relaxed);
    cond.broadcast().unwrap();
    mutex.unlock().unwrap();

    let woken: i32 = waiters
        .into_iter()
        .map(|thread| unsafe { thread::join(thread) }.unwrap())
        .sum();
    assert_eq!(woken, 4);
}

#[test]
fn recursive_mutex_with_condvar() {
    init_logger();
    let mut attr = MutexAttr::new();
    attr.set_recursive(true).unwrap();
    let shared = Arc::new((
        Mutex::init(Some(&attr)).unwrap(),
        Condvar::init(None).unwrap(),
        AtomicUsize::new(0),
    ));

    let waiter = {
        let shared = shared.clone();
        thread::spawn(None, move || {
            let (mutex, cond, ready) = &*shared;
            mutex.lock().unwrap();
            while ready.load(Relaxed) == 0 {
                cond.wait(mutex).unwrap();
            }
            // Still held exactly once, by this thread.
            mutex.lock().unwrap();
            mutex.unlock().unwrap();
            mutex.unlock().unwrap();
            0
        })
        .unwrap()
    };

    let (mutex, cond, ready) = &*shared;
    mutex.lock().unwrap();
    ready.store(1, Relaxed);
    cond.signal().unwrap();
    mutex.unlock().unwrap();
    unsafe { thread::join(waiter) }.unwrap();

    mutex.try_lock().unwrap();
    mutex.unlock().unwrap();
}

#[test]
fn thread_attrs() {
    init_logger();
    let mut attr = ThreadAttr::new();
    attr.set_stack_size(256 * 1024).unwrap();
    let thread = thread::spawn(Some(&attr), || 0).unwrap();
    unsafe { thread::join(thread) }.unwrap();

    let unspecified = Errno::from_raw_os_error(thread::UNSPECIFIED_ERRNO);
    attr.set_stack_size(0).unwrap();
    assert_eq!(thread::spawn(Some(&attr), || 0).err(), Some(unspecified));
}
