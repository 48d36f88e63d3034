//! Two threads each add to a shared counter under a mutex, and the total is
//! printed once both have been joined.

use horizon_pthread::{Mutex, MutexAttr, thread};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

const INCREMENTS: u64 = 10_000;

fn main() {
    let shared = Arc::new((
        Mutex::init(Some(&MutexAttr::new())).unwrap(),
        AtomicU64::new(0),
    ));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let shared = shared.clone();
            thread::spawn(None, move || {
                let (mutex, counter) = &*shared;
                for _ in 0..INCREMENTS {
                    mutex.lock().unwrap();
                    // A separate load and store, so that a lock that fails
                    // to exclude loses updates.
                    let value = counter.load(Relaxed);
                    counter.store(value + 1, Relaxed);
                    mutex.unlock().unwrap();
                }
                0
            })
            .unwrap()
        })
        .collect();

    for worker in workers {
        assert_eq!(unsafe { thread::join(worker) }.unwrap(), 0);
    }

    println!("{}", shared.1.load(Relaxed));
}
