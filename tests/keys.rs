//! The process-wide key registry.
//!
//! This is a single test so that nothing else allocates keys meanwhile.

use core::ptr::without_provenance;
use horizon_pthread::key::{self, KEYS_MAX};
use rustix::io::Errno;

#[test]
fn key_registry_lifecycle() {
    let _ = env_logger::builder().is_test(true).try_init();

    let keys: Vec<_> = (0..KEYS_MAX).map(|_| key::create(None).unwrap()).collect();
    assert_eq!(key::create(None), Err(Errno::AGAIN));

    key::set(keys[3], without_provenance(33)).unwrap();
    key::delete(keys[3]).unwrap();
    let reused = key::create(None).unwrap();
    assert_eq!(reused, keys[3]);
    assert!(key::get(reused).is_null());

    key::set(keys[5], without_provenance(55)).unwrap();
    key::teardown();
    assert_eq!(key::set(keys[5], without_provenance(1)), Err(Errno::INVAL));
    assert!(key::get(keys[5]).is_null());

    let fresh: Vec<_> = (0..KEYS_MAX).map(|_| key::create(None).unwrap()).collect();
    assert!(fresh.iter().all(|&key| key::get(key).is_null()));
    key::teardown();
}
