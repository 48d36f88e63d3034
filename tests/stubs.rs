//! The memory-mapping and dynamic-loader stand-ins.

use core::ptr::null_mut;
use horizon_pthread::{dl, mm};
use rustix::mm::{MapFlags, ProtFlags};

#[test]
fn mmap_page_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();

    let page = mm::mmap(
        null_mut(),
        4096,
        ProtFlags::READ | ProtFlags::WRITE,
        MapFlags::PRIVATE,
        None,
        0,
    )
    .unwrap();
    unsafe {
        page.cast::<u8>().write_bytes(0x7F, 4096);
        assert_eq!(page.cast::<u8>().add(4095).read(), 0x7F);
        mm::munmap(page, 4096).unwrap();
    }
}

#[cfg(not(feature = "dynamic-loader"))]
#[test]
fn loader_is_unavailable() {
    assert!(dl::open(None).is_none());
    assert!(dl::open_with(Some(c"libm.so.6"), dl::OpenFlags::NOW).is_none());
    assert!(dl::last_error().is_none());
}

#[cfg(feature = "dynamic-loader")]
#[test]
fn loader_forwards_to_host() {
    let library = dl::open(None).unwrap();
    assert!(dl::resolve(&library, c"free").is_some());
    unsafe { dl::close(library) };
}
