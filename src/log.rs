//! Initialize logging, if enabled.

/// Install the logger before `main`, so that records from threads created
/// by early initializers are not lost.
///
/// Libraries that set up environment-variable state at `.init_array.00098`
/// run before this, so loggers configured by eg. `RUST_LOG` work.
#[unsafe(link_section = ".init_array.00099")]
#[used]
static INIT_ARRAY: unsafe extern "C" fn() = {
    unsafe extern "C" fn function() {
        init()
    }
    function
};

fn init() {
    // The program may have its own logger.
    let _ = env_logger::try_init();

    log::trace!(
        target: "horizon_pthread::thread",
        "Main Thread[{:?}] uses the sentinel handle",
        rustix::thread::gettid().as_raw_nonzero()
    );
}
