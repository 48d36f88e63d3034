//! Scheduling.

use crate::kernel;

/// How long [`yield_now`] gives up the processor for, in nanoseconds.
pub const YIELD_QUANTUM_NS: i64 = 100_000;

/// Give up the processor for the kernel's default quantum.
pub fn yield_now() {
    kernel::sleep_thread(YIELD_QUANTUM_NS);
}

/// Return the lowest priority value accepted for `policy`.
///
/// All policies share the kernel's priority range.
#[must_use]
pub fn priority_min(_policy: i32) -> i32 {
    kernel::PRIORITY_MIN
}

/// Return the highest priority value accepted for `policy`.
#[must_use]
pub fn priority_max(_policy: i32) -> i32 {
    kernel::PRIORITY_MAX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::SCHED_OTHER;

    #[test]
    fn priority_range() {
        assert_eq!(priority_min(SCHED_OTHER), 0);
        assert_eq!(priority_max(SCHED_OTHER), 0x3F);
        yield_now();
    }
}
