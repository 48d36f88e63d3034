#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

#[cfg(all(feature = "env_logger", target_os = "linux"))]
mod log;

pub mod attr;
pub mod cond;
pub mod dl;
pub mod kernel;
pub mod key;
pub mod mm;
pub mod mutex;
pub mod sched;
pub mod thread;

pub use attr::{CondAttr, MutexAttr, SchedParam, ThreadAttr};
pub use cond::Condvar;
pub use mutex::Mutex;
pub use thread::Pthread;
