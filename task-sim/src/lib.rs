//! Host-side harness for `task-core`: processes run as threads, `wait`
//! blocks on condition variables.

pub mod error;
pub mod logging;
pub mod runtime;
pub mod scenario;
pub mod wait_queue;

pub use error::{SimError, SimResult};
pub use runtime::{default_image, Kernel, Process, PANIC_EXIT_CODE};
pub use wait_queue::CondvarWaitQueue;
