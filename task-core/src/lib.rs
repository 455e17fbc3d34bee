//! Process lifecycle core: a fixed-capacity process table with exit,
//! reparenting of orphans to the init process, and wait/reap.
//!
//! The crate is `no_std`; the embedding kernel supplies a [`WaitQueue`] that
//! suspends the calling task, the host harness supplies one built on
//! condition variables.

#![no_std]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod address;
pub mod config;
mod context;
mod error;
mod memory_set;
mod pid;
mod table;
mod task;
mod wait_queue;
#[cfg(test)]
mod testutil;

pub use address::{VPNRange, VirtAddr, VirtPageNum};
pub use config::TableConfig;
pub use context::read_sp;
pub use error::{Result, TaskError};
pub use memory_set::{MapArea, MapPermission, MapRequest, MemorySet};
pub use pid::Pid;
pub use table::{InvariantViolation, ProcessTable, WaitTarget};
pub use task::{TaskInfo, TaskStatus};
pub use wait_queue::{SpinWaitQueue, WaitQueue};
