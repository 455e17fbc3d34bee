use crate::address::{VirtAddr, VirtPageNum};
use crate::pid::Pid;
use crate::task::TaskStatus;
use core::fmt;

/// Errors reported by the process table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskError {
    /// Every slot of the table is in use.
    ResourceExhausted,
    /// The operation is not legal from the process's current state.
    InvalidState { pid: Pid, status: TaskStatus },
    /// The caller has no (matching) child to wait for.
    NoChildren,
    /// A requested mapping reaches `MAXVA`.
    AddressOutOfRange(VirtAddr),
    NoSuchProcess(Pid),
    /// The waiting process was torn down while blocked.
    Killed,
    AlreadyMapped(VirtPageNum),
    BadElf(&'static str),
    InvalidConfig(&'static str),
}

pub type Result<T> = core::result::Result<T, TaskError>;

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::ResourceExhausted => write!(f, "process table is full"),
            TaskError::InvalidState { pid, status } => {
                write!(f, "pid {} is in state {:?}", pid, status)
            }
            TaskError::NoChildren => write!(f, "no children to wait for"),
            TaskError::AddressOutOfRange(va) => write!(f, "{:?} is beyond MAXVA", va),
            TaskError::NoSuchProcess(pid) => write!(f, "no process with pid {}", pid),
            TaskError::Killed => write!(f, "process was killed"),
            TaskError::AlreadyMapped(vpn) => write!(f, "{:?} is already mapped", vpn),
            TaskError::BadElf(reason) => write!(f, "bad elf: {}", reason),
            TaskError::InvalidConfig(reason) => write!(f, "invalid config: {}", reason),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TaskError {}
