// 进程控制块: 进程表中的一个槽位
use crate::memory_set::MemorySet;
use crate::pid::Pid;

// 未使用、初始化中、准备执行、正在执行、睡眠、已退出
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TaskStatus {
    Unused,
    Used,
    Runnable,
    Running,
    Sleeping,
    Zombie,
}

impl TaskStatus {
    /// Whether the lifecycle allows going from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Unused, Used)
                | (Used, Runnable)
                | (Runnable, Running)
                | (Running, Runnable)
                | (Running, Sleeping)
                | (Sleeping, Runnable)
                | (Running, Zombie)
                | (Zombie, Unused)
        )
    }
    /// A process that has been created and not yet exited.
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            TaskStatus::Runnable | TaskStatus::Running | TaskStatus::Sleeping
        )
    }
}

#[derive(Debug)]
pub(crate) struct TaskControlBlock {
    pub pid: Option<Pid>,
    pub status: TaskStatus,
    pub parent: Option<Pid>,
    pub exit_code: Option<i32>,
    // 地址空间: 创建时绑定, 退出时释放
    pub memory_set: Option<MemorySet>,
    pub killed: bool,
    // 正阻塞在 wait 中、代表该进程等待的调用者数量
    pub waiters: usize,
}

impl TaskControlBlock {
    pub const fn unused() -> Self {
        Self {
            pid: None,
            status: TaskStatus::Unused,
            parent: None,
            exit_code: None,
            memory_set: None,
            killed: false,
            waiters: 0,
        }
    }
    pub fn is_zombie(&self) -> bool {
        self.status == TaskStatus::Zombie
    }
    pub fn is_child_of(&self, parent: Pid) -> bool {
        self.status != TaskStatus::Unused && self.parent == Some(parent)
    }
    pub fn info(&self) -> Option<TaskInfo> {
        self.pid.map(|pid| TaskInfo {
            pid,
            status: self.status,
            parent: self.parent,
            exit_code: self.exit_code,
            killed: self.killed,
        })
    }
}

/// Snapshot of one process, taken under the table lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub pid: Pid,
    pub status: TaskStatus,
    pub parent: Option<Pid>,
    pub exit_code: Option<i32>,
    pub killed: bool,
}
