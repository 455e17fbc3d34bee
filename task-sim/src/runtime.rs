//! A thread-per-process runtime on top of the process table.
//!
//! Every simulated process runs its body on its own host thread. The
//! "scheduler" is the host's: a thread marks its process RUNNING when it
//! starts and the body's return value becomes the exit code.

use crate::error::{SimError, SimResult};
use crate::wait_queue::CondvarWaitQueue;
use log::{error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use task_core::{
    MapPermission, MapRequest, Pid, ProcessTable, TableConfig, TaskError, TaskStatus, WaitTarget,
};

// 进程体 panic 时的退出码, 与内核处理用户态异常时一致
pub const PANIC_EXIT_CODE: i32 = -2;

/// Text and data regions given to every process started by [`Kernel::spawn`].
pub fn default_image() -> [MapRequest; 2] {
    [
        MapRequest::new(0x1000, 0x3000, MapPermission::R | MapPermission::X | MapPermission::U),
        MapRequest::new(0x3000, 0x4000, MapPermission::R | MapPermission::W | MapPermission::U),
    ]
}

#[derive(Clone)]
pub struct Kernel {
    table: Arc<ProcessTable>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Kernel {
    pub fn boot(config: TableConfig) -> SimResult<Self> {
        let queue = Arc::new(CondvarWaitQueue::new(config.capacity));
        let table = ProcessTable::new(config, queue)?;
        Ok(Self {
            table: Arc::new(table),
            threads: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn init(&self) -> Pid {
        self.table.adopter()
    }

    /// Creates a child of `parent` with [`default_image`] and runs `body` as it.
    pub fn spawn<F>(&self, parent: Pid, body: F) -> SimResult<Pid>
    where
        F: FnOnce(&Process) -> i32 + Send + 'static,
    {
        let pid = self.table.create(parent, &default_image())?;
        self.run(pid, body)?;
        Ok(pid)
    }

    fn run<F>(&self, pid: Pid, body: F) -> SimResult<()>
    where
        F: FnOnce(&Process) -> i32 + Send + 'static,
    {
        let process = Process {
            pid,
            kernel: self.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("pid{}", pid))
            .spawn(move || process.main(body));
        match spawned {
            Ok(handle) => {
                self.threads
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(handle);
                Ok(())
            }
            Err(err) => {
                // 线程起不来: 让进程立刻退出, 保证它仍能被回收
                self.table.transition(pid, TaskStatus::Running)?;
                self.table.exit(pid, PANIC_EXIT_CODE)?;
                Err(SimError::Spawn(err))
            }
        }
    }

    /// Runs the init loop on the calling thread: reap until init has no
    /// children left, join every process thread, then check the table.
    pub fn run_init(&self) -> SimResult<Vec<(Pid, i32)>> {
        let init = self.init();
        let mut reaped = Vec::new();
        loop {
            match self.table.wait(init, WaitTarget::Any) {
                Ok((pid, exit_code)) => {
                    info!(
                        "[initproc] Released a zombie process, pid={}, exit_code={}",
                        pid, exit_code
                    );
                    reaped.push((pid, exit_code));
                }
                Err(TaskError::NoChildren) => break,
                Err(err) => return Err(err.into()),
            }
        }
        self.join_all();
        self.table.verify()?;
        if self.table.live_count() != 1 {
            return Err(SimError::Lost {
                live: self.table.live_count() - 1,
            });
        }
        Ok(reaped)
    }

    fn join_all(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = self
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    error!("process thread terminated abnormally");
                }
            }
        }
    }
}

/// The view a process body has of itself.
pub struct Process {
    pid: Pid,
    kernel: Kernel,
}

impl Process {
    fn main<F>(self, body: F)
    where
        F: FnOnce(&Process) -> i32,
    {
        // 被调度器选中
        if let Err(err) = self.table().transition(self.pid, TaskStatus::Running) {
            error!("pid {} cannot start: {}", self.pid, err);
            return;
        }
        let exit_code = match panic::catch_unwind(AssertUnwindSafe(|| body(&self))) {
            Ok(exit_code) => exit_code,
            Err(_) => {
                error!("[kernel] pid {} panicked, core dumped.", self.pid);
                PANIC_EXIT_CODE
            }
        };
        if let Err(err) = self.table().exit(self.pid, exit_code) {
            error!("pid {} cannot exit: {}", self.pid, err);
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn table(&self) -> &ProcessTable {
        self.kernel.table()
    }

    pub fn parent(&self) -> Option<Pid> {
        self.table().parent_of(self.pid)
    }

    /// Forks a child that runs `body` with a copy of this address space.
    pub fn fork<F>(&self, body: F) -> SimResult<Pid>
    where
        F: FnOnce(&Process) -> i32 + Send + 'static,
    {
        let pid = self.table().fork(self.pid)?;
        self.kernel.run(pid, body)?;
        Ok(pid)
    }

    pub fn wait(&self) -> task_core::Result<(Pid, i32)> {
        self.table().wait(self.pid, WaitTarget::Any)
    }

    pub fn waitpid(&self, child: Pid) -> task_core::Result<i32> {
        self.table()
            .wait(self.pid, WaitTarget::Pid(child))
            .map(|(_, exit_code)| exit_code)
    }

    pub fn sleep(&self, duration: Duration) -> task_core::Result<()> {
        self.table().transition(self.pid, TaskStatus::Sleeping)?;
        thread::sleep(duration);
        self.table().transition(self.pid, TaskStatus::Runnable)?;
        self.table().transition(self.pid, TaskStatus::Running)
    }

    pub fn yield_(&self) -> task_core::Result<()> {
        self.table().transition(self.pid, TaskStatus::Runnable)?;
        thread::yield_now();
        self.table().transition(self.pid, TaskStatus::Running)
    }
}
