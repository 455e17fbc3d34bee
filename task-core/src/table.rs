//! The process table: creation, exit with reparenting, and the wait/reap
//! rendezvous.
//!
//! Every public operation takes the single structural lock for its whole
//! duration, so the table-wide invariants hold whenever the lock is free.

use crate::config::TableConfig;
use crate::context::read_sp;
use crate::error::{Result, TaskError};
use crate::memory_set::{MapRequest, MemorySet};
use crate::pid::{Pid, PidAllocator};
use crate::task::{TaskControlBlock, TaskInfo, TaskStatus};
use crate::wait_queue::WaitQueue;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info, trace, warn};
use spin::{Mutex, MutexGuard};

/// Which children a `wait` call is interested in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitTarget {
    Any,
    Pid(Pid),
}

impl WaitTarget {
    fn matches(self, pid: Pid) -> bool {
        match self {
            WaitTarget::Any => true,
            WaitTarget::Pid(target) => target == pid,
        }
    }
}

enum ZombieLookup {
    Found { slot: usize, pid: Pid, exit_code: i32 },
    Pending,
    NoChildren,
}

/// A broken table-wide invariant, reported by [`ProcessTable::verify`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    pub slot: usize,
    pub reason: &'static str,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}: {}", self.slot, self.reason)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvariantViolation {}

pub struct ProcessTable {
    inner: Mutex<TableInner>,
    wait_queue: Arc<dyn WaitQueue>,
    adopter: Pid,
}

struct TableInner {
    tasks: Vec<TaskControlBlock>,
    pid_allocator: PidAllocator,
}

impl TableInner {
    fn slot_of(&self, pid: Pid) -> Result<usize> {
        self.tasks
            .iter()
            .position(|task| task.status != TaskStatus::Unused && task.pid == Some(pid))
            .ok_or(TaskError::NoSuchProcess(pid))
    }

    // 按槽位下标升序遍历, 保证顺序确定
    fn children_of(&self, parent: Pid) -> impl Iterator<Item = (usize, &TaskControlBlock)> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .filter(move |(_, task)| task.is_child_of(parent))
    }

    fn invalid_state(&self, slot: usize, pid: Pid) -> TaskError {
        TaskError::InvalidState { pid, status: self.tasks[slot].status }
    }

    fn set_status(&mut self, slot: usize, pid: Pid, next: TaskStatus) -> Result<()> {
        let task = &mut self.tasks[slot];
        if !task.status.can_transition_to(next) {
            return Err(TaskError::InvalidState { pid, status: task.status });
        }
        trace!("pid {}: {:?} -> {:?}", pid, task.status, next);
        task.status = next;
        Ok(())
    }

    fn alive_slot(&self, pid: Pid) -> Result<usize> {
        let slot = self.slot_of(pid)?;
        if !self.tasks[slot].status.is_alive() {
            return Err(self.invalid_state(slot, pid));
        }
        Ok(slot)
    }

    fn running_slot(&self, pid: Pid) -> Result<usize> {
        let slot = self.slot_of(pid)?;
        if self.tasks[slot].status != TaskStatus::Running {
            return Err(self.invalid_state(slot, pid));
        }
        Ok(slot)
    }

    fn allocate(&mut self, parent: Pid) -> Result<(usize, Pid)> {
        self.alive_slot(parent)?;
        let slot = self
            .tasks
            .iter()
            .position(|task| task.status == TaskStatus::Unused)
            .ok_or(TaskError::ResourceExhausted)?;
        let pid = self.pid_allocator.alloc();
        self.tasks[slot] = TaskControlBlock {
            pid: Some(pid),
            status: TaskStatus::Used,
            parent: Some(parent),
            ..TaskControlBlock::unused()
        };
        debug!("allocated pid {} in slot {} (parent {})", pid, slot, parent);
        Ok((slot, pid))
    }

    fn activate(&mut self, slot: usize, pid: Pid, memory_set: MemorySet) -> Result<()> {
        self.set_status(slot, pid, TaskStatus::Runnable)?;
        self.tasks[slot].memory_set = Some(memory_set);
        Ok(())
    }

    /// Re-links every child of `dying` to `adopter`. Returns how many were
    /// adopted and whether any of them is already a zombie.
    fn reparent_children(&mut self, dying: Pid, adopter: Pid) -> (usize, bool) {
        let mut adopted = 0;
        let mut adopted_zombie = false;
        for task in self.tasks.iter_mut().filter(|task| task.is_child_of(dying)) {
            task.parent = Some(adopter);
            adopted += 1;
            adopted_zombie |= task.is_zombie();
            if let Some(pid) = task.pid {
                trace!("pid {} adopted by pid {} (was {})", pid, adopter, dying);
            }
        }
        (adopted, adopted_zombie)
    }

    fn find_zombie_child(&self, parent: Pid, target: WaitTarget) -> ZombieLookup {
        let mut has_child = false;
        for (slot, task) in self.children_of(parent) {
            let pid = match task.pid {
                Some(pid) if target.matches(pid) => pid,
                _ => continue,
            };
            has_child = true;
            // 仍有调用者阻塞在它的通道上时暂不回收, 否则槽位可能被复用
            if task.waiters > 0 {
                continue;
            }
            if let (TaskStatus::Zombie, Some(exit_code)) = (task.status, task.exit_code) {
                return ZombieLookup::Found { slot, pid, exit_code };
            }
        }
        if has_child {
            ZombieLookup::Pending
        } else {
            ZombieLookup::NoChildren
        }
    }

    fn reap_slot(&mut self, slot: usize, pid: Pid) {
        debug_assert!(self.tasks[slot].status.can_transition_to(TaskStatus::Unused));
        debug_assert!(self.children_of(pid).next().is_none());
        self.tasks[slot] = TaskControlBlock::unused();
        self.pid_allocator.dealloc(pid);
    }
}

impl ProcessTable {
    /// Builds a table with `config.capacity` slots. The adopter occupies the
    /// first slot and starts out RUNNING.
    ///
    /// `wait_queue` must provide at least `config.capacity` channels.
    pub fn new(config: TableConfig, wait_queue: Arc<dyn WaitQueue>) -> Result<Self> {
        if config.capacity == 0 {
            return Err(TaskError::InvalidConfig("capacity must leave room for the adopter"));
        }
        let adopter = Pid(config.init_pid);
        let mut tasks: Vec<TaskControlBlock> =
            (0..config.capacity).map(|_| TaskControlBlock::unused()).collect();
        tasks[0] = TaskControlBlock {
            pid: Some(adopter),
            status: TaskStatus::Running,
            memory_set: Some(MemorySet::new_bare()),
            ..TaskControlBlock::unused()
        };
        info!(
            "[kernel] process table: {} slots, init pid {}, boot sp {:#x}",
            config.capacity,
            adopter,
            read_sp()
        );
        Ok(Self {
            inner: Mutex::new(TableInner {
                tasks,
                pid_allocator: PidAllocator::new(config.init_pid),
            }),
            wait_queue,
            adopter,
        })
    }

    fn acquire_inner_lock(&self) -> MutexGuard<TableInner> {
        self.inner.lock()
    }

    pub fn adopter(&self) -> Pid {
        self.adopter
    }

    pub fn capacity(&self) -> usize {
        self.acquire_inner_lock().tasks.len()
    }

    /// Takes an UNUSED slot and moves it to USED under `parent`.
    ///
    /// The new process has no address space until [`activate`](Self::activate).
    pub fn allocate(&self, parent: Pid) -> Result<Pid> {
        self.acquire_inner_lock().allocate(parent).map(|(_, pid)| pid)
    }

    /// Binds an address space to a USED process and makes it RUNNABLE.
    pub fn activate(&self, pid: Pid, memory_set: MemorySet) -> Result<()> {
        let mut inner = self.acquire_inner_lock();
        let slot = inner.slot_of(pid)?;
        inner.activate(slot, pid, memory_set)
    }

    // 地址空间在加锁之前构造并检查, 被拒绝的请求不会占用槽位或进程标识符
    fn install(&self, parent: Pid, memory_set: MemorySet) -> Result<Pid> {
        let mut inner = self.acquire_inner_lock();
        let (slot, pid) = inner.allocate(parent)?;
        let pages = memory_set.page_count();
        inner.activate(slot, pid, memory_set)?;
        debug!("created pid {} under pid {} with {} pages", pid, parent, pages);
        Ok(pid)
    }

    /// Creates a RUNNABLE child of `parent` whose address space holds `regions`.
    pub fn create(&self, parent: Pid, regions: &[MapRequest]) -> Result<Pid> {
        let memory_set = MemorySet::from_requests(regions).map_err(|err| {
            warn!("pid {}: rejected creation request: {}", parent, err);
            err
        })?;
        self.install(parent, memory_set)
    }

    /// Creates a RUNNABLE child of `parent` from an ELF image.
    pub fn spawn(&self, parent: Pid, elf_data: &[u8]) -> Result<Pid> {
        let (memory_set, _user_sp, _entry_point) = MemorySet::from_elf(elf_data)?;
        self.install(parent, memory_set)
    }

    /// Creates a RUNNABLE child of the running `parent` with a copy of its
    /// address space.
    pub fn fork(&self, parent: Pid) -> Result<Pid> {
        let mut inner = self.acquire_inner_lock();
        let parent_slot = inner.running_slot(parent)?;
        let memory_set = match inner.tasks[parent_slot].memory_set.as_ref() {
            Some(memory_set) => MemorySet::from_existed_user(memory_set),
            None => return Err(inner.invalid_state(parent_slot, parent)),
        };
        let (slot, pid) = inner.allocate(parent)?;
        inner.activate(slot, pid, memory_set)?;
        debug!("pid {} forked pid {}", parent, pid);
        Ok(pid)
    }

    /// Replaces the address space of a running process. Returns the new
    /// `(user_sp, entry_point)`.
    pub fn exec(&self, pid: Pid, elf_data: &[u8]) -> Result<(usize, usize)> {
        let (memory_set, user_sp, entry_point) = MemorySet::from_elf(elf_data)?;
        let mut inner = self.acquire_inner_lock();
        let slot = inner.running_slot(pid)?;
        inner.tasks[slot].memory_set = Some(memory_set);
        debug!("pid {} exec: entry {:#x}, sp {:#x}", pid, entry_point, user_sp);
        Ok((user_sp, entry_point))
    }

    /// Scheduler-driven state change among RUNNABLE, RUNNING and SLEEPING.
    pub fn transition(&self, pid: Pid, next: TaskStatus) -> Result<()> {
        let mut inner = self.acquire_inner_lock();
        let slot = inner.slot_of(pid)?;
        match next {
            TaskStatus::Zombie | TaskStatus::Unused | TaskStatus::Used => {
                Err(inner.invalid_state(slot, pid))
            }
            _ => inner.set_status(slot, pid, next),
        }
    }

    /// Direct children of `parent`, in slot order. The sequence is a
    /// snapshot; call again to observe later changes.
    pub fn find_children(&self, parent: Pid) -> impl Iterator<Item = Pid> {
        let inner = self.acquire_inner_lock();
        let children: Vec<Pid> = inner
            .children_of(parent)
            .filter_map(|(_, task)| task.pid)
            .collect();
        children.into_iter()
    }

    // 在持锁状态下唤醒阻塞在该槽位通道上的调用者
    fn wake_waiters(&self, inner: &mut TableInner, slot: usize) {
        let task = &mut inner.tasks[slot];
        if task.waiters == 0 {
            return;
        }
        if task.status == TaskStatus::Sleeping {
            task.status = TaskStatus::Runnable;
        }
        self.wait_queue.wake(slot);
    }

    /// Terminates a running process, or one whose callers are blocked in
    /// [`wait`](Self::wait) on its behalf. Those callers return
    /// [`TaskError::Killed`].
    ///
    /// Records the exit code, marks it ZOMBIE, hands its children to the
    /// adopter, releases its address space and wakes its parent, all under
    /// the table lock.
    ///
    /// # Panics
    ///
    /// If `pid` is the adopter.
    pub fn exit(&self, pid: Pid, exit_code: i32) -> Result<()> {
        let mut inner = self.acquire_inner_lock();
        let slot = inner.slot_of(pid)?;
        if pid == self.adopter {
            panic!("[kernel] init process (pid {}) exited with code {}", pid, exit_code);
        }
        let task = &inner.tasks[slot];
        if task.waiters > 0 && task.status.is_alive() {
            // 阻塞在 wait 中: 状态可能是 SLEEPING 或刚被唤醒的 RUNNABLE
            trace!("pid {}: {:?} -> Zombie while blocked in wait", pid, task.status);
            inner.tasks[slot].status = TaskStatus::Zombie;
        } else {
            inner.set_status(slot, pid, TaskStatus::Zombie)?;
        }
        let task = &mut inner.tasks[slot];
        task.exit_code = Some(exit_code);
        let memory_set = task.memory_set.take();
        let parent = task.parent;

        let (adopted, adopted_zombie) = inner.reparent_children(pid, self.adopter);
        if adopted_zombie {
            let adopter_slot = inner.slot_of(self.adopter)?;
            self.wake_waiters(&mut inner, adopter_slot);
        }
        if let Some(parent_slot) = parent.and_then(|parent| inner.slot_of(parent).ok()) {
            self.wake_waiters(&mut inner, parent_slot);
        }
        // 其他代表本进程阻塞在 wait 中的调用者也需要醒来
        self.wake_waiters(&mut inner, slot);

        // 地址空间在这里释放, 且只释放一次
        let pages = memory_set.map_or(0, |memory_set| memory_set.page_count());
        drop(inner);
        info!(
            "[kernel] pid {} exited with code {} ({} pages released, {} children adopted by pid {})",
            pid, exit_code, pages, adopted, self.adopter
        );
        Ok(())
    }

    /// Requests teardown of a live process. A caller blocked in `wait` on its
    /// behalf returns [`TaskError::Killed`]; the process is then expected to
    /// `exit`.
    pub fn kill(&self, pid: Pid) -> Result<()> {
        let mut inner = self.acquire_inner_lock();
        let slot = inner.alive_slot(pid)?;
        if pid == self.adopter {
            return Err(inner.invalid_state(slot, pid));
        }
        inner.tasks[slot].killed = true;
        self.wake_waiters(&mut inner, slot);
        warn!("[kernel] pid {} killed", pid);
        Ok(())
    }

    /// Blocks until a matching child of `parent` is a zombie, reaps it and
    /// returns its pid and exit code.
    ///
    /// Fails with [`TaskError::NoChildren`] without blocking when no child
    /// matches `target`. Each call reaps exactly one child.
    pub fn wait(&self, parent: Pid, target: WaitTarget) -> Result<(Pid, i32)> {
        let mut inner = self.acquire_inner_lock();
        let slot = inner.alive_slot(parent)?;
        loop {
            if inner.tasks[slot].killed {
                return Err(TaskError::Killed);
            }
            match inner.find_zombie_child(parent, target) {
                ZombieLookup::Found { slot: child, pid, exit_code } => {
                    inner.reap_slot(child, pid);
                    drop(inner);
                    info!("[kernel] pid {} reaped pid {}, exit_code={}", parent, pid, exit_code);
                    return Ok((pid, exit_code));
                }
                ZombieLookup::NoChildren => return Err(TaskError::NoChildren),
                ZombieLookup::Pending => {}
            }

            // 先登记再取票, 唤醒方同样在持锁时检查 waiters, 因此不会丢失唤醒
            let task = &mut inner.tasks[slot];
            task.waiters += 1;
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Sleeping;
            }
            let ticket = self.wait_queue.prepare(slot);
            drop(inner);
            trace!("pid {} blocked in wait", parent);
            self.wait_queue.sleep(slot, ticket);
            inner = self.acquire_inner_lock();

            let task = &mut inner.tasks[slot];
            task.waiters -= 1;
            if task.status == TaskStatus::Zombie {
                // 阻塞期间本进程已经退出; 最后一个离开的调用者负责通知父进程
                let last_parent = if task.waiters == 0 { task.parent } else { None };
                if let Some(parent_slot) = last_parent.and_then(|p| inner.slot_of(p).ok()) {
                    self.wake_waiters(&mut inner, parent_slot);
                }
                return Err(TaskError::Killed);
            }
            // 被唤醒或伪唤醒后重新成为当前执行的进程, 然后重新检查
            if task.status == TaskStatus::Sleeping || task.status == TaskStatus::Runnable {
                task.status = TaskStatus::Running;
            }
        }
    }

    /// Non-blocking `wait`: `Ok(None)` while matching children exist but
    /// none has exited yet.
    pub fn try_wait(&self, parent: Pid, target: WaitTarget) -> Result<Option<(Pid, i32)>> {
        let mut inner = self.acquire_inner_lock();
        let slot = inner.alive_slot(parent)?;
        if inner.tasks[slot].killed {
            return Err(TaskError::Killed);
        }
        match inner.find_zombie_child(parent, target) {
            ZombieLookup::Found { slot: child, pid, exit_code } => {
                inner.reap_slot(child, pid);
                drop(inner);
                info!("[kernel] pid {} reaped pid {}, exit_code={}", parent, pid, exit_code);
                Ok(Some((pid, exit_code)))
            }
            ZombieLookup::Pending => Ok(None),
            ZombieLookup::NoChildren => Err(TaskError::NoChildren),
        }
    }

    /// Reaps a specific zombie child of `parent` and returns its exit code.
    pub fn reap(&self, parent: Pid, child: Pid) -> Result<i32> {
        let mut inner = self.acquire_inner_lock();
        inner.alive_slot(parent)?;
        let slot = inner.slot_of(child)?;
        let task = &inner.tasks[slot];
        if task.parent != Some(parent) {
            return Err(TaskError::NoChildren);
        }
        let exit_code = match (task.status, task.exit_code, task.waiters) {
            (TaskStatus::Zombie, Some(exit_code), 0) => exit_code,
            _ => return Err(inner.invalid_state(slot, child)),
        };
        inner.reap_slot(slot, child);
        drop(inner);
        info!("[kernel] pid {} reaped pid {}, exit_code={}", parent, child, exit_code);
        Ok(exit_code)
    }

    pub fn status(&self, pid: Pid) -> Option<TaskStatus> {
        let inner = self.acquire_inner_lock();
        inner.slot_of(pid).ok().map(|slot| inner.tasks[slot].status)
    }

    pub fn parent_of(&self, pid: Pid) -> Option<Pid> {
        let inner = self.acquire_inner_lock();
        inner.slot_of(pid).ok().and_then(|slot| inner.tasks[slot].parent)
    }

    pub fn exit_code(&self, pid: Pid) -> Option<i32> {
        let inner = self.acquire_inner_lock();
        inner.slot_of(pid).ok().and_then(|slot| inner.tasks[slot].exit_code)
    }

    pub fn info(&self, pid: Pid) -> Option<TaskInfo> {
        let inner = self.acquire_inner_lock();
        inner.slot_of(pid).ok().and_then(|slot| inner.tasks[slot].info())
    }

    /// Every non-UNUSED process, in slot order.
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.acquire_inner_lock()
            .tasks
            .iter()
            .filter_map(TaskControlBlock::info)
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.acquire_inner_lock()
            .tasks
            .iter()
            .filter(|task| task.status != TaskStatus::Unused)
            .count()
    }

    /// Runs `f` on the address space of `pid`, if it still holds one.
    pub fn with_memory_set<V>(&self, pid: Pid, f: impl FnOnce(&MemorySet) -> V) -> Option<V> {
        let inner = self.acquire_inner_lock();
        let slot = inner.slot_of(pid).ok()?;
        inner.tasks[slot].memory_set.as_ref().map(f)
    }

    /// Checks the table-wide invariants and reports the first violation.
    pub fn verify(&self) -> core::result::Result<(), InvariantViolation> {
        let inner = self.acquire_inner_lock();
        let violation = |slot, reason| Err(InvariantViolation { slot, reason });
        let capacity = inner.tasks.len();
        for (slot, task) in inner.tasks.iter().enumerate() {
            if task.status == TaskStatus::Unused {
                if task.pid.is_some() {
                    return violation(slot, "unused slot keeps an identity");
                }
                continue;
            }
            let pid = match task.pid {
                Some(pid) => pid,
                None => return violation(slot, "live slot without identity"),
            };
            if inner.tasks[slot + 1..].iter().any(|other| {
                other.status != TaskStatus::Unused && other.pid == Some(pid)
            }) {
                return violation(slot, "identity shared by two live slots");
            }
            if task.is_zombie() != task.exit_code.is_some() {
                return violation(slot, "exit code set iff zombie");
            }
            if task.status.is_alive() && task.memory_set.is_none() {
                return violation(slot, "live process without address space");
            }
            if task.is_zombie() && task.memory_set.is_some() {
                return violation(slot, "zombie still holds its address space");
            }
            if pid == self.adopter {
                if task.parent.is_some() {
                    return violation(slot, "adopter has a parent");
                }
                continue;
            }
            // 沿 parent 链向上, 必须在 capacity 步以内到达 adopter
            let mut current = task.parent;
            let mut steps = 0;
            loop {
                let ancestor = match current {
                    Some(ancestor) => ancestor,
                    None => return violation(slot, "missing parent link"),
                };
                if ancestor == self.adopter {
                    break;
                }
                let ancestor_slot = match inner.slot_of(ancestor) {
                    Ok(ancestor_slot) => ancestor_slot,
                    Err(_) => return violation(slot, "dangling parent link"),
                };
                if inner.tasks[ancestor_slot].is_zombie() {
                    return violation(slot, "parent is a zombie");
                }
                steps += 1;
                if steps > capacity {
                    return violation(slot, "cycle in parent links");
                }
                current = inner.tasks[ancestor_slot].parent;
            }
        }
        Ok(())
    }
}
