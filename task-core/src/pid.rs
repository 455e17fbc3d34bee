use alloc::vec::Vec;
use core::fmt;

// 进程标识符, 互不相同的整数
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 简单栈式分配策略的进程标识符分配器
// 与内核里依靠 Drop 自动回收的 PidHandle 不同, 这里只在回收僵尸进程时显式 dealloc,
// 这样子进程的 parent 字段仍指向它时, 该标识符不可能被重新分配
pub(crate) struct PidAllocator {
    current: usize,
    recycled: Vec<usize>,
    // adopter 的标识符由配置给出, 永远不会被分配出去
    reserved: usize,
}

impl PidAllocator {
    pub fn new(reserved: usize) -> Self {
        PidAllocator {
            current: 0,
            recycled: Vec::new(),
            reserved,
        }
    }
    pub fn alloc(&mut self) -> Pid {
        if let Some(pid) = self.recycled.pop() {
            Pid(pid)
        } else {
            if self.current == self.reserved {
                self.current += 1;
            }
            self.current += 1;
            Pid(self.current - 1)
        }
    }
    pub fn dealloc(&mut self, pid: Pid) {
        assert!(pid.0 < self.current, "pid {} was never allocated", pid);
        assert_ne!(pid.0, self.reserved, "the adopter pid cannot be recycled");
        assert!(
            !self.recycled.iter().any(|ppid| *ppid == pid.0),
            "pid {} has been deallocated!", pid
        );
        self.recycled.push(pid.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_reserved_and_recycles_lifo() {
        let mut allocator = PidAllocator::new(1);
        assert_eq!(allocator.alloc(), Pid(0));
        assert_eq!(allocator.alloc(), Pid(2));
        assert_eq!(allocator.alloc(), Pid(3));
        allocator.dealloc(Pid(2));
        allocator.dealloc(Pid(0));
        assert_eq!(allocator.alloc(), Pid(0));
        assert_eq!(allocator.alloc(), Pid(2));
        assert_eq!(allocator.alloc(), Pid(4));
    }

    #[test]
    #[should_panic(expected = "has been deallocated")]
    fn double_dealloc_panics() {
        let mut allocator = PidAllocator::new(0);
        let pid = allocator.alloc();
        allocator.dealloc(pid);
        allocator.dealloc(pid);
    }
}
