use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

// 等待通道: 由库的使用者提供并接入, 内核里对应挂起当前任务并切换,
// 宿主机上对应条件变量
//
// 通道号即进程表中的槽位下标, 在进程的整个生命周期内不变

/// Blocking primitive behind `wait`.
///
/// Implementations follow an eventcount discipline: `prepare` is called
/// with the table lock held and returns a ticket, the lock is released, and
/// `sleep` returns once `wake` has been called on the channel after the
/// ticket was taken (or earlier, spuriously). A `wake` that races ahead of
/// `sleep` is therefore never lost.
pub trait WaitQueue: Send + Sync {
    fn prepare(&self, chan: usize) -> u64;
    fn sleep(&self, chan: usize, ticket: u64);
    fn wake(&self, chan: usize);
}

/// Busy-waiting channels for environments without a scheduler.
pub struct SpinWaitQueue {
    generations: Vec<AtomicU64>,
}

impl SpinWaitQueue {
    pub fn new(channels: usize) -> Self {
        Self {
            generations: (0..channels).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

impl WaitQueue for SpinWaitQueue {
    fn prepare(&self, chan: usize) -> u64 {
        self.generations[chan].load(Ordering::Acquire)
    }
    fn sleep(&self, chan: usize, ticket: u64) {
        while self.generations[chan].load(Ordering::Acquire) == ticket {
            core::hint::spin_loop();
        }
    }
    fn wake(&self, chan: usize) {
        self.generations[chan].fetch_add(1, Ordering::AcqRel);
    }
}
