use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use task_core::WaitQueue;

/// Wait channels backed by one condition variable.
///
/// Each channel is a generation counter; `wake` bumps it and notifies every
/// sleeper, sleepers re-check their own channel.
pub struct CondvarWaitQueue {
    generations: Mutex<Vec<u64>>,
    changed: Condvar,
}

impl CondvarWaitQueue {
    pub fn new(channels: usize) -> Self {
        Self {
            generations: Mutex::new(vec![0; channels]),
            changed: Condvar::new(),
        }
    }

    // 某个线程在持锁时 panic 不影响计数器本身的一致性
    fn lock(&self) -> MutexGuard<'_, Vec<u64>> {
        self.generations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WaitQueue for CondvarWaitQueue {
    fn prepare(&self, chan: usize) -> u64 {
        self.lock()[chan]
    }

    fn sleep(&self, chan: usize, ticket: u64) {
        let mut generations = self.lock();
        while generations[chan] == ticket {
            generations = self
                .changed
                .wait(generations)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wake(&self, chan: usize) {
        self.lock()[chan] += 1;
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sleeper_sees_wake_from_other_thread() {
        let queue = Arc::new(CondvarWaitQueue::new(3));
        let ticket = queue.prepare(2);
        let sleeper = {
            let queue = queue.clone();
            thread::spawn(move || queue.sleep(2, ticket))
        };
        queue.wake(0);
        queue.wake(2);
        sleeper.join().unwrap();
        assert_eq!(queue.prepare(0), 1);
        assert_eq!(queue.prepare(1), 0);
    }
}
