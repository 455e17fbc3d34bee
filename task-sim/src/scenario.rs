//! Scenarios driven through the runtime, each checking one lifecycle
//! property end to end.

use crate::error::{SimError, SimResult};
use crate::runtime::{default_image, Kernel, Process};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use task_core::{Pid, TaskError, TaskStatus, WaitTarget};

#[derive(Debug)]
pub struct ZombieReport {
    pub parent: Pid,
    pub child: Pid,
    pub reaped: Vec<(Pid, i32)>,
}

/// A parent forks, lets the child exit first and exits without waiting.
/// The zombie child must be reparented to init and reaped there.
pub fn zombie(kernel: &Kernel) -> SimResult<ZombieReport> {
    let (tx, rx) = mpsc::channel();
    let parent = kernel.spawn(kernel.init(), move |process| {
        let child = match process.fork(|_| 0) {
            Ok(child) => child,
            Err(_) => return -1,
        };
        let _ = tx.send(child);
        // Let child exit before parent.
        while process.table().status(child) != Some(TaskStatus::Zombie) {
            if process.sleep(Duration::from_millis(5)).is_err() {
                return -1;
            }
        }
        0
    })?;
    let reaped = kernel.run_init()?;
    let child = rx
        .recv()
        .map_err(|_| SimError::Scenario("parent never forked"))?;
    Ok(ZombieReport { parent, child, reaped })
}

#[derive(Debug)]
pub struct OrphanReport {
    pub parent: Pid,
    pub orphan: Pid,
    /// Parent link the orphan observed while still running.
    pub adopted_by: Option<Pid>,
    pub reaped: Vec<(Pid, i32)>,
}

pub const ORPHAN_EXIT_CODE: i32 = 42;

/// A parent exits while its child is still running; the child keeps running
/// under init and is reaped by init once it exits.
pub fn orphan(kernel: &Kernel) -> SimResult<OrphanReport> {
    let (tx, rx) = mpsc::channel();
    let init = kernel.init();
    let parent = kernel.spawn(init, move |process| {
        let forked = process.fork(move |orphan| {
            while orphan.parent() != Some(init) {
                if orphan.yield_().is_err() {
                    return -1;
                }
            }
            let _ = tx.send((orphan.pid(), orphan.parent()));
            ORPHAN_EXIT_CODE
        });
        if forked.is_ok() { 0 } else { -1 }
    })?;
    let reaped = kernel.run_init()?;
    let (orphan, adopted_by) = rx
        .recv()
        .map_err(|_| SimError::Scenario("orphan never observed its adoption"))?;
    Ok(OrphanReport { parent, orphan, adopted_by, reaped })
}

#[derive(Debug)]
pub struct ExhaustReport {
    /// Processes created before the table ran out of slots.
    pub filled: usize,
    /// Identity handed out once a slot was reaped.
    pub recovered: Pid,
}

/// Fills the table, checks that a zombie keeps its slot until reaped, then
/// that a reap makes room again.
pub fn exhaust(kernel: &Kernel) -> SimResult<ExhaustReport> {
    let table = kernel.table();
    let init = kernel.init();
    let mut pids = Vec::new();
    loop {
        match table.create(init, &default_image()) {
            Ok(pid) => {
                table.transition(pid, TaskStatus::Running)?;
                pids.push(pid);
            }
            Err(TaskError::ResourceExhausted) => break,
            Err(err) => return Err(err.into()),
        }
    }
    let filled = pids.len();
    let victim = pids
        .pop()
        .ok_or(SimError::Scenario("table has no room beyond init"))?;
    table.exit(victim, 0)?;
    if table.allocate(init) != Err(TaskError::ResourceExhausted) {
        return Err(SimError::Scenario("zombie slot reused before reaping"));
    }
    table.wait(init, WaitTarget::Pid(victim))?;
    let recovered = table.create(init, &default_image())?;
    table.transition(recovered, TaskStatus::Running)?;
    info!("table full at {} processes, pid {} created after one reap", filled, recovered);

    pids.push(recovered);
    for pid in pids {
        table.exit(pid, 0)?;
    }
    kernel.run_init()?;
    Ok(ExhaustReport { filled, recovered })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StressReport {
    pub created: usize,
    pub exited: usize,
    pub killed: usize,
    pub reaped: usize,
    pub exhausted: usize,
    pub max_live: usize,
}

/// Random single-threaded sequence of create/fork/exit/wait/kill, checking
/// the table invariants after every step and that nothing is lost at the end.
pub fn stress(kernel: &Kernel, rounds: usize, seed: u64) -> SimResult<StressReport> {
    let table = kernel.table();
    let init = kernel.init();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut report = StressReport::default();

    for round in 0..rounds {
        let running: Vec<Pid> = table
            .snapshot()
            .into_iter()
            .filter(|info| info.status == TaskStatus::Running)
            .map(|info| info.pid)
            .collect();
        let actor = *running
            .choose(&mut rng)
            .ok_or(SimError::Scenario("init is not running"))?;
        let killed = table.info(actor).map_or(false, |info| info.killed);
        let op = rng.gen_range(0..10);
        debug!("round {}: pid {} op {}", round, actor, op);

        if killed {
            // 被 kill 的进程下一步只能退出
            table.exit(actor, -1)?;
            report.exited += 1;
        } else if op < 4 {
            let created = if rng.gen_bool(0.5) {
                table.fork(actor)
            } else {
                table.create(actor, &default_image())
            };
            match created {
                Ok(pid) => {
                    table.transition(pid, TaskStatus::Running)?;
                    report.created += 1;
                }
                Err(TaskError::ResourceExhausted) => report.exhausted += 1,
                Err(err) => return Err(err.into()),
            }
        } else if op < 6 {
            if actor != init {
                table.exit(actor, rng.gen_range(-128..128))?;
                report.exited += 1;
            }
        } else if op < 9 {
            match table.try_wait(actor, WaitTarget::Any) {
                Ok(Some(_)) => report.reaped += 1,
                Ok(None) | Err(TaskError::NoChildren) => {}
                Err(err) => return Err(err.into()),
            }
        } else if actor != init {
            table.kill(actor)?;
            report.killed += 1;
        }

        table.verify()?;
        report.max_live = report.max_live.max(table.live_count());
    }

    // 收尾: 所有进程退出, 然后由 init 回收全部僵尸
    for info in table.snapshot() {
        if info.pid != init && info.status == TaskStatus::Running {
            table.exit(info.pid, 0)?;
            report.exited += 1;
        }
    }
    loop {
        match table.try_wait(init, WaitTarget::Any) {
            Ok(Some(_)) => report.reaped += 1,
            Ok(None) => {
                return Err(SimError::Lost {
                    live: table.live_count() - 1,
                })
            }
            Err(TaskError::NoChildren) => break,
            Err(err) => return Err(err.into()),
        }
    }
    table.verify()?;
    if table.live_count() != 1 || report.reaped != report.created {
        return Err(SimError::Lost {
            live: report.created.saturating_sub(report.reaped),
        });
    }
    info!("stress finished: {:?}", report);
    Ok(report)
}

#[derive(Default)]
struct TreeStats {
    spawned: AtomicUsize,
    exhausted: AtomicUsize,
    reaped_by_parents: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrentReport {
    pub spawned: usize,
    pub exhausted: usize,
    pub reaped_by_parents: usize,
    pub reaped_by_init: usize,
}

const MAX_TREE_DEPTH: usize = 3;

fn run_tree(process: &Process, depth: usize, seed: u64, stats: &Arc<TreeStats>) -> i32 {
    let mut rng = StdRng::seed_from_u64(seed);
    if depth < MAX_TREE_DEPTH {
        for _ in 0..rng.gen_range(0..=2) {
            let child_seed: u64 = rng.gen();
            let child_stats = stats.clone();
            match process.fork(move |child| run_tree(child, depth + 1, child_seed, &child_stats)) {
                Ok(_) => {
                    stats.spawned.fetch_add(1, Ordering::Relaxed);
                }
                Err(SimError::Task(TaskError::ResourceExhausted)) => {
                    stats.exhausted.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => return -1,
            }
        }
    }
    // 一半的进程回收自己的子进程, 另一半直接退出, 子进程成为孤儿
    if rng.gen_bool(0.5) {
        loop {
            match process.wait() {
                Ok(_) => {
                    stats.reaped_by_parents.fetch_add(1, Ordering::Relaxed);
                }
                Err(TaskError::NoChildren) => break,
                Err(_) => return -1,
            }
        }
    }
    depth as i32
}

/// Random process trees on real threads. Roughly half of the processes exit
/// without waiting, so their subtrees are orphaned mid-flight.
pub fn concurrent(kernel: &Kernel, workers: usize, seed: u64) -> SimResult<ConcurrentReport> {
    let stats = Arc::new(TreeStats::default());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut started = 0;
    for _ in 0..workers {
        let worker_seed: u64 = rng.gen();
        let worker_stats = stats.clone();
        match kernel.spawn(kernel.init(), move |process| {
            run_tree(process, 0, worker_seed, &worker_stats)
        }) {
            Ok(_) => started += 1,
            Err(SimError::Task(TaskError::ResourceExhausted)) => {
                stats.exhausted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => return Err(err),
        }
    }
    let reaped_by_init = kernel.run_init()?.len();
    let report = ConcurrentReport {
        spawned: started + stats.spawned.load(Ordering::Relaxed),
        exhausted: stats.exhausted.load(Ordering::Relaxed),
        reaped_by_parents: stats.reaped_by_parents.load(Ordering::Relaxed),
        reaped_by_init,
    };
    let reaped = report.reaped_by_parents + report.reaped_by_init;
    if report.spawned != reaped {
        return Err(SimError::Lost {
            live: report.spawned.saturating_sub(reaped),
        });
    }
    info!("concurrent finished: {:?}", report);
    Ok(report)
}
