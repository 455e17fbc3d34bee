use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;
use std::time::Duration;
use task_core::{TableConfig, TaskError, TaskStatus};
use task_sim::scenario::{self, ORPHAN_EXIT_CODE};
use task_sim::{Kernel, SimError, PANIC_EXIT_CODE};

fn boot(capacity: usize) -> Kernel {
    task_sim::logging::init(Some("warn"));
    Kernel::boot(TableConfig::with_capacity(capacity)).unwrap()
}

#[test]
fn empty_table_is_rejected() {
    match Kernel::boot(TableConfig::with_capacity(0)) {
        Err(SimError::Task(TaskError::InvalidConfig(_))) => {}
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn zombie_child_is_reaped_by_init() {
    let kernel = boot(8);
    let report = scenario::zombie(&kernel).unwrap();
    assert_ne!(report.parent, report.child);
    let mut reaped = report.reaped.clone();
    reaped.sort();
    let mut expected = vec![(report.parent, 0), (report.child, 0)];
    expected.sort();
    assert_eq!(reaped, expected);
    assert_eq!(kernel.table().live_count(), 1);
}

#[test]
fn orphan_keeps_running_under_init() {
    let kernel = boot(8);
    let report = scenario::orphan(&kernel).unwrap();
    assert_eq!(report.adopted_by, Some(kernel.init()));
    assert!(report.reaped.contains(&(report.orphan, ORPHAN_EXIT_CODE)));
    assert!(report.reaped.contains(&(report.parent, 0)));
    assert_eq!(report.reaped.len(), 2);
}

#[test]
fn exhaustion_recovers_after_one_reap() {
    let kernel = boot(8);
    let report = scenario::exhaust(&kernel).unwrap();
    assert_eq!(report.filled, 7);
    assert_ne!(report.recovered, kernel.init());
    kernel.table().verify().unwrap();
}

#[test]
fn stress_loses_nothing() {
    for seed in 0..8 {
        let kernel = boot(16);
        let report = scenario::stress(&kernel, 500, seed).unwrap();
        assert_eq!(report.created, report.reaped);
        assert!(report.max_live <= 16);
    }
}

#[test]
fn stress_with_random_seeds() {
    let mut rng = StdRng::seed_from_u64(2021);
    for _ in 0..4 {
        let capacity = rng.gen_range(2..12);
        let kernel = boot(capacity);
        scenario::stress(&kernel, 300, rng.gen()).unwrap();
    }
}

#[test]
fn concurrent_trees_are_fully_reaped() {
    for seed in 0..4 {
        let kernel = boot(64);
        let report = scenario::concurrent(&kernel, 6, seed).unwrap();
        assert_eq!(report.spawned, report.reaped_by_init + report.reaped_by_parents);
        assert_eq!(kernel.table().live_count(), 1);
    }
}

#[test]
fn concurrent_trees_in_a_small_table() {
    let kernel = boot(4);
    let report = scenario::concurrent(&kernel, 8, 7).unwrap();
    assert!(report.exhausted > 0);
    assert_eq!(report.spawned, report.reaped_by_init + report.reaped_by_parents);
}

#[test]
fn waitpid_returns_child_exit_code() {
    let kernel = boot(8);
    let parent = kernel
        .spawn(kernel.init(), |process| {
            let child = match process.fork(|_| 7) {
                Ok(child) => child,
                Err(_) => return -1,
            };
            process.waitpid(child).unwrap_or(-1)
        })
        .unwrap();
    assert_eq!(kernel.run_init().unwrap(), vec![(parent, 7)]);
}

#[test]
fn panicking_body_still_exits() {
    let kernel = boot(4);
    let pid = kernel
        .spawn(kernel.init(), |_| panic!("user program fault"))
        .unwrap();
    assert_eq!(kernel.run_init().unwrap(), vec![(pid, PANIC_EXIT_CODE)]);
}

#[test]
fn kill_interrupts_a_blocked_parent() {
    let kernel = boot(8);
    let init = kernel.init();
    let parent = kernel
        .spawn(init, move |process| {
            let forked = process.fork(move |child| {
                while child.parent() != Some(init) {
                    if child.yield_().is_err() {
                        return -1;
                    }
                }
                3
            });
            if forked.is_err() {
                return -1;
            }
            match process.wait() {
                Err(TaskError::Killed) => 9,
                _ => 0,
            }
        })
        .unwrap();
    while kernel.table().status(parent) != Some(TaskStatus::Sleeping) {
        thread::sleep(Duration::from_millis(1));
    }
    kernel.table().kill(parent).unwrap();
    let reaped = kernel.run_init().unwrap();
    assert_eq!(reaped.len(), 2);
    assert!(reaped.contains(&(parent, 9)));
    assert!(reaped.iter().any(|&(pid, code)| pid != parent && code == 3));
}

#[test]
fn errors_keep_their_source() {
    use std::error::Error;
    let err: SimError = TaskError::NoChildren.into();
    assert_eq!(err.to_string(), "no children to wait for");
    assert!(err.source().is_some());
    let lost = SimError::Lost { live: 3 };
    assert_eq!(lost.to_string(), "3 processes were never reaped");
    assert!(lost.source().is_none());
}
