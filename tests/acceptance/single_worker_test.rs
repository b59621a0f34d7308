//! Single-worker acceptance tests.
//!
//! One worker at a fixed period, launched through the real pthread path with
//! `SCHED_OTHER` unless the test is marked as requiring root.
//!
//! # Acceptance Criteria
//!
//! - Exactly `runs` executions, iterations numbered from 0
//! - The k-th execution never starts before `init + k * P`
//! - Task time does not accumulate: start-to-start converges to P, not P + δ
//! - A failed memory lock launches nothing and exits non-zero

use super::common::{
    fifo_launcher, has_preempt_rt, is_root, ms, permissive_env, time_sharing_launcher,
    FailingLockPlatform, Recording,
};
use rtcycle_common::config::RealtimeConfig;
use rtcycle_common::error::RtError;
use rtcycle_runtime::{run_single, RealtimeEnvironment, SingleWorkerRun};
use std::time::{Duration, Instant};

/// 30 ms x 100 runs: the last cycle starts 99 periods after the first.
#[test]
fn test_single_worker_30ms_100_runs() {
    let recording = Recording::default();
    let run = SingleWorkerRun::new(recording.task(Duration::ZERO), Duration::from_millis(30), 100);

    let wall = Instant::now();
    let summary = run_single(&mut permissive_env(), &mut time_sharing_launcher(), run).unwrap();
    let wall = wall.elapsed();

    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.total_executions(), 100);

    let cycles = recording.cycles_of(0);
    let iterations: Vec<u64> = cycles.iter().map(|c| c.iteration).collect();
    assert_eq!(iterations, (0..100).collect::<Vec<_>>());

    let span = cycles[99].started.nanos_since(cycles[0].scheduled);
    assert!(span >= ms(2970), "span {span}ns shorter than 99 periods");
    assert!(wall < Duration::from_millis(3300), "run took {wall:?}");

    println!("30ms x 100: wall {wall:?}, latency {:?}", summary.reports[0].latency);
}

#[test]
fn test_kth_start_never_early() {
    let period = 10;
    let recording = Recording::default();
    let run = SingleWorkerRun::new(recording.task(Duration::ZERO), Duration::from_millis(period), 25);

    run_single(&mut permissive_env(), &mut time_sharing_launcher(), run).unwrap();

    let cycles = recording.cycles_of(0);
    let init = cycles[0].scheduled;
    for cycle in &cycles {
        let earliest = init.advanced(cycle.iteration * ms(period));
        assert_eq!(cycle.scheduled, earliest);
        assert!(
            cycle.started >= earliest,
            "iteration {} started {}ns early",
            cycle.iteration,
            earliest.nanos_since(cycle.started)
        );
    }
}

/// P = 10 ms with about 2 ms of work per cycle.
#[test]
fn test_task_time_does_not_drift() {
    let period = 10;
    let runs = 50u64;
    let recording = Recording::default();
    let run = SingleWorkerRun::new(
        recording.task(Duration::from_millis(2)),
        Duration::from_millis(period),
        runs,
    );

    run_single(&mut permissive_env(), &mut time_sharing_launcher(), run).unwrap();

    let cycles = recording.cycles_of(0);
    let intervals = runs - 1;
    let span = cycles[cycles.len() - 1].started.nanos_since(cycles[0].started);
    let mean_interval = span / intervals;

    // A relative sleeper would average P + δ = 12 ms.
    assert!(
        mean_interval < ms(period) + ms(1),
        "mean start-to-start {mean_interval}ns drifts toward P + δ"
    );
    assert!(mean_interval + ms(1) > ms(period));
}

#[test]
fn test_start_announced_once() {
    let recording = Recording::default();
    let run = SingleWorkerRun::new(recording.task(Duration::ZERO), Duration::from_millis(2), 5);

    run_single(&mut permissive_env(), &mut time_sharing_launcher(), run).unwrap();

    assert_eq!(recording.announcements(), vec![0]);
}

#[test]
fn test_elapsed_starts_at_first_execution() {
    let recording = Recording::default();
    let run = SingleWorkerRun::new(recording.task(Duration::ZERO), Duration::from_millis(5), 4);

    run_single(&mut permissive_env(), &mut time_sharing_launcher(), run).unwrap();

    let cycles = recording.cycles_of(0);
    assert_eq!(cycles[0].elapsed_ns, 0);
    assert!(cycles[3].elapsed_ns >= ms(15));
}

#[test]
fn test_failed_memory_lock_launches_nothing() {
    let recording = Recording::default();
    let mut env = RealtimeEnvironment::new(FailingLockPlatform(libc::ENOMEM), RealtimeConfig::default());
    let mut launcher = time_sharing_launcher();
    let run = SingleWorkerRun::new(recording.task(Duration::ZERO), Duration::from_millis(1), 10);

    let err = run_single(&mut env, &mut launcher, run).unwrap_err();

    assert!(matches!(err, RtError::MemoryLock { .. }));
    assert_eq!(err.exit_code(), 12);
    assert_eq!(launcher.launched(), 0);
    assert!(recording.cycles().is_empty());
    assert!(recording.announcements().is_empty());
}

/// Real setup: mlockall and a SCHED_FIFO worker.
#[test]
#[ignore = "Requires root (mlockall and SCHED_FIFO)"]
fn test_fifo_single_worker() {
    if !is_root() {
        eprintln!("Skipping test: not running as root");
        return;
    }
    if !has_preempt_rt() {
        eprintln!("WARNING: PREEMPT_RT kernel not detected - latency results may be unreliable");
    }

    let recording = Recording::default();
    let mut env = RealtimeEnvironment::linux(RealtimeConfig::default());
    let run = SingleWorkerRun::new(recording.task(Duration::ZERO), Duration::from_millis(10), 50);

    let summary = run_single(&mut env, &mut fifo_launcher(), run).expect("setup failed");

    assert!(env.status().memory_locked);
    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(recording.cycles().len(), 50);

    let latency = summary.reports[0].latency;
    println!("SCHED_FIFO 10ms x 50: {latency:?}");
    assert_eq!(latency.overrun_count, 0);
}
