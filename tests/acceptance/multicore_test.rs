//! Multi-worker acceptance tests.
//!
//! Several ranks hosted in one process through a local session, each worker
//! running at its own period-table entry.
//!
//! # Acceptance Criteria
//!
//! - Every rank runs its full budget at its own period
//! - Workers run concurrently: wall time follows the slowest rank
//! - A rank outside the period table fails only that worker
//! - Setup failures stop the run before any worker is launched

use super::common::{
    fifo_launcher, is_root, ms, permissive_env, time_sharing_launcher, FailingLockPlatform,
    Recording,
};
use rtcycle_common::config::{PeriodTable, RealtimeConfig};
use rtcycle_common::error::RtError;
use rtcycle_runtime::{CancelToken, LocalSession, MultiWorkerCoordinator, RealtimeEnvironment};
use std::time::{Duration, Instant};

/// Ranks [30, 40, 60] ms x 10 runs: wall time is about 9 x 60 ms.
#[test]
fn test_three_ranks_at_their_periods() {
    let periods = [30u64, 40, 60];
    let coordinator = MultiWorkerCoordinator::new(
        LocalSession::new(3),
        PeriodTable::new(vec![30, 40, 60]),
        10,
    );
    let recording = Recording::default();

    let wall = Instant::now();
    let summary = coordinator
        .run(
            &mut permissive_env(),
            &mut time_sharing_launcher(),
            |_| recording.task(Duration::ZERO),
            &CancelToken::new(),
        )
        .unwrap();
    let wall = wall.elapsed();

    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(summary.total_executions(), 30);
    assert!(wall >= Duration::from_millis(540), "run took only {wall:?}");
    assert!(wall < Duration::from_millis(900), "workers did not overlap: {wall:?}");

    for worker_id in 0..3 {
        let cycles = recording.cycles_of(worker_id);
        assert_eq!(cycles.len(), 10);

        let rank = cycles[0].rank.expect("rank reported");
        let period = periods[usize::try_from(rank).unwrap()];
        assert!(cycles.iter().all(|c| c.rank == Some(rank)));
        assert!(cycles.iter().all(|c| c.host.as_deref().is_some_and(|h| !h.is_empty())));

        let span = cycles[9].started.nanos_since(cycles[0].scheduled);
        assert!(span >= ms(9 * period), "rank {rank} span {span}ns too short");
        assert!(span < ms(9 * period) + ms(100), "rank {rank} span {span}ns too long");
    }

    let mut ranks: Vec<u32> = summary
        .reports
        .iter()
        .filter_map(|r| r.identity.rank)
        .collect();
    ranks.sort_unstable();
    assert_eq!(ranks, vec![0, 1, 2]);
}

#[test]
fn test_each_worker_announces_once() {
    let coordinator =
        MultiWorkerCoordinator::new(LocalSession::new(3), PeriodTable::new(vec![2, 3, 4]), 4);
    let recording = Recording::default();

    coordinator
        .run(
            &mut permissive_env(),
            &mut time_sharing_launcher(),
            |_| recording.task(Duration::ZERO),
            &CancelToken::new(),
        )
        .unwrap();

    let mut announcements = recording.announcements();
    announcements.sort_unstable();
    assert_eq!(announcements, vec![0, 1, 2]);
}

#[test]
fn test_rank_outside_table() {
    let coordinator =
        MultiWorkerCoordinator::new(LocalSession::new(3), PeriodTable::new(vec![2, 2]), 3);
    let recording = Recording::default();

    let summary = coordinator
        .run(
            &mut permissive_env(),
            &mut time_sharing_launcher(),
            |_| recording.task(Duration::ZERO),
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.failures, vec![RtError::RankOutOfRange { rank: 2, len: 2 }]);
    assert_ne!(summary.exit_code(), 0);
    assert!(recording.cycles().iter().all(|c| c.rank != Some(2)));
}

#[test]
fn test_failed_memory_lock_launches_nothing() {
    let coordinator =
        MultiWorkerCoordinator::new(LocalSession::new(3), PeriodTable::default(), 10);
    let mut env = RealtimeEnvironment::new(FailingLockPlatform(libc::EAGAIN), RealtimeConfig::default());
    let mut launcher = time_sharing_launcher();
    let recording = Recording::default();

    let err = coordinator
        .run(&mut env, &mut launcher, |_| recording.task(Duration::ZERO), &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, RtError::MemoryLock { .. }));
    assert_ne!(err.exit_code(), 0);
    assert!(env.status().privilege_raised);
    assert!(!env.status().memory_locked);
    assert_eq!(launcher.launched(), 0);
    assert!(!coordinator.session().is_active());
}

#[test]
fn test_cancellation_ends_run_early() {
    let coordinator = MultiWorkerCoordinator::new(
        LocalSession::new(2),
        PeriodTable::new(vec![20, 20]),
        1_000,
    );
    let recording = Recording::default();
    let cancel = CancelToken::new();

    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        trigger.cancel();
    });

    let wall = Instant::now();
    let summary = coordinator
        .run(
            &mut permissive_env(),
            &mut time_sharing_launcher(),
            |_| recording.task(Duration::ZERO),
            &cancel,
        )
        .unwrap();
    canceller.join().unwrap();

    assert!(wall.elapsed() < Duration::from_secs(2));
    assert!(summary.is_success());
    assert!(summary.reports.iter().all(|r| r.cancelled));
    assert!(summary.reports.iter().all(|r| r.executions < 1_000));
}

/// Real setup: CAP_SYS_NICE, mlockall and SCHED_FIFO workers.
#[test]
#[ignore = "Requires root (capabilities, mlockall, SCHED_FIFO)"]
fn test_fifo_multicore() {
    if !is_root() {
        eprintln!("Skipping test: not running as root");
        return;
    }

    let coordinator = MultiWorkerCoordinator::new(
        LocalSession::new(3),
        PeriodTable::new(vec![30, 40, 60]),
        10,
    );
    let mut env = RealtimeEnvironment::linux(RealtimeConfig::default());
    let recording = Recording::default();

    let summary = coordinator
        .run(
            &mut env,
            &mut fifo_launcher(),
            |_| recording.task(Duration::ZERO),
            &CancelToken::new(),
        )
        .expect("setup failed");

    assert!(env.status().privilege_raised);
    assert!(env.status().memory_locked);
    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    for report in &summary.reports {
        println!("{}: {:?}", report.identity.name, report.latency);
    }
}
