//! Per-cycle telemetry task and end-of-run summaries.

use crate::worker::{Cycle, CycleTask, WorkerReport};
use tracing::info;

/// Task body that emits one structured record per cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryTask;

impl CycleTask for TelemetryTask {
    fn run(&mut self, cycle: &Cycle<'_>) {
        info!(
            worker_id = cycle.identity.worker_id,
            rank = cycle.identity.rank,
            host = cycle.identity.host.as_deref(),
            elapsed_ns = cycle.elapsed_ns,
            iteration = cycle.iteration,
            period_ms = cycle.period_ms(),
            "Running RT task"
        );
    }
}

/// Log the end-of-run summary of one worker.
pub fn log_report(report: &WorkerReport) {
    let latency = &report.latency;
    info!(
        worker = %report.identity.name,
        rank = report.identity.rank,
        executions = report.executions,
        cancelled = report.cancelled,
        latency_min_ns = latency.min_ns,
        latency_max_ns = latency.max_ns,
        latency_mean_ns = latency.mean_ns,
        latency_p99_ns = latency.p99_ns,
        jitter_ns = latency.jitter_ns(),
        overruns = latency.overrun_count,
        "Worker finished"
    );
}
