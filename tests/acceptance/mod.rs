//! Integration tests for rtcycle acceptance testing.
//!
//! These tests verify the executor's timing behavior end to end:
//! - Single worker: budget, schedule, drift
//! - Multiple ranks: per-rank periods, concurrency, rollback
//! - Shipped configuration
//!
//! Tests that need real SCHED_FIFO and mlockall are ignored by default and
//! require root.

mod common;
mod config_test;
mod multicore_test;
mod single_worker_test;
