//! Configuration acceptance tests: the shipped file and operator overrides.

use rtcycle_common::config::{AppConfig, SchedPolicy, SessionKind, DEFAULT_PERIOD_TABLE_MS};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

fn shipped_config() -> AppConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    AppConfig::from_file(&path).expect("config/default.toml should parse")
}

#[test]
fn test_shipped_config_matches_defaults() {
    let config = shipped_config();
    config.validate().unwrap();

    assert!(config.realtime.lock_memory);
    assert_eq!(config.realtime.raise_privilege, None);
    assert_eq!(config.worker.policy, SchedPolicy::Fifo);
    assert_eq!(config.worker.priority, 1);
    assert_eq!(config.worker.stack_size, 256 * 1024);
    assert_eq!(config.single.period, Duration::from_millis(30));
    assert_eq!(config.single.runs, 100);
    assert_eq!(config.multicore.runs, 10);
    assert_eq!(config.multicore.session, SessionKind::Local);
    assert_eq!(
        config.multicore.period_table.iter().collect::<Vec<_>>(),
        DEFAULT_PERIOD_TABLE_MS.to_vec()
    );
}

#[test]
fn test_shipped_config_round_trips() {
    let config = shipped_config();
    let reparsed = AppConfig::from_toml(&config.to_toml().unwrap()).unwrap();

    assert_eq!(reparsed.worker, config.worker);
    assert_eq!(reparsed.multicore.period_table, config.multicore.period_table);
    assert_eq!(reparsed.single.period, config.single.period);
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_development_override_file() {
    let file = write_config(
        r#"
        [realtime]
        lock_memory = false

        [worker]
        policy = "other"

        [multicore]
        period_table = [30, 40, 60]
        runs = 3
        "#,
    );

    let config = AppConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.worker.policy, SchedPolicy::Other);
    assert_eq!(config.worker.effective_priority(), 0);
    assert_eq!(config.multicore.period_table.len(), 3);
    assert_eq!(config.multicore.runs, 3);
    // Sections left out of the file keep their defaults.
    assert_eq!(config.single.period, Duration::from_millis(30));
}

#[test]
fn test_override_file_cannot_drop_memory_lock_for_fifo() {
    let file = write_config("[realtime]\nlock_memory = false\n");

    let config = AppConfig::from_file(file.path()).unwrap();
    assert_eq!(config.worker.policy, SchedPolicy::Fifo);
    assert!(config.validate().is_err());
}
