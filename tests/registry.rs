#![allow(clippy::unwrap_used)]

use clap::Command;
use mysqld_exporter::cli::commands;
use mysqld_exporter::collectors::registry::{Lifecycle, RegistryError};
use mysqld_exporter::collectors::{ArgValue, builtin_scrapers, default_registry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_builtin_defaults() {
    let defaults: BTreeMap<&str, bool> = builtin_scrapers()
        .iter()
        .map(|(scraper, enabled)| (scraper.name(), *enabled))
        .collect();

    for name in [
        "global_status",
        "global_variables",
        "slave_status",
        "info_schema.innodb_cmp",
        "info_schema.query_response_time",
    ] {
        assert_eq!(defaults.get(name), Some(&true), "{name}");
    }

    for name in [
        "binlog_size",
        "heartbeat",
        "info_schema.processlist",
        "info_schema.tables",
        "mysql.innodb_table_stats",
        "perf_schema.eventsstatements",
        "perf_schema.file_events",
        "perf_schema.replication_group_members",
    ] {
        assert_eq!(defaults.get(name), Some(&false), "{name}");
    }
}

#[test]
fn test_builtin_names_are_unique() {
    let scrapers = builtin_scrapers();
    let names: BTreeMap<&str, usize> = scrapers
        .iter()
        .fold(BTreeMap::new(), |mut acc, (scraper, _)| {
            *acc.entry(scraper.name()).or_default() += 1;
            acc
        });
    assert!(names.values().all(|count| *count == 1));
}

#[test]
fn test_lifecycle() {
    let registry = default_registry();
    assert_eq!(registry.state(), Lifecycle::Uninitialized);
    assert!(!registry.wait_ready(Duration::from_millis(10)));

    let cmd = registry.init(Command::new("mysqld_exporter")).unwrap();
    assert_eq!(registry.state(), Lifecycle::FlagsPending);
    assert_eq!(
        registry.init(Command::new("again")).unwrap_err(),
        RegistryError::AlreadyInitialized
    );

    let matches = cmd.get_matches_from(["mysqld_exporter", "--collect.heartbeat"]);
    let config = registry.on_parsed(&matches).unwrap();
    assert_eq!(registry.state(), Lifecycle::Ready);
    assert!(config.is_enabled("heartbeat"));
    assert!(registry.wait_ready(Duration::from_millis(10)));

    registry.teardown();
    assert_eq!(registry.state(), Lifecycle::TornDown);
    assert!(registry.enabled_scrapers().is_empty());
}

#[test]
fn test_enabled_scrapers_waits_for_parse() {
    let registry = Arc::new(default_registry());
    let cmd = registry.init(Command::new("mysqld_exporter")).unwrap();

    let reader = {
        let registry = Arc::clone(&registry);
        std::thread::spawn(move || registry.enabled_scrapers().len())
    };

    std::thread::sleep(Duration::from_millis(50));
    registry
        .on_parsed(&cmd.get_matches_from(["mysqld_exporter"]))
        .unwrap();

    assert_eq!(reader.join().unwrap(), registry.enabled_scrapers().len());
}

#[test]
fn test_scraper_arguments_from_command_line() {
    let registry = Arc::new(default_registry());
    let cmd = commands::add_scraper_args(commands::new(), &registry).unwrap();
    let matches = cmd.get_matches_from([
        "mysqld_exporter",
        "--collect.info_schema.tables.databases",
        "shop,billing",
        "--collect.heartbeat.utc",
    ]);
    registry.on_parsed(&matches).unwrap();

    let tables = registry.lookup("info_schema.tables").unwrap();
    let args = tables.as_configurable().unwrap().args();
    let databases = args.iter().find(|a| a.name == "databases").unwrap();
    assert_eq!(databases.value, ArgValue::String("shop,billing".to_string()));

    let heartbeat = registry.lookup("heartbeat").unwrap();
    let args = heartbeat.as_configurable().unwrap().args();
    let utc = args.iter().find(|a| a.name == "utc").unwrap();
    assert_eq!(utc.value, ArgValue::Bool(true));
}

#[test]
fn test_bool_scraper_argument_takes_separate_value() {
    let registry = Arc::new(default_registry());
    let cmd = commands::add_scraper_args(commands::new(), &registry).unwrap();
    let matches = cmd.get_matches_from([
        "mysqld_exporter",
        "--collect.heartbeat.utc",
        "false",
        "--collect.heartbeat",
    ]);
    registry.on_parsed(&matches).unwrap();

    let heartbeat = registry.lookup("heartbeat").unwrap();
    let args = heartbeat.as_configurable().unwrap().args();
    let utc = args.iter().find(|a| a.name == "utc").unwrap();
    assert_eq!(utc.value, ArgValue::Bool(false));
    assert!(registry.is_enabled("heartbeat"));
}
