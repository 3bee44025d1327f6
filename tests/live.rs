//! Scrapes against a real server. Skipped unless `MYSQLD_EXPORTER_DSN`
//! points to a reachable local instance.

#![allow(clippy::unwrap_used)]

use anyhow::Result;
use clap::Command;
use common::{live_dsn, sample_value, text};
use mysqld_exporter::collectors::config::GlobalOptions;
use mysqld_exporter::collectors::default_registry;
use mysqld_exporter::collectors::exporter::{Exporter, ScrapeRequest};
use mysqld_exporter::collectors::instance::{Connector, InstanceFactory};
use mysqld_exporter::exporter::instance_factory;
use std::sync::Arc;
use std::time::Duration;

mod common;

async fn live_factory() -> Option<Arc<InstanceFactory>> {
    let dsn = live_dsn()?;
    let options = GlobalOptions {
        connect_timeout: Duration::from_secs(2),
        ..GlobalOptions::default()
    };
    let factory = Arc::new(instance_factory(&options, Some(&dsn)).ok()?);

    match factory.acquire(None).await {
        Ok(_) => Some(factory),
        Err(err) => {
            eprintln!("test server not reachable, skipping: {err:#}");
            None
        }
    }
}

fn exporter(factory: Arc<InstanceFactory>, args: &[&str]) -> Exporter {
    let registry = Arc::new(default_registry());
    let cmd = registry.init(Command::new("mysqld_exporter")).unwrap();
    let mut argv = vec!["mysqld_exporter"];
    argv.extend_from_slice(args);
    registry.on_parsed(&cmd.get_matches_from(argv)).unwrap();

    Exporter::new(registry, factory)
}

#[tokio::test]
async fn test_live_default_scrape() -> Result<()> {
    let Some(factory) = live_factory().await else {
        return Ok(());
    };
    let exporter = exporter(Arc::clone(&factory), &[]);

    let body = text(
        &exporter
            .scrape(&ScrapeRequest::new(Duration::from_secs(10)))
            .await?,
    );

    assert_eq!(sample_value(&body, "mysql_up"), Some(1.0));
    assert!(sample_value(&body, "mysql_global_status_uptime").unwrap() > 0.0);
    assert_eq!(
        sample_value(
            &body,
            "mysql_scrape_collector_success{collector=\"global_status\"}"
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            &body,
            "mysql_scrape_collector_success{collector=\"global_variables\"}"
        ),
        Some(1.0)
    );
    assert!(body.contains("mysql_version_info{"));

    factory.close().await;
    Ok(())
}

#[tokio::test]
async fn test_live_information_schema() -> Result<()> {
    let Some(factory) = live_factory().await else {
        return Ok(());
    };
    let exporter = exporter(Arc::clone(&factory), &[]);

    let request = ScrapeRequest::new(Duration::from_secs(10))
        .with_collect(["info_schema.processlist,info_schema.tables"]);
    let body = text(&exporter.scrape(&request).await?);

    for collector in ["info_schema.processlist", "info_schema.tables"] {
        assert_eq!(
            sample_value(
                &body,
                &format!("mysql_scrape_collector_success{{collector=\"{collector}\"}}")
            ),
            Some(1.0),
            "{collector} failed:\n{body}"
        );
    }

    factory.close().await;
    Ok(())
}

#[tokio::test]
async fn test_live_optional_tables_do_not_fail() -> Result<()> {
    let Some(factory) = live_factory().await else {
        return Ok(());
    };
    let exporter = exporter(Arc::clone(&factory), &[]);

    // absent on stock servers, must not count as a failure
    let request = ScrapeRequest::new(Duration::from_secs(10))
        .with_collect(["info_schema.query_response_time"]);
    let body = text(&exporter.scrape(&request).await?);

    assert_eq!(
        sample_value(
            &body,
            "mysql_scrape_collector_success{collector=\"info_schema.query_response_time\"}"
        ),
        Some(1.0)
    );

    factory.close().await;
    Ok(())
}
