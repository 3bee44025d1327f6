#![allow(clippy::unwrap_used)]

use anyhow::Result;
use common::{FakeConnector, FakeScraper, ready_registry, sample_value, text};
use mysqld_exporter::collectors::Version;
use mysqld_exporter::collectors::exporter::{Exporter, ScrapeError, ScrapeRequest};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

mod common;

fn exporter(scrapers: Vec<(FakeScraper, bool)>, connector: FakeConnector) -> Exporter {
    Exporter::new(ready_registry(scrapers), Arc::new(connector))
}

fn success(text: &str, collector: &str) -> Option<f64> {
    sample_value(
        text,
        &format!("mysql_scrape_collector_success{{collector=\"{collector}\"}}"),
    )
}

fn duration(text: &str, collector: &str) -> Option<f64> {
    sample_value(
        text,
        &format!("mysql_scrape_collector_duration_seconds{{collector=\"{collector}\"}}"),
    )
}

#[tokio::test]
async fn test_scrape_runs_enabled_scrapers() -> Result<()> {
    let exporter = exporter(
        vec![
            (FakeScraper::new("alpha", 3.0), true),
            (FakeScraper::new("beta", 18.0), true),
            (FakeScraper::new("gamma", 1.0), false),
        ],
        FakeConnector::up("8.0.36"),
    );

    let families = exporter
        .scrape(&ScrapeRequest::new(Duration::from_secs(5)))
        .await?;
    let body = text(&families);

    assert_eq!(sample_value(&body, "mysql_up"), Some(1.0));
    assert_eq!(sample_value(&body, "mysql_fake_alpha"), Some(3.0));
    assert_eq!(sample_value(&body, "mysql_fake_beta"), Some(18.0));
    assert_eq!(sample_value(&body, "mysql_fake_gamma"), None);

    assert_eq!(success(&body, "alpha"), Some(1.0));
    assert_eq!(success(&body, "beta"), Some(1.0));
    assert_eq!(success(&body, "gamma"), None);
    assert!(duration(&body, "alpha").unwrap() >= 0.0);

    assert_eq!(sample_value(&body, "mysql_exporter_scrapes_total"), Some(1.0));
    assert_eq!(sample_value(&body, "mysql_exporter_last_scrape_error"), Some(0.0));

    Ok(())
}

#[tokio::test]
async fn test_server_down_reports_only_up() -> Result<()> {
    let exporter = exporter(
        vec![(FakeScraper::new("alpha", 3.0), true)],
        FakeConnector::down(),
    );

    let families = exporter
        .scrape(&ScrapeRequest::new(Duration::from_secs(5)))
        .await?;
    let body = text(&families);

    let samples: Vec<&str> = body.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(samples, vec!["mysql_up 0"]);
    assert_eq!(families.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_no_enabled_scrapers_still_reports_up() -> Result<()> {
    let exporter = exporter(
        vec![
            (FakeScraper::new("alpha", 3.0), false),
            (FakeScraper::new("beta", 4.0), false),
        ],
        FakeConnector::up("8.0.36"),
    );

    let families = exporter
        .scrape(&ScrapeRequest::new(Duration::from_secs(5)))
        .await?;
    let body = text(&families);

    assert_eq!(sample_value(&body, "mysql_up"), Some(1.0));
    assert!(!body.contains("mysql_scrape_collector_"), "{body}");
    assert!(!body.contains("mysql_fake_"));

    Ok(())
}

#[tokio::test]
async fn test_failing_scraper_keeps_samples() -> Result<()> {
    let exporter = exporter(
        vec![
            (FakeScraper::new("alpha", 3.0).failing(), true),
            (FakeScraper::new("beta", 4.0), true),
        ],
        FakeConnector::up("8.0.36"),
    );

    let families = exporter
        .scrape(&ScrapeRequest::new(Duration::from_secs(5)))
        .await?;
    let body = text(&families);

    assert_eq!(sample_value(&body, "mysql_fake_alpha"), Some(3.0));
    assert_eq!(success(&body, "alpha"), Some(0.0));
    assert_eq!(success(&body, "beta"), Some(1.0));
    assert_eq!(
        sample_value(
            &body,
            "mysql_exporter_scrape_errors_total{collector=\"alpha\"}"
        ),
        Some(1.0)
    );
    assert_eq!(sample_value(&body, "mysql_exporter_last_scrape_error"), Some(1.0));
    assert_eq!(exporter.stats().errors("alpha"), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_slow_scraper() -> Result<()> {
    let exporter = exporter(
        vec![
            (
                FakeScraper::new("slow", 7.0).sleeping(Duration::from_secs(5)),
                true,
            ),
            (FakeScraper::new("fast", 1.0), true),
        ],
        FakeConnector::up("8.0.36"),
    );

    let families = exporter
        .scrape(&ScrapeRequest::new(Duration::from_secs(2)))
        .await?;
    let body = text(&families);

    assert_eq!(sample_value(&body, "mysql_up"), Some(1.0));
    assert_eq!(success(&body, "slow"), Some(0.0));
    assert_eq!(success(&body, "fast"), Some(1.0));

    // samples sent before the deadline survive
    assert_eq!(sample_value(&body, "mysql_fake_slow"), Some(7.0));

    let elapsed = duration(&body, "slow").unwrap();
    assert!((1.9..2.3).contains(&elapsed), "duration was {elapsed}");

    Ok(())
}

#[tokio::test]
async fn test_min_version_filters_scrapers() -> Result<()> {
    let modern = FakeScraper::new("modern", 1.0).requires(Version::new(8, 0, 22));
    let any = FakeScraper::new("any", 1.0);
    let (modern_calls, any_calls) = (modern.calls(), any.calls());
    let exporter = exporter(
        vec![(modern, true), (any, true)],
        FakeConnector::up("5.7.44-log"),
    );

    let families = exporter
        .scrape(&ScrapeRequest::new(Duration::from_secs(5)))
        .await?;
    let body = text(&families);

    assert_eq!(success(&body, "modern"), None);
    assert_eq!(success(&body, "any"), Some(1.0));
    assert_eq!(modern_calls.load(Ordering::SeqCst), 0);
    assert_eq!(any_calls.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_collect_selection() -> Result<()> {
    let exporter = exporter(
        vec![
            (FakeScraper::new("alpha", 1.0), true),
            (FakeScraper::new("beta", 2.0), true),
            (FakeScraper::new("info.gamma", 3.0), false),
        ],
        FakeConnector::up("8.0.36"),
    );

    let request =
        ScrapeRequest::new(Duration::from_secs(5)).with_collect(["info.gamma,beta", "beta"]);
    let body = text(&exporter.scrape(&request).await?);

    assert_eq!(success(&body, "alpha"), None);
    assert_eq!(success(&body, "beta"), Some(1.0));
    assert_eq!(success(&body, "info.gamma"), Some(1.0));

    // a per-request selection does not change the enabled set
    assert!(!exporter.registry().is_enabled("info.gamma"));

    Ok(())
}

#[tokio::test]
async fn test_unknown_collector_rejected() {
    let exporter = exporter(
        vec![(FakeScraper::new("alpha", 1.0), true)],
        FakeConnector::up("8.0.36"),
    );

    let request = ScrapeRequest::new(Duration::from_secs(5)).with_collect(["alpha,nope"]);
    let err = exporter.scrape(&request).await.unwrap_err();

    assert!(matches!(&err, ScrapeError::UnknownScraper(name) if name == "nope"));
    assert!(err.is_client_error());
    assert_eq!(exporter.stats().scrapes(), 0);
}

#[tokio::test]
async fn test_targets() -> Result<()> {
    let exporter = exporter(
        vec![(FakeScraper::new("alpha", 1.0), true)],
        FakeConnector::up("8.0.36").with_target("replica"),
    );

    let request = ScrapeRequest::new(Duration::from_secs(5)).with_target("replica");
    let body = text(&exporter.scrape(&request).await?);
    assert_eq!(sample_value(&body, "mysql_up"), Some(1.0));

    let request = ScrapeRequest::new(Duration::from_secs(5)).with_target("primary");
    let err = exporter.scrape(&request).await.unwrap_err();
    assert!(matches!(err, ScrapeError::UnknownTarget(_)));

    Ok(())
}

#[tokio::test]
async fn test_scrapes_are_independent() -> Result<()> {
    let exporter = Arc::new(exporter(
        vec![(FakeScraper::new("alpha", 5.0), true)],
        FakeConnector::up("10.11.6-MariaDB"),
    ));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let exporter = Arc::clone(&exporter);
        handles.push(tokio::spawn(async move {
            exporter
                .scrape(&ScrapeRequest::new(Duration::from_secs(5)))
                .await
                .map(|families| text(&families))
        }));
    }

    for handle in handles {
        let body = handle.await??;
        assert_eq!(sample_value(&body, "mysql_fake_alpha"), Some(5.0));
        assert_eq!(success(&body, "alpha"), Some(1.0));
    }

    assert_eq!(exporter.stats().scrapes(), 4);

    Ok(())
}
