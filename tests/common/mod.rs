#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use mysqld_exporter::collectors::instance::{Connector, ServerInfo};
use mysqld_exporter::collectors::metric::{NO_LABELS, encode_text};
use mysqld_exporter::collectors::{
    Instance, MetricDesc, MetricSink, Sample, Scraper, ScraperRegistry, ValueKind, Version,
};
use prometheus::proto::MetricFamily;
use secrecy::SecretString;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Connector that never touches the network. Instances carry a lazy pool
/// that is only usable by scrapers which do not query.
pub struct FakeConnector {
    server: Option<Arc<ServerInfo>>,
    targets: Vec<String>,
}

impl FakeConnector {
    pub fn up(version: &str) -> Self {
        Self {
            server: Some(Arc::new(ServerInfo::parse(version))),
            targets: Vec::new(),
        }
    }

    pub const fn down() -> Self {
        Self {
            server: None,
            targets: Vec::new(),
        }
    }

    pub fn with_target(mut self, name: &str) -> Self {
        self.targets.push(name.to_string());
        self
    }
}

impl Connector for FakeConnector {
    fn acquire<'a>(&'a self, _target: Option<&'a str>) -> BoxFuture<'a, Result<Instance>> {
        Box::pin(async move {
            let server = self
                .server
                .clone()
                .ok_or_else(|| anyhow!("connection refused"))?;
            let pool = MySqlPoolOptions::new().connect_lazy_with(MySqlConnectOptions::new());
            Ok(Instance::new(pool, server))
        })
    }

    fn has_target(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
    }
}

/// Emits one gauge, optionally after a delay or with a failure at the end.
/// Counts its `scrape` calls.
pub struct FakeScraper {
    name: &'static str,
    calls: Arc<AtomicUsize>,
    desc: Arc<MetricDesc>,
    value: f64,
    delay: Duration,
    fail: bool,
    min_version: Version,
}

impl FakeScraper {
    pub fn new(name: &'static str, value: f64) -> Self {
        Self {
            name,
            calls: Arc::new(AtomicUsize::new(0)),
            desc: MetricDesc::new(
                format!("mysql_fake_{}", name.replace('.', "_")),
                "Fake value.",
                ValueKind::Gauge,
                &[],
            )
            .shared(),
            value,
            delay: Duration::ZERO,
            fail: false,
            min_version: Version::ZERO,
        }
    }

    pub const fn sleeping(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub const fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Shared handle on the call counter, usable after registration.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub const fn requires(mut self, version: Version) -> Self {
        self.min_version = version;
        self
    }
}

impl Scraper for FakeScraper {
    fn name(&self) -> &'static str {
        self.name
    }

    fn help(&self) -> &'static str {
        "Fake scraper."
    }

    fn min_version(&self) -> Version {
        self.min_version
    }

    fn scrape<'a>(
        &'a self,
        _instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            sink.send(Sample::new(&self.desc, self.value, &NO_LABELS)?)
                .await?;
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            if self.fail {
                return Err(anyhow!("fake failure"));
            }
            Ok(())
        })
    }
}

/// Registry in the `Ready` state holding `scrapers`.
pub fn ready_registry(scrapers: Vec<(FakeScraper, bool)>) -> Arc<ScraperRegistry> {
    let registry = ScraperRegistry::new();
    for (scraper, enabled) in scrapers {
        registry.register(Arc::new(scraper), enabled).unwrap();
    }
    let cmd = registry.init(clap::Command::new("mysqld_exporter")).unwrap();
    let matches = cmd.get_matches_from(["mysqld_exporter"]);
    registry.on_parsed(&matches).unwrap();
    Arc::new(registry)
}

pub fn text(families: &[MetricFamily]) -> String {
    encode_text(families).unwrap()
}

/// Value of the exposition line starting with `series`, e.g.
/// `mysql_scrape_collector_success{collector="x"}`.
pub fn sample_value(text: &str, series: &str) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (name, value) = line.rsplit_once(' ')?;
            if name == series { value.parse().ok() } else { None }
        })
}

/// DSN of a local test server, if one is configured.
///
/// Only localhost is accepted so a stray environment never points the test
/// suite at a real database.
pub fn live_dsn() -> Option<SecretString> {
    let dsn = env::var("MYSQLD_EXPORTER_DSN").ok()?;

    if !dsn.contains("localhost") && !dsn.contains("127.0.0.1") && !dsn.contains("::1") {
        eprintln!("MYSQLD_EXPORTER_DSN does not point to localhost, skipping live tests");
        return None;
    }

    Some(SecretString::from(dsn))
}

/// Find an available port for testing
pub fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
    listener
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Wait for server to be ready on the given port
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        if tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

pub fn get_test_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}
