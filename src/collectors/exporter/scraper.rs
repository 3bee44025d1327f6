//! Meta-samples describing the scrape itself.
//!
//! Every scrape emits `mysql_up` plus one
//! `mysql_scrape_collector_duration_seconds{collector}` and one
//! `mysql_scrape_collector_success{collector}` per executed scraper. These are
//! rebuilt for every request. Process-wide totals (scrapes served, errors per
//! collector) live in [`ScrapeStats`], a small `prometheus::Registry` merged
//! into each response.

use crate::collectors::metric::{MetricDesc, MetricError, NO_LABELS, Sample, ValueKind};
use crate::collectors::util::{EXPORTER, NAMESPACE, SCRAPE, fq_name};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;
use tokio::time::Instant;

/// Descriptors of the per-scrape meta-samples.
#[derive(Clone, Debug)]
pub struct ScrapeMeta {
    up: Arc<MetricDesc>,
    duration: Arc<MetricDesc>,
    success: Arc<MetricDesc>,
}

impl Default for ScrapeMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrapeMeta {
    #[must_use]
    pub fn new() -> Self {
        Self {
            up: MetricDesc::new(
                fq_name(NAMESPACE, "", "up"),
                "Whether the MySQL server is up.",
                ValueKind::Gauge,
                &[],
            )
            .shared(),
            duration: MetricDesc::new(
                fq_name(NAMESPACE, SCRAPE, "collector_duration_seconds"),
                "Collector time duration.",
                ValueKind::Gauge,
                &["collector"],
            )
            .shared(),
            success: MetricDesc::new(
                fq_name(NAMESPACE, SCRAPE, "collector_success"),
                "Whether a collector succeeded.",
                ValueKind::Gauge,
                &["collector"],
            )
            .shared(),
        }
    }

    /// # Errors
    ///
    /// Never fails in practice; the descriptor has no variable labels.
    pub fn up(&self, up: bool) -> Result<Sample, MetricError> {
        Sample::new(&self.up, if up { 1.0 } else { 0.0 }, &NO_LABELS)
    }

    #[must_use]
    pub fn start(&self, collector: &'static str, stats: &ScrapeStats) -> ScrapeTimer {
        ScrapeTimer {
            collector,
            start: Instant::now(),
            meta: self.clone(),
            stats: stats.clone(),
        }
    }

    fn finish(
        &self,
        collector: &str,
        seconds: f64,
        success: bool,
    ) -> Result<Vec<Sample>, MetricError> {
        Ok(vec![
            Sample::new(&self.duration, seconds, &[collector])?,
            Sample::new(&self.success, if success { 1.0 } else { 0.0 }, &[collector])?,
        ])
    }
}

/// Times one scraper run and yields its meta-samples.
///
/// Consumed by [`ScrapeTimer::success`] or [`ScrapeTimer::error`]; the
/// samples still have to be written to the sink by the caller.
pub struct ScrapeTimer {
    collector: &'static str,
    start: Instant,
    meta: ScrapeMeta,
    stats: ScrapeStats,
}

impl ScrapeTimer {
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn success(self) -> Result<Vec<Sample>, MetricError> {
        self.meta
            .finish(self.collector, self.elapsed_seconds(), true)
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn error(self) -> Result<Vec<Sample>, MetricError> {
        self.stats.record_error(self.collector);
        self.meta
            .finish(self.collector, self.elapsed_seconds(), false)
    }
}

/// Exporter-wide counters that survive between scrapes.
#[derive(Clone)]
pub struct ScrapeStats {
    registry: Registry,
    scrapes_total: IntCounter,
    scrape_errors_total: IntCounterVec,
    last_scrape_error: IntGauge,
}

impl Default for ScrapeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrapeStats {
    /// # Panics
    ///
    /// Panics if metric creation fails (never happens with these static names)
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let scrapes_total = IntCounter::with_opts(Opts::new(
            fq_name(NAMESPACE, EXPORTER, "scrapes_total"),
            "Total number of times MySQL was scraped for metrics.",
        ))
        .expect("mysql_exporter_scrapes_total");

        let scrape_errors_total = IntCounterVec::new(
            Opts::new(
                fq_name(NAMESPACE, EXPORTER, "scrape_errors_total"),
                "Total number of times an error occurred scraping a MySQL.",
            ),
            &["collector"],
        )
        .expect("mysql_exporter_scrape_errors_total");

        let last_scrape_error = IntGauge::with_opts(Opts::new(
            fq_name(NAMESPACE, EXPORTER, "last_scrape_error"),
            "Whether the last scrape of metrics from MySQL resulted in an error (1 for error, 0 for success).",
        ))
        .expect("mysql_exporter_last_scrape_error");

        let registry = Registry::new();
        for collector in [
            Box::new(scrapes_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(scrape_errors_total.clone()),
            Box::new(last_scrape_error.clone()),
        ] {
            registry
                .register(collector)
                .expect("exporter stats registered once");
        }

        Self {
            registry,
            scrapes_total,
            scrape_errors_total,
            last_scrape_error,
        }
    }

    pub fn begin_scrape(&self) {
        self.scrapes_total.inc();
    }

    /// Record the outcome of the whole scrape.
    pub fn end_scrape(&self, failed: bool) {
        self.last_scrape_error.set(i64::from(failed));
    }

    fn record_error(&self, collector: &str) {
        self.scrape_errors_total.with_label_values(&[collector]).inc();
    }

    #[must_use]
    pub fn scrapes(&self) -> u64 {
        self.scrapes_total.get()
    }

    #[must_use]
    pub fn errors(&self, collector: &str) -> u64 {
        self.scrape_errors_total.with_label_values(&[collector]).get()
    }

    #[must_use]
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }
}
