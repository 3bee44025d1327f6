//! Per-scrape orchestration.
//!
//! For every request the [`Exporter`]:
//!
//! 1. resolves the scraper set (registry enabled set, or the `collect[]`
//!    selection from the request),
//! 2. acquires an [`Instance`]; on failure only `mysql_up 0` is returned,
//! 3. emits `mysql_up 1` and drops scrapers whose `min_version` is above the
//!    server version,
//! 4. spawns one task per scraper under a shared deadline, each streaming
//!    samples into one bounded [`MetricSink`] and finishing with its
//!    duration/success meta-samples,
//! 5. drains the sink until every task is done or the deadline (plus a short
//!    grace period for meta-samples) passes, and folds everything into metric
//!    families.
//!
//! Samples of a scraper that hit the deadline are kept; its
//! `collector_success` is 0.

mod process;
mod runtime;
mod scraper;

pub use process::{ProcessScraper, ProcessStats};
pub use runtime::RuntimeScraper;
pub use scraper::{ScrapeMeta, ScrapeStats, ScrapeTimer};

use crate::collectors::instance::Connector;
use crate::collectors::metric::{FamilyBuilder, MetricError, SINK_CAPACITY};
use crate::collectors::{Instance, MetricSink, Scraper, ScraperRegistry};
use anyhow::anyhow;
use prometheus::proto::MetricFamily;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info_span, warn};
use tracing_futures::Instrument as _;

/// Extra time after the deadline to collect meta-samples of cancelled
/// scrapers.
const META_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("unknown collector: {0}")]
    UnknownScraper(String),

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("failed to build meta metrics: {0}")]
    Internal(#[from] MetricError),
}

impl ScrapeError {
    /// Whether the caller is at fault (HTTP 400) rather than the exporter.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::UnknownScraper(_) | Self::UnknownTarget(_))
    }
}

#[derive(Clone, Debug)]
pub struct ScrapeRequest {
    /// `collect[]` values; empty means every enabled scraper. Entries may be
    /// comma separated lists.
    pub collect: Vec<String>,
    /// Multi-target name, `None` for the default connection.
    pub target: Option<String>,
    pub timeout: Duration,
}

impl ScrapeRequest {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            collect: Vec::new(),
            target: None,
            timeout,
        }
    }

    #[must_use]
    pub fn with_collect<I, S>(mut self, collect: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collect = collect.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

pub struct Exporter {
    registry: Arc<ScraperRegistry>,
    connector: Arc<dyn Connector>,
    meta: ScrapeMeta,
    stats: ScrapeStats,
}

impl Exporter {
    #[must_use]
    pub fn new(registry: Arc<ScraperRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            meta: ScrapeMeta::new(),
            stats: ScrapeStats::new(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ScraperRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    #[must_use]
    pub const fn stats(&self) -> &ScrapeStats {
        &self.stats
    }

    /// Scrapers to run for a `collect[]` selection.
    ///
    /// An empty selection yields the enabled set. Named scrapers run even
    /// when disabled, for this request only.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::UnknownScraper`] for the first name the
    /// registry does not know.
    pub fn select(&self, collect: &[String]) -> Result<Vec<Arc<dyn Scraper>>, ScrapeError> {
        let names: Vec<&str> = collect
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();

        if names.is_empty() {
            return Ok(self.registry.enabled_scrapers());
        }

        let mut selected: BTreeMap<&'static str, Arc<dyn Scraper>> = BTreeMap::new();
        for name in names {
            let scraper = self
                .registry
                .lookup(name)
                .ok_or_else(|| ScrapeError::UnknownScraper(name.to_string()))?;
            selected.insert(scraper.name(), scraper);
        }

        Ok(selected.into_values().collect())
    }

    /// Run one scrape and return the assembled metric families.
    ///
    /// # Errors
    ///
    /// Returns a client error for unknown collectors or targets, and
    /// [`ScrapeError::Internal`] if meta-samples can not be built.
    pub async fn scrape(&self, request: &ScrapeRequest) -> Result<Vec<MetricFamily>, ScrapeError> {
        let scrapers = self.select(&request.collect)?;

        if let Some(target) = request.target.as_deref()
            && !self.connector.has_target(target)
        {
            return Err(ScrapeError::UnknownTarget(target.to_string()));
        }

        self.stats.begin_scrape();

        let deadline = Instant::now() + request.timeout;
        let mut builder = FamilyBuilder::new();

        let instance = match timeout_at(deadline, self.connector.acquire(request.target.as_deref()))
            .await
        {
            Ok(Ok(instance)) => instance,
            Ok(Err(err)) => {
                warn!(target = ?request.target, error = %err, "failed to connect to MySQL");
                return self.finish_down(builder);
            }
            Err(_) => {
                warn!(target = ?request.target, "timed out connecting to MySQL");
                return self.finish_down(builder);
            }
        };

        builder.push(self.meta.up(true)?);

        let version = instance.version();
        let eligible: Vec<Arc<dyn Scraper>> = scrapers
            .into_iter()
            .filter(|scraper| {
                let eligible = scraper.min_version() <= version;
                if !eligible {
                    debug!(
                        collector = scraper.name(),
                        min_version = %scraper.min_version(),
                        server_version = %version,
                        "skipping collector, server too old"
                    );
                }
                eligible
            })
            .collect();

        let failed = self.run(Arc::new(instance), eligible, deadline, &mut builder).await;
        self.stats.end_scrape(failed);

        if builder.dropped() > 0 {
            warn!(dropped = builder.dropped(), "dropped inconsistent samples");
        }

        let mut families = builder.finish();
        families.extend(self.stats.gather());
        Ok(families)
    }

    fn finish_down(&self, mut builder: FamilyBuilder) -> Result<Vec<MetricFamily>, ScrapeError> {
        builder.push(self.meta.up(false)?);
        self.stats.end_scrape(true);
        Ok(builder.finish())
    }

    /// Fan out to `scrapers` and drain the sink. Returns `true` if any
    /// scraper failed.
    async fn run(
        &self,
        instance: Arc<Instance>,
        scrapers: Vec<Arc<dyn Scraper>>,
        deadline: Instant,
        builder: &mut FamilyBuilder,
    ) -> bool {
        let (sink, mut rx) = MetricSink::channel(SINK_CAPACITY);
        let mut tasks = JoinSet::new();

        for scraper in scrapers {
            let sink = sink.clone();
            let instance = Arc::clone(&instance);
            let timer = self.meta.start(scraper.name(), &self.stats);
            let span = info_span!("collector.scrape", collector = scraper.name());

            tasks.spawn(
                async move {
                    let name = scraper.name();
                    let result = match timeout_at(deadline, scraper.scrape(&instance, &sink)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(anyhow!("scrape deadline exceeded")),
                    };

                    let (ok, meta) = match result {
                        Ok(()) => (true, timer.success()),
                        Err(err) => {
                            warn!(collector = name, error = %err, "error scraping collector");
                            (false, timer.error())
                        }
                    };

                    match meta {
                        Ok(samples) => {
                            for sample in samples {
                                if sink.send(sample).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(err) => warn!(collector = name, error = %err, "invalid meta sample"),
                    }

                    ok
                }
                .instrument(span),
            );
        }

        // the orchestrator keeps no sender, so `recv` ends once every task is done
        drop(sink);

        let hard_stop = deadline + META_GRACE;
        loop {
            match timeout_at(hard_stop, rx.recv()).await {
                Ok(Some(sample)) => {
                    builder.push(sample);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("scrape did not finish within the deadline grace period");
                    break;
                }
            }
        }

        rx.close();
        while let Ok(sample) = rx.try_recv() {
            builder.push(sample);
        }

        let mut failed = false;
        while let Ok(Some(joined)) = timeout_at(hard_stop, tasks.join_next()).await {
            failed |= !joined.unwrap_or(false);
        }
        if !tasks.is_empty() {
            failed = true;
            tasks.abort_all();
        }

        failed
    }
}
