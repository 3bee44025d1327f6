use crate::collectors::metric::{MetricDesc, MetricError, NO_LABELS, Sample, ValueKind};
use crate::collectors::util::{EXPORTER, NAMESPACE, fq_name, u64_to_f64};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeMetrics};

/// Tokio runtime gauges for the exporter itself.
pub struct RuntimeScraper {
    workers: Arc<MetricDesc>,
    alive_tasks: Arc<MetricDesc>,
    global_queue_depth: Arc<MetricDesc>,
}

impl Default for RuntimeScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeScraper {
    #[must_use]
    pub fn new() -> Self {
        let gauge = |stem: &str, help: &str| {
            MetricDesc::new(
                fq_name(NAMESPACE, EXPORTER, &format!("runtime_{stem}")),
                help,
                ValueKind::Gauge,
                &[],
            )
            .shared()
        };

        Self {
            workers: gauge("workers", "Number of worker threads used by the runtime."),
            alive_tasks: gauge("alive_tasks", "Number of alive tasks in the runtime."),
            global_queue_depth: gauge(
                "global_queue_depth",
                "Number of tasks currently scheduled in the runtime's global queue.",
            ),
        }
    }

    fn samples(&self, metrics: &RuntimeMetrics) -> Result<Vec<Sample>, MetricError> {
        Ok(vec![
            Sample::new(
                &self.workers,
                u64_to_f64(metrics.num_workers() as u64),
                &NO_LABELS,
            )?,
            Sample::new(
                &self.alive_tasks,
                u64_to_f64(metrics.num_alive_tasks() as u64),
                &NO_LABELS,
            )?,
            Sample::new(
                &self.global_queue_depth,
                u64_to_f64(metrics.global_queue_depth() as u64),
                &NO_LABELS,
            )?,
        ])
    }
}

impl Scraper for RuntimeScraper {
    fn name(&self) -> &'static str {
        "exporter.runtime"
    }

    fn help(&self) -> &'static str {
        "Collect tokio runtime metrics of the exporter"
    }

    fn scrape<'a>(
        &'a self,
        _instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let metrics = Handle::current().metrics();
            for sample in self.samples(&metrics)? {
                sink.send(sample).await?;
            }
            Ok(())
        })
    }
}
