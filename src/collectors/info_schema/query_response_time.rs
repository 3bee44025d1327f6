use super::SUBSYSTEM;
use crate::collectors::metric::{HistogramData, MetricDesc, MetricError, NO_LABELS, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows, fetch_rows_or_absent};
use crate::collectors::util::{NAMESPACE, fq_name};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

const STATS_ENABLED_QUERY: &str = "SELECT @@query_response_time_stats";

/// `(table, metric stem)` pairs; the read/write split only exists on
/// Percona Server.
const SOURCES: [(&str, &str); 3] = [
    ("QUERY_RESPONSE_TIME", "query_response_time_seconds"),
    ("QUERY_RESPONSE_TIME_READ", "read_query_response_time_seconds"),
    ("QUERY_RESPONSE_TIME_WRITE", "write_query_response_time_seconds"),
];

/// Query latency histograms from the response time distribution plugin.
pub struct QueryResponseTime {
    descs: Vec<(&'static str, Arc<MetricDesc>)>,
}

impl Default for QueryResponseTime {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryResponseTime {
    #[must_use]
    pub fn new() -> Self {
        let descs = SOURCES
            .iter()
            .map(|(table, stem)| {
                let desc = MetricDesc::new(
                    fq_name(NAMESPACE, SUBSYSTEM, stem),
                    format!("The number of queries according to the length of time they took to execute, from {table}."),
                    ValueKind::Histogram,
                    &[],
                )
                .shared();
                (*table, desc)
            })
            .collect();

        Self { descs }
    }

    /// Rows are `(TIME, COUNT, TOTAL)` with per-bucket counts. The last row
    /// has `TIME = 'TOO LONG'`: it counts towards the total but has no bound.
    ///
    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn histogram(desc: &Arc<MetricDesc>, rows: &[QueryRow]) -> Result<Sample, MetricError> {
        let mut data = HistogramData::default();

        for row in rows {
            let count = row
                .str(1)
                .and_then(|c| c.trim().parse::<u64>().ok())
                .unwrap_or_default();
            data.count += count;
            data.sum += row.f64(2).unwrap_or_default();

            if let Some(bound) = row.str(0).and_then(|t| t.trim().parse::<f64>().ok()) {
                data.buckets.push((bound, data.count));
            }
        }

        Sample::histogram(desc, data, &NO_LABELS)
    }
}

impl Scraper for QueryResponseTime {
    fn name(&self) -> &'static str {
        "info_schema.query_response_time"
    }

    fn help(&self) -> &'static str {
        "Collect query response time distribution if query_response_time_stats is ON."
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(enabled) =
                fetch_rows_or_absent(instance.pool(), STATS_ENABLED_QUERY, self.name()).await?
            else {
                return Ok(());
            };
            if !enabled
                .first()
                .and_then(|row| row.f64(0))
                .is_some_and(|v| v > 0.0)
            {
                debug!("query_response_time_stats is OFF");
                return Ok(());
            }

            for (table, desc) in &self.descs {
                let query = format!(
                    "SELECT TIME, COUNT, TOTAL FROM information_schema.{table} ORDER BY TIME"
                );
                // Only the combined table is guaranteed to exist.
                let rows = match fetch_rows(instance.pool(), &query).await {
                    Ok(rows) => rows,
                    Err(err) => {
                        debug!(table, error = %err, "response time table unavailable");
                        continue;
                    }
                };
                if rows.is_empty() {
                    continue;
                }
                sink.send(Self::histogram(desc, &rows)?).await?;
            }

            Ok(())
        })
    }
}
