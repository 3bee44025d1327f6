use super::key_values;
use crate::collectors::metric::{MetricDesc, MetricError, NO_LABELS, Sample, SummaryData, ValueKind};
use crate::collectors::query::{LabelRule, QueryRow, fetch_rows, match_rule};
use crate::collectors::util::{
    NAMESPACE, fq_name, parse_composite_status, parse_status, sanitize_metric_fragment,
};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const GLOBAL_STATUS_QUERY: &str = "SHOW GLOBAL STATUS";
const SUBSYSTEM: &str = "global_status";

const BUFFER_POOL_PAGES: &str = "innodb_buffer_pool_pages_";

/// `SHOW GLOBAL STATUS`.
///
/// Well-known key prefixes are folded into labelled metrics (`Com_select`
/// becomes `mysql_global_status_commands_total{command="select"}`); every
/// other numeric key is exported untyped as `mysql_global_status_<key>`.
pub struct GlobalStatus {
    rules: Vec<LabelRule>,
    pages: Arc<MetricDesc>,
    dirty_pages: Arc<MetricDesc>,
    page_changes: Arc<MetricDesc>,
    galera_info: Arc<MetricDesc>,
    galera_latency: Arc<MetricDesc>,
}

impl Default for GlobalStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn labelled(stem: &str, help: &str, kind: ValueKind, label: &str) -> Arc<MetricDesc> {
    MetricDesc::new(fq_name(NAMESPACE, SUBSYSTEM, stem), help, kind, &[label]).shared()
}

impl GlobalStatus {
    #[must_use]
    pub fn new() -> Self {
        let rules = vec![
            LabelRule::new(
                "com_",
                labelled(
                    "commands_total",
                    "Total number of executed MySQL commands.",
                    ValueKind::Counter,
                    "command",
                ),
            ),
            LabelRule::new(
                "handler_",
                labelled(
                    "handlers_total",
                    "Total number of executed MySQL handlers.",
                    ValueKind::Counter,
                    "handler",
                ),
            ),
            LabelRule::new(
                "connection_errors_",
                labelled(
                    "connection_errors_total",
                    "Total number of MySQL connection errors.",
                    ValueKind::Counter,
                    "error",
                ),
            ),
            LabelRule::new(
                "innodb_rows_",
                labelled(
                    "innodb_row_ops_total",
                    "Total number of MySQL InnoDB row operations.",
                    ValueKind::Counter,
                    "operation",
                ),
            ),
            LabelRule::new(
                "performance_schema_",
                labelled(
                    "performance_schema_lost_total",
                    "Total number of MySQL instrumentations that could not be loaded or created due to memory constraints.",
                    ValueKind::Counter,
                    "instrumentation",
                ),
            ),
        ];

        Self {
            rules,
            pages: labelled(
                "buffer_pool_pages",
                "Innodb buffer pool pages by state.",
                ValueKind::Gauge,
                "state",
            ),
            dirty_pages: MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, "buffer_pool_dirty_pages"),
                "Innodb buffer pool dirty pages.",
                ValueKind::Gauge,
                &[],
            )
            .shared(),
            page_changes: labelled(
                "buffer_pool_page_changes_total",
                "Innodb buffer pool page state changes.",
                ValueKind::Counter,
                "operation",
            ),
            galera_info: MetricDesc::new(
                fq_name(NAMESPACE, "galera", "status_info"),
                "PXC/Galera status information.",
                ValueKind::Gauge,
                &[
                    "wsrep_local_state_uuid",
                    "wsrep_cluster_state_uuid",
                    "wsrep_provider_version",
                ],
            )
            .shared(),
            galera_latency: MetricDesc::new(
                fq_name(NAMESPACE, "galera", "evs_repl_latency_seconds"),
                "PXC/Galera group communication latency.",
                ValueKind::Summary,
                &[],
            )
            .shared(),
        }
    }

    fn buffer_pool_sample(&self, state: &str, value: f64) -> Result<Option<Sample>, MetricError> {
        match state {
            "data" | "free" | "misc" | "old" => Sample::new(&self.pages, value, &[state]).map(Some),
            "dirty" => Sample::new(&self.dirty_pages, value, &NO_LABELS).map(Some),
            "total" => Ok(None),
            _ => Sample::new(&self.page_changes, value, &[state]).map(Some),
        }
    }

    /// Map status rows to samples.
    ///
    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let mut samples = Vec::new();
        let mut text: HashMap<String, String> = HashMap::new();

        for (key, raw) in key_values(rows) {
            let key = key.to_ascii_lowercase();

            if key.starts_with("wsrep_") {
                if key == "wsrep_evs_repl_latency" {
                    if let Some(sample) = self.galera_latency_sample(raw)? {
                        samples.push(sample);
                    }
                    continue;
                }
                if let Ok(value) = std::str::from_utf8(raw) {
                    text.insert(key.clone(), value.trim().to_string());
                }
            }

            let Some(value) = parse_status(raw) else {
                continue;
            };

            if let Some(state) = key.strip_prefix(BUFFER_POOL_PAGES) {
                if let Some(sample) = self.buffer_pool_sample(state, value)? {
                    samples.push(sample);
                }
                continue;
            }

            if let Some((rule, label)) = match_rule(&self.rules, &key) {
                samples.push(Sample::new(rule.desc(), value, &[label])?);
                continue;
            }

            let desc = MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, &sanitize_metric_fragment(&key)),
                "Generic metric from SHOW GLOBAL STATUS.",
                ValueKind::Untyped,
                &[],
            )
            .shared();
            samples.push(Sample::new(&desc, value, &NO_LABELS)?);
        }

        if let (Some(local), Some(cluster), Some(provider)) = (
            text.get("wsrep_local_state_uuid"),
            text.get("wsrep_cluster_state_uuid"),
            text.get("wsrep_provider_version"),
        ) {
            samples.push(Sample::new(
                &self.galera_info,
                1.0,
                &[local, cluster, provider],
            )?);
        }

        Ok(samples)
    }

    /// `min/avg/max/stddev/sample_size`, in seconds.
    fn galera_latency_sample(&self, raw: &[u8]) -> Result<Option<Sample>, MetricError> {
        let Some(fields) = parse_composite_status(raw) else {
            return Ok(None);
        };
        let [min, avg, max, _stddev, size] = fields.as_slice() else {
            return Ok(None);
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = size.max(0.0) as u64;

        let data = SummaryData {
            count,
            sum: avg * size,
            quantiles: vec![(0.0, *min), (1.0, *max)],
        };
        Sample::summary(&self.galera_latency, data, &NO_LABELS).map(Some)
    }
}

impl Scraper for GlobalStatus {
    fn name(&self) -> &'static str {
        "global_status"
    }

    fn help(&self) -> &'static str {
        "Collect from SHOW GLOBAL STATUS"
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let rows = fetch_rows(instance.pool(), GLOBAL_STATUS_QUERY).await?;
            let samples = self.samples(&rows)?;
            debug!(rows = rows.len(), samples = samples.len(), "global status parsed");
            sink.send_all(samples).await?;
            Ok(())
        })
    }
}
