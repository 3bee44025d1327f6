use crate::collectors::instance::{Flavor, Version};
use crate::collectors::metric::{MetricDesc, MetricError, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows_or_absent};
use crate::collectors::util::{NAMESPACE, fq_name, parse_status, sanitize_metric_fragment};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const SUBSYSTEM: &str = "slave_status";

const LABELS: [&str; 4] = ["master_host", "master_uuid", "channel_name", "connection_name"];

/// Columns holding label values; the first present alternative wins.
const LABEL_COLUMNS: [&[&str]; 4] = [
    &["master_host", "source_host"],
    &["master_uuid", "source_uuid"],
    &["channel_name"],
    &["connection_name"],
];

/// Replication status of this server as a replica.
///
/// One set of `mysql_slave_status_<column>` metrics per replication channel.
/// A server that is not a replica returns no rows and emits nothing.
pub struct SlaveStatus {
    descs: parking_lot::Mutex<HashMap<String, Arc<MetricDesc>>>,
}

impl Default for SlaveStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Statement for the server: MariaDB reports every connection with
/// `SHOW ALL SLAVES STATUS`, MySQL 8.0.22 renamed the statement.
#[must_use]
pub fn status_query(flavor: Flavor, version: Version) -> &'static str {
    match flavor {
        Flavor::MariaDb if version >= Version::new(10, 2, 0) => "SHOW ALL SLAVES STATUS",
        Flavor::MySql if version >= Version::new(8, 0, 22) => "SHOW REPLICA STATUS",
        _ => "SHOW SLAVE STATUS",
    }
}

fn is_label_column(column: &str) -> bool {
    LABEL_COLUMNS
        .iter()
        .flat_map(|alternatives| alternatives.iter())
        .any(|c| c.eq_ignore_ascii_case(column))
}

/// Status values that are not plain numbers.
fn parse_slave_value(raw: &[u8]) -> Option<f64> {
    match std::str::from_utf8(raw).ok()?.trim() {
        "Connecting" => Some(0.0),
        _ => parse_status(raw),
    }
}

impl SlaveStatus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            descs: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Descriptors are derived from column names and cached, so that every
    /// scrape shares one `Arc` per metric.
    fn desc(&self, column: &str) -> Arc<MetricDesc> {
        let stem = sanitize_metric_fragment(column);
        let mut descs = self.descs.lock();
        Arc::clone(descs.entry(stem).or_insert_with_key(|stem| {
            MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, stem),
                format!("Generic metric from SHOW SLAVE STATUS ({column})."),
                ValueKind::Untyped,
                &LABELS,
            )
            .shared()
        }))
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let mut samples = Vec::new();

        for row in rows {
            let labels: Vec<&str> = LABEL_COLUMNS
                .iter()
                .map(|alternatives| {
                    alternatives
                        .iter()
                        .find_map(|c| row.str_by_name(c))
                        .unwrap_or_default()
                })
                .collect();

            for (column, raw) in row.iter() {
                if is_label_column(column) {
                    continue;
                }
                let Some(value) = raw.and_then(parse_slave_value) else {
                    continue;
                };
                samples.push(Sample::new(&self.desc(column), value, &labels)?);
            }
        }

        Ok(samples)
    }
}

impl Scraper for SlaveStatus {
    fn name(&self) -> &'static str {
        "slave_status"
    }

    fn help(&self) -> &'static str {
        "Collect from SHOW SLAVE STATUS"
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let query = status_query(instance.flavor(), instance.version());
            let Some(rows) = fetch_rows_or_absent(instance.pool(), query, self.name()).await?
            else {
                return Ok(());
            };

            if rows.is_empty() {
                debug!("server is not a replica");
                return Ok(());
            }

            sink.send_all(self.samples(&rows)?).await?;
            Ok(())
        })
    }
}
