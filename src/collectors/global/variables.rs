use super::key_values;
use crate::collectors::metric::{MetricDesc, MetricError, NO_LABELS, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows};
use crate::collectors::util::{NAMESPACE, fq_name, parse_status, sanitize_metric_fragment};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const GLOBAL_VARIABLES_QUERY: &str = "SHOW GLOBAL VARIABLES";
const SUBSYSTEM: &str = "global_variables";

/// Variables exported as labels rather than values.
const TEXT_VARIABLES: &[&str] = &[
    "innodb_version",
    "version",
    "version_comment",
    "tx_isolation",
    "transaction_isolation",
    "wsrep_cluster_name",
    "wsrep_provider_options",
];

/// `SHOW GLOBAL VARIABLES`.
///
/// Numeric variables become `mysql_global_variables_<name>` gauges. The
/// server version, isolation level and Galera settings are exported as
/// info-style metrics.
pub struct GlobalVariables {
    version_info: Arc<MetricDesc>,
    isolation: Arc<MetricDesc>,
    galera_info: Arc<MetricDesc>,
    galera_gcache: Arc<MetricDesc>,
}

impl Default for GlobalVariables {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalVariables {
    #[must_use]
    pub fn new() -> Self {
        Self {
            version_info: MetricDesc::new(
                fq_name(NAMESPACE, "version", "info"),
                "MySQL version and distribution.",
                ValueKind::Gauge,
                &["innodb_version", "version", "version_comment"],
            )
            .shared(),
            isolation: MetricDesc::new(
                fq_name(NAMESPACE, "transaction", "isolation"),
                "MySQL transaction isolation.",
                ValueKind::Gauge,
                &["level"],
            )
            .shared(),
            galera_info: MetricDesc::new(
                fq_name(NAMESPACE, "galera", "variables_info"),
                "PXC/Galera variables information.",
                ValueKind::Gauge,
                &["wsrep_cluster_name"],
            )
            .shared(),
            galera_gcache: MetricDesc::new(
                fq_name(NAMESPACE, "galera", "gcache_size_bytes"),
                "PXC/Galera gcache size.",
                ValueKind::Gauge,
                &[],
            )
            .shared(),
        }
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let mut samples = Vec::new();
        let mut text: HashMap<String, String> = HashMap::new();

        for (key, raw) in key_values(rows) {
            let key = key.to_ascii_lowercase();

            if TEXT_VARIABLES.contains(&key.as_str()) {
                if let Ok(value) = std::str::from_utf8(raw) {
                    text.insert(key, value.trim().to_string());
                }
                continue;
            }

            let Some(value) = parse_status(raw) else {
                continue;
            };

            let desc = MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, &sanitize_metric_fragment(&key)),
                format!("Generic gauge metric from SHOW GLOBAL VARIABLES ({key})."),
                ValueKind::Gauge,
                &[],
            )
            .shared();
            samples.push(Sample::new(&desc, value, &NO_LABELS)?);
        }

        let get = |name: &str| text.get(name).map(String::as_str).unwrap_or_default();

        samples.push(Sample::new(
            &self.version_info,
            1.0,
            &[get("innodb_version"), get("version"), get("version_comment")],
        )?);

        // MySQL 8.0 renamed tx_isolation
        let level = text
            .get("transaction_isolation")
            .or_else(|| text.get("tx_isolation"));
        if let Some(level) = level {
            samples.push(Sample::new(&self.isolation, 1.0, &[level])?);
        }

        if let Some(cluster) = text.get("wsrep_cluster_name") {
            samples.push(Sample::new(&self.galera_info, 1.0, &[cluster])?);
        }

        if let Some(size) = text
            .get("wsrep_provider_options")
            .map(String::as_str)
            .and_then(gcache_size)
        {
            samples.push(Sample::new(&self.galera_gcache, size, &NO_LABELS)?);
        }

        Ok(samples)
    }
}

/// Extract `gcache.size` from `wsrep_provider_options`, e.g.
/// `base_dir = /var/lib/mysql/; gcache.size = 128M; gcache.page_size = 128M`.
#[must_use]
pub fn gcache_size(options: &str) -> Option<f64> {
    let value = options
        .split(';')
        .filter_map(|option| option.split_once('='))
        .find(|(name, _)| name.trim() == "gcache.size")
        .map(|(_, value)| value.trim())?;

    parse_byte_size(value)
}

/// `128`, `128K`, `128M`, `2G`, `1T` to bytes.
fn parse_byte_size(value: &str) -> Option<f64> {
    let value = value.trim();
    let (number, multiplier) = match value.chars().last()? {
        'K' | 'k' => (value.get(..value.len() - 1)?, 1024.0),
        'M' | 'm' => (value.get(..value.len() - 1)?, 1024.0 * 1024.0),
        'G' | 'g' => (value.get(..value.len() - 1)?, 1024.0 * 1024.0 * 1024.0),
        'T' | 't' => (value.get(..value.len() - 1)?, 1024.0 * 1024.0 * 1024.0 * 1024.0),
        _ => (value, 1.0),
    };
    number.trim().parse::<f64>().ok().map(|n| n * multiplier)
}

impl Scraper for GlobalVariables {
    fn name(&self) -> &'static str {
        "global_variables"
    }

    fn help(&self) -> &'static str {
        "Collect from SHOW GLOBAL VARIABLES"
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let rows = fetch_rows(instance.pool(), GLOBAL_VARIABLES_QUERY).await?;
            let samples = self.samples(&rows)?;
            debug!(rows = rows.len(), samples = samples.len(), "global variables parsed");
            sink.send_all(samples).await?;
            Ok(())
        })
    }
}
