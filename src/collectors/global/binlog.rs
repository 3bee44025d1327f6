use crate::collectors::metric::{MetricDesc, MetricError, NO_LABELS, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows, fetch_rows_or_absent};
use crate::collectors::util::{NAMESPACE, fq_name, u64_to_f64};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

const LOG_BIN_QUERY: &str = "SELECT @@log_bin";
const BINLOG_QUERY: &str = "SHOW BINARY LOGS";
const SUBSYSTEM: &str = "binlog";

/// Size and count of binary log files.
pub struct BinlogSize {
    size: Arc<MetricDesc>,
    files: Arc<MetricDesc>,
    file_number: Arc<MetricDesc>,
}

impl Default for BinlogSize {
    fn default() -> Self {
        Self::new()
    }
}

impl BinlogSize {
    #[must_use]
    pub fn new() -> Self {
        let gauge = |stem: &str, help: &str| {
            MetricDesc::new(fq_name(NAMESPACE, SUBSYSTEM, stem), help, ValueKind::Gauge, &[])
                .shared()
        };

        Self {
            size: gauge("size_bytes", "Combined size of all registered binlog files."),
            files: gauge("files", "Number of registered binlog files."),
            file_number: gauge("file_number", "The last binlog file number."),
        }
    }

    /// Rows of `SHOW BINARY LOGS`: `Log_name`, `File_size` and, on newer
    /// servers, `Encrypted`.
    ///
    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let size: f64 = rows.iter().filter_map(|row| row.f64(1)).sum();

        let mut samples = vec![
            Sample::new(&self.size, size, &NO_LABELS)?,
            Sample::new(&self.files, u64_to_f64(rows.len() as u64), &NO_LABELS)?,
        ];

        if let Some(number) = rows
            .last()
            .and_then(|row| row.str(0))
            .and_then(file_number)
        {
            samples.push(Sample::new(&self.file_number, number, &NO_LABELS)?);
        }

        Ok(samples)
    }
}

/// Numeric extension of a binlog file name, `mysql-bin.000042` is 42.
fn file_number(log_name: &str) -> Option<f64> {
    log_name
        .rsplit_once('.')
        .and_then(|(_, ext)| ext.parse::<f64>().ok())
}

impl Scraper for BinlogSize {
    fn name(&self) -> &'static str {
        "binlog_size"
    }

    fn help(&self) -> &'static str {
        "Collect the current size of all registered binlog files"
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let log_bin = fetch_rows(instance.pool(), LOG_BIN_QUERY).await?;
            let enabled = log_bin
                .first()
                .and_then(|row| row.f64(0))
                .is_some_and(|v| v > 0.0);
            if !enabled {
                debug!("binary logging disabled");
                return Ok(());
            }

            let Some(rows) = fetch_rows_or_absent(instance.pool(), BINLOG_QUERY, self.name()).await?
            else {
                return Ok(());
            };

            sink.send_all(self.samples(&rows)?).await?;
            Ok(())
        })
    }
}
