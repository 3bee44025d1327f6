use super::SUBSYSTEM;
use crate::collectors::metric::{MetricError, Sample, ValueKind};
use crate::collectors::query::{DispatchTable, QueryRow, fetch_rows_or_absent};
use crate::collectors::util::NAMESPACE;
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;

const INNODB_CMP_QUERY: &str = r"
    SELECT
        page_size, compress_ops, compress_ops_ok, compress_time, uncompress_ops, uncompress_time
    FROM information_schema.innodb_cmp
";

/// InnoDB compression counters per page size.
pub struct InnodbCmp {
    table: DispatchTable,
}

impl Default for InnodbCmp {
    fn default() -> Self {
        Self::new()
    }
}

impl InnodbCmp {
    #[must_use]
    pub fn new() -> Self {
        let table = DispatchTable::new(NAMESPACE, SUBSYSTEM, &[("page_size", "page_size")])
            .column(
                "compress_ops",
                ValueKind::Counter,
                "innodb_cmp_compress_ops_total",
                "Number of times a B-tree page of the size PAGE_SIZE has been compressed.",
                1.0,
            )
            .column(
                "compress_ops_ok",
                ValueKind::Counter,
                "innodb_cmp_compress_ops_ok_total",
                "Number of times a B-tree page of the size PAGE_SIZE has been successfully compressed.",
                1.0,
            )
            .column(
                "compress_time",
                ValueKind::Counter,
                "innodb_cmp_compress_time_seconds_total",
                "Total time in seconds spent in attempts to compress B-tree pages.",
                1.0,
            )
            .column(
                "uncompress_ops",
                ValueKind::Counter,
                "innodb_cmp_uncompress_ops_total",
                "Number of times a B-tree page of the size PAGE_SIZE has been uncompressed.",
                1.0,
            )
            .column(
                "uncompress_time",
                ValueKind::Counter,
                "innodb_cmp_uncompress_time_seconds_total",
                "Total time in seconds spent in uncompressing B-tree pages.",
                1.0,
            );

        Self { table }
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let mut samples = Vec::new();
        for row in rows {
            samples.extend(self.table.samples_for_row(row)?);
        }
        Ok(samples)
    }
}

impl Scraper for InnodbCmp {
    fn name(&self) -> &'static str {
        "info_schema.innodb_cmp"
    }

    fn help(&self) -> &'static str {
        "Collect metrics from information_schema.innodb_cmp"
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(rows) =
                fetch_rows_or_absent(instance.pool(), INNODB_CMP_QUERY, self.name()).await?
            else {
                return Ok(());
            };
            sink.send_all(self.samples(&rows)?).await?;
            Ok(())
        })
    }
}
