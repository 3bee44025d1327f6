use crate::collectors::metric::{MetricError, Sample, ValueKind};
use crate::collectors::query::{DispatchTable, QueryRow, fetch_rows_or_absent};
use crate::collectors::util::NAMESPACE;
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;

const INNODB_TABLE_STATS_QUERY: &str = r"
    SELECT
        database_name, table_name, n_rows, clustered_index_size, sum_of_other_index_sizes
    FROM mysql.innodb_table_stats
";

/// Persistent InnoDB optimizer statistics, one set of gauges per table.
pub struct InnodbTableStats {
    table: DispatchTable,
}

impl Default for InnodbTableStats {
    fn default() -> Self {
        Self::new()
    }
}

impl InnodbTableStats {
    #[must_use]
    pub fn new() -> Self {
        let table = DispatchTable::new(
            NAMESPACE,
            "innodb_table_stats",
            &[("database_name", "database_name"), ("table_name", "table_name")],
        )
        .column(
            "n_rows",
            ValueKind::Gauge,
            "n_rows",
            "Number of rows in the table.",
            1.0,
        )
        .column(
            "clustered_index_size",
            ValueKind::Gauge,
            "clustered_index_size",
            "The size of the primary index, in pages.",
            1.0,
        )
        .column(
            "sum_of_other_index_sizes",
            ValueKind::Gauge,
            "sum_of_other_index_sizes",
            "The total size of other (non-primary) indexes, in pages.",
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

impl Scraper for InnodbTableStats {
    fn name(&self) -> &'static str {
        "mysql.innodb_table_stats"
    }

    fn help(&self) -> &'static str {
        "Collect table statistics from mysql.innodb_table_stats"
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(rows) =
                fetch_rows_or_absent(instance.pool(), INNODB_TABLE_STATS_QUERY, self.name())
                    .await?
            else {
                return Ok(());
            };
            sink.send_all(self.samples(&rows)?).await?;
            Ok(())
        })
    }
}
