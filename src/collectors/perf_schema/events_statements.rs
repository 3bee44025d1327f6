use super::SUBSYSTEM;
use crate::collectors::args::{ArgDefinition, ArgSet, Configurable};
use crate::collectors::metric::{MetricError, Sample, ValueKind};
use crate::collectors::query::{DispatchTable, QueryRow, fetch_rows_or_absent};
use crate::collectors::util::{NAMESPACE, PICO_SECONDS};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;

const EVENTS_STATEMENTS_QUERY: &str = r"
    SELECT
        IFNULL(SCHEMA_NAME, 'NONE') AS SCHEMA_NAME,
        DIGEST,
        LEFT(DIGEST_TEXT, {digest_text_limit}) AS DIGEST_TEXT,
        COUNT_STAR,
        SUM_TIMER_WAIT,
        SUM_ERRORS,
        SUM_WARNINGS,
        SUM_ROWS_AFFECTED,
        SUM_ROWS_SENT,
        SUM_ROWS_EXAMINED,
        SUM_CREATED_TMP_DISK_TABLES,
        SUM_CREATED_TMP_TABLES,
        SUM_SORT_MERGE_PASSES,
        SUM_SORT_ROWS,
        SUM_NO_INDEX_USED
    FROM performance_schema.events_statements_summary_by_digest
    WHERE SCHEMA_NAME NOT IN ('mysql', 'performance_schema', 'information_schema')
        AND LAST_SEEN > DATE_SUB(NOW(), INTERVAL {timelimit} SECOND)
    ORDER BY SUM_TIMER_WAIT DESC
    LIMIT {limit}
";

/// `(column, stem, help, scale)` for every counter of the digest summary.
const COLUMNS: [(&str, &str, &str, f64); 12] = [
    ("COUNT_STAR", "events_statements_total", "The total count of events statements by digest.", 1.0),
    ("SUM_TIMER_WAIT", "events_statements_seconds_total", "The total time of events statements by digest.", PICO_SECONDS),
    ("SUM_ERRORS", "events_statements_errors_total", "The errors of events statements by digest.", 1.0),
    ("SUM_WARNINGS", "events_statements_warnings_total", "The warnings of events statements by digest.", 1.0),
    ("SUM_ROWS_AFFECTED", "events_statements_rows_affected_total", "The total rows affected of events statements by digest.", 1.0),
    ("SUM_ROWS_SENT", "events_statements_rows_sent_total", "The total rows sent of events statements by digest.", 1.0),
    ("SUM_ROWS_EXAMINED", "events_statements_rows_examined_total", "The total rows examined of events statements by digest.", 1.0),
    ("SUM_CREATED_TMP_DISK_TABLES", "events_statements_tmp_disk_tables_total", "The total tmp disk tables of events statements by digest.", 1.0),
    ("SUM_CREATED_TMP_TABLES", "events_statements_tmp_tables_total", "The total tmp tables of events statements by digest.", 1.0),
    ("SUM_SORT_MERGE_PASSES", "events_statements_sort_merge_passes_total", "The total number of merge passes by the sort algorithm performed by digest.", 1.0),
    ("SUM_SORT_ROWS", "events_statements_sort_rows_total", "The total number of sorted rows by digest.", 1.0),
    ("SUM_NO_INDEX_USED", "events_statements_no_index_used_total", "The total number of statements that used full table scans by digest.", 1.0),
];

/// Per-digest statement counters, heaviest first.
pub struct EventsStatements {
    args: ArgSet,
    table: DispatchTable,
}

impl Default for EventsStatements {
    fn default() -> Self {
        Self::new()
    }
}

impl EventsStatements {
    #[must_use]
    pub fn new() -> Self {
        let table = COLUMNS.iter().fold(
            DispatchTable::new(
                NAMESPACE,
                SUBSYSTEM,
                &[
                    ("SCHEMA_NAME", "schema"),
                    ("DIGEST", "digest"),
                    ("DIGEST_TEXT", "digest_text"),
                ],
            ),
            |table, (column, stem, help, scale)| {
                table.column(column, ValueKind::Counter, stem, help, *scale)
            },
        );

        Self {
            args: ArgSet::new(
                "perf_schema.eventsstatements",
                vec![
                    ArgDefinition::int(
                        "limit",
                        "Limit the number of events statements digests by response time",
                        250,
                    ),
                    ArgDefinition::int(
                        "timelimit",
                        "Limit how old the 'last_seen' events statements can be, in seconds",
                        86400,
                    ),
                    ArgDefinition::int(
                        "digest_text_limit",
                        "Maximum length of the normalized statement text",
                        120,
                    ),
                ],
            ),
            table,
        }
    }

    #[must_use]
    pub fn query(&self) -> String {
        let int = |name: &str| self.args.int(name).max(0).to_string();
        EVENTS_STATEMENTS_QUERY
            .replace("{digest_text_limit}", &int("digest_text_limit"))
            .replace("{timelimit}", &int("timelimit"))
            .replace("{limit}", &int("limit"))
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

impl Scraper for EventsStatements {
    fn name(&self) -> &'static str {
        "perf_schema.eventsstatements"
    }

    fn help(&self) -> &'static str {
        "Collect metrics from performance_schema.events_statements_summary_by_digest"
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(&self.args)
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let query = self.query();
            let Some(rows) = fetch_rows_or_absent(instance.pool(), &query, self.name()).await?
            else {
                return Ok(());
            };
            sink.send_all(self.samples(&rows)?).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collectors::args::{Arg, ArgValue};

    #[test]
    fn test_query_uses_args() {
        let scraper = EventsStatements::new();
        let query = scraper.query();
        assert!(query.contains("LEFT(DIGEST_TEXT, 120)"));
        assert!(query.contains("INTERVAL 86400 SECOND"));
        assert!(query.contains("LIMIT 250"));

        scraper
            .as_configurable()
            .unwrap()
            .configure(&[Arg::new("limit", ArgValue::Int(500))])
            .unwrap();
        assert!(scraper.query().contains("LIMIT 500"));
    }

    #[test]
    fn test_digest_row() {
        let mut columns = vec!["SCHEMA_NAME", "DIGEST", "DIGEST_TEXT"];
        columns.extend(COLUMNS.iter().map(|(c, ..)| *c));
        let mut values = vec![
            Some("shop"),
            Some("3e5a1f"),
            Some("SELECT * FROM `orders` WHERE `id` = ?"),
            Some("42"),
            Some("2500000000000"),
        ];
        values.extend(vec![Some("1"); COLUMNS.len() - 2]);

        let row = QueryRow::from_text(&columns, &values);
        let samples = EventsStatements::new().samples(&[row]).unwrap();

        assert_eq!(samples.len(), 12);
        let seconds = samples
            .iter()
            .find(|s| s.desc().fq_name() == "mysql_perf_schema_events_statements_seconds_total")
            .unwrap();
        assert!((seconds.value() - 2.5).abs() < 1e-9);
        assert_eq!(seconds.label("schema"), Some("shop"));
        assert_eq!(seconds.label("digest"), Some("3e5a1f"));
        assert!(samples.iter().all(|s| s.desc().kind() == ValueKind::Counter));
    }
}
