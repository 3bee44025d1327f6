use super::SUBSYSTEM;
use crate::collectors::metric::{MetricDesc, MetricError, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows_or_absent};
use crate::collectors::util::{NAMESPACE, PICO_SECONDS, fq_name};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

const FILE_EVENTS_QUERY: &str = r"
    SELECT
        EVENT_NAME,
        COUNT_READ, SUM_TIMER_READ, SUM_NUMBER_OF_BYTES_READ,
        COUNT_WRITE, SUM_TIMER_WRITE, SUM_NUMBER_OF_BYTES_WRITE,
        COUNT_MISC, SUM_TIMER_MISC
    FROM performance_schema.file_summary_by_event_name
";

/// `(mode, count column, timer column, bytes column)`; misc operations
/// transfer no data.
const MODES: [(&str, &str, &str, Option<&str>); 3] = [
    ("read", "COUNT_READ", "SUM_TIMER_READ", Some("SUM_NUMBER_OF_BYTES_READ")),
    ("write", "COUNT_WRITE", "SUM_TIMER_WRITE", Some("SUM_NUMBER_OF_BYTES_WRITE")),
    ("misc", "COUNT_MISC", "SUM_TIMER_MISC", None),
];

/// File I/O by instrument and operation mode.
pub struct FileEvents {
    events: Arc<MetricDesc>,
    seconds: Arc<MetricDesc>,
    bytes: Arc<MetricDesc>,
}

impl Default for FileEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl FileEvents {
    #[must_use]
    pub fn new() -> Self {
        let counter = |stem: &str, help: &str| {
            MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, stem),
                help,
                ValueKind::Counter,
                &["event_name", "mode"],
            )
            .shared()
        };

        Self {
            events: counter("file_events_total", "The total file events by event name/mode."),
            seconds: counter(
                "file_events_seconds_total",
                "The total seconds of file events by event name/mode.",
            ),
            bytes: counter(
                "file_events_bytes_total",
                "The total bytes of file events by event name/mode.",
            ),
        }
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let mut samples = Vec::new();

        for row in rows {
            let Some(event) = row.str_by_name("EVENT_NAME") else {
                continue;
            };

            for (mode, count, timer, bytes) in MODES {
                let labels = [event, mode];
                if let Some(value) = row.f64_by_name(count) {
                    samples.push(Sample::new(&self.events, value, &labels)?);
                }
                if let Some(value) = row.f64_by_name(timer) {
                    samples.push(Sample::new(&self.seconds, value / PICO_SECONDS, &labels)?);
                }
                if let Some(value) = bytes.and_then(|column| row.f64_by_name(column)) {
                    samples.push(Sample::new(&self.bytes, value, &labels)?);
                }
            }
        }

        Ok(samples)
    }
}

impl Scraper for FileEvents {
    fn name(&self) -> &'static str {
        "perf_schema.file_events"
    }

    fn help(&self) -> &'static str {
        "Collect metrics from performance_schema.file_summary_by_event_name"
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(rows) =
                fetch_rows_or_absent(instance.pool(), FILE_EVENTS_QUERY, self.name()).await?
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

    #[test]
    fn test_file_event_modes() {
        let row = QueryRow::from_text(
            &[
                "EVENT_NAME",
                "COUNT_READ",
                "SUM_TIMER_READ",
                "SUM_NUMBER_OF_BYTES_READ",
                "COUNT_WRITE",
                "SUM_TIMER_WRITE",
                "SUM_NUMBER_OF_BYTES_WRITE",
                "COUNT_MISC",
                "SUM_TIMER_MISC",
            ],
            &[
                Some("wait/io/file/innodb/innodb_data_file"),
                Some("3"),
                Some("1000000000000"),
                Some("49152"),
                Some("5"),
                Some("2000000000000"),
                Some("81920"),
                Some("7"),
                Some("500000000000"),
            ],
        );

        let samples = FileEvents::new().samples(&[row]).unwrap();
        assert_eq!(samples.len(), 8);

        let find = |name: &str, mode: &str| {
            samples
                .iter()
                .find(|s| s.desc().fq_name() == name && s.label("mode") == Some(mode))
                .map(Sample::value)
        };

        assert_eq!(find("mysql_perf_schema_file_events_total", "misc"), Some(7.0));
        assert_eq!(
            find("mysql_perf_schema_file_events_seconds_total", "write"),
            Some(2.0)
        );
        assert_eq!(
            find("mysql_perf_schema_file_events_bytes_total", "read"),
            Some(49152.0)
        );
        assert_eq!(find("mysql_perf_schema_file_events_bytes_total", "misc"), None);
    }
}
