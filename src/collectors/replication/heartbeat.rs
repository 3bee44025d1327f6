use crate::collectors::args::{ArgDefinition, ArgSet, Configurable};
use crate::collectors::metric::{MetricDesc, MetricError, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows_or_absent, quote_identifier};
use crate::collectors::util::{NAMESPACE, fq_name};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

const SUBSYSTEM: &str = "heartbeat";

/// Replication lag from a pt-heartbeat style table.
///
/// Reads the last stored heartbeat timestamp and the server's current time;
/// the difference is the delay behind the writer.
pub struct Heartbeat {
    args: ArgSet,
    stored: Arc<MetricDesc>,
    now: Arc<MetricDesc>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    #[must_use]
    pub fn new() -> Self {
        let gauge = |stem: &str, help: &str| {
            MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, stem),
                help,
                ValueKind::Gauge,
                &["server_id"],
            )
            .shared()
        };

        Self {
            args: ArgSet::new(
                "heartbeat",
                vec![
                    ArgDefinition::string(
                        "database",
                        "Database from where to collect heartbeat data",
                        "heartbeat",
                    ),
                    ArgDefinition::string(
                        "table",
                        "Table from where to collect heartbeat data",
                        "heartbeat",
                    ),
                    ArgDefinition::bool("utc", "Use UTC for timestamps of the current server", false),
                ],
            ),
            stored: gauge(
                "stored_timestamp_seconds",
                "Timestamp stored in the heartbeat table.",
            ),
            now: gauge("now_timestamp_seconds", "Timestamp of the current server."),
        }
    }

    /// Query for the configured database and table.
    #[must_use]
    pub fn query(&self) -> String {
        let now = if self.args.bool("utc") {
            "UTC_TIMESTAMP(6)"
        } else {
            "NOW(6)"
        };
        format!(
            "SELECT UNIX_TIMESTAMP(ts), UNIX_TIMESTAMP({now}), server_id FROM {}.{}",
            quote_identifier(&self.args.string("database")),
            quote_identifier(&self.args.string("table")),
        )
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let mut samples = Vec::new();

        for row in rows {
            let (Some(stored), Some(now), Some(server_id)) = (row.f64(0), row.f64(1), row.str(2))
            else {
                continue;
            };
            samples.push(Sample::new(&self.stored, stored, &[server_id])?);
            samples.push(Sample::new(&self.now, now, &[server_id])?);
        }

        Ok(samples)
    }
}

impl Scraper for Heartbeat {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn help(&self) -> &'static str {
        "Collect from heartbeat"
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
    fn test_default_query() {
        let scraper = Heartbeat::new();
        assert_eq!(
            scraper.query(),
            "SELECT UNIX_TIMESTAMP(ts), UNIX_TIMESTAMP(NOW(6)), server_id FROM `heartbeat`.`heartbeat`"
        );
    }

    #[test]
    fn test_configured_query() {
        let scraper = Heartbeat::new();
        scraper
            .as_configurable()
            .unwrap()
            .configure(&[
                Arg::new("database", ArgValue::String("ops".into())),
                Arg::new("table", ArgValue::String("pt`hb".into())),
                Arg::new("utc", ArgValue::Bool(true)),
            ])
            .unwrap();

        assert_eq!(
            scraper.query(),
            "SELECT UNIX_TIMESTAMP(ts), UNIX_TIMESTAMP(UTC_TIMESTAMP(6)), server_id FROM `ops`.`pt``hb`"
        );
    }

    #[test]
    fn test_heartbeat_samples() {
        let row = QueryRow::from_text(
            &["UNIX_TIMESTAMP(ts)", "UNIX_TIMESTAMP(NOW(6))", "server_id"],
            &[Some("1487597613.001320"), Some("1487598113.448042"), Some("1")],
        );
        let samples = Heartbeat::new().samples(&[row]).unwrap();

        assert_eq!(samples.len(), 2);
        let stored = samples.first().unwrap();
        assert_eq!(stored.desc().fq_name(), "mysql_heartbeat_stored_timestamp_seconds");
        assert_eq!(stored.label("server_id"), Some("1"));
        assert!((stored.value() - 1_487_597_613.001_32).abs() < 1e-6);
    }
}
