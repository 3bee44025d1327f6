use super::SUBSYSTEM;
use crate::collectors::args::{ArgDefinition, ArgSet, Configurable};
use crate::collectors::metric::{MetricDesc, MetricError, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows_or_absent};
use crate::collectors::util::{NAMESPACE, fq_name};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

const PROCESSLIST_QUERY: &str = r"
    SELECT
        user,
        SUBSTRING_INDEX(host, ':', 1) AS host,
        COALESCE(command, '') AS command,
        COALESCE(state, '') AS state,
        COUNT(*) AS processes,
        SUM(time) AS seconds
    FROM information_schema.processlist
    WHERE ID != connection_id()
        AND TIME >= {min_time}
    GROUP BY user, host, command, state
";

const UNKNOWN: &str = "unknown";

/// Thread counts from `information_schema.processlist`, aggregated by
/// `(command, state)` and optionally by user and client host.
pub struct Processlist {
    args: ArgSet,
    threads: Arc<MetricDesc>,
    seconds: Arc<MetricDesc>,
    by_user: Arc<MetricDesc>,
    by_host: Arc<MetricDesc>,
}

/// One grouped processlist row.
#[derive(Clone, Debug, PartialEq)]
struct ProcessRow<'a> {
    user: &'a str,
    host: &'a str,
    command: &'a str,
    state: &'a str,
    processes: f64,
    seconds: f64,
}

impl<'a> ProcessRow<'a> {
    fn from_row(row: &'a QueryRow) -> Option<Self> {
        Some(Self {
            user: row.str_by_name("user").unwrap_or_default(),
            host: row.str_by_name("host").unwrap_or_default(),
            command: row.str_by_name("command").unwrap_or_default(),
            state: row.str_by_name("state").unwrap_or_default(),
            processes: row.f64_by_name("processes")?,
            seconds: row.f64_by_name("seconds").unwrap_or_default(),
        })
    }
}

/// Lowercase a thread state and make it usable as a label value:
/// punctuation is dropped, spaces and dashes become underscores.
#[must_use]
pub fn sanitize_state(state: &str) -> String {
    if state.is_empty() {
        return UNKNOWN.to_string();
    }

    state
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ';' | ',' | ':' | '.' | '(' | ')'))
        .map(|c| if matches!(c, ' ' | '-') { '_' } else { c })
        .collect()
}

impl Default for Processlist {
    fn default() -> Self {
        Self::new()
    }
}

impl Processlist {
    #[must_use]
    pub fn new() -> Self {
        let gauge = |stem: &str, help: &str, labels: &[&str]| {
            MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, &format!("processlist_{stem}")),
                help,
                ValueKind::Gauge,
                labels,
            )
            .shared()
        };

        Self {
            args: ArgSet::new(
                "info_schema.processlist",
                vec![
                    ArgDefinition::int(
                        "min_time",
                        "Minimum time a thread must be in each state to be counted",
                        0,
                    ),
                    ArgDefinition::bool(
                        "processes_by_user",
                        "Enable collecting the number of processes by user",
                        true,
                    ),
                    ArgDefinition::bool(
                        "processes_by_host",
                        "Enable collecting the number of processes by host",
                        true,
                    ),
                ],
            ),
            threads: gauge(
                "threads",
                "The number of threads split by current state.",
                &["command", "state"],
            ),
            seconds: gauge(
                "seconds",
                "The number of seconds threads have used split by current state.",
                &["command", "state"],
            ),
            by_user: gauge(
                "processes_by_user",
                "The number of processes by user.",
                &["mysql_user"],
            ),
            by_host: gauge(
                "processes_by_host",
                "The number of processes by host.",
                &["client_host"],
            ),
        }
    }

    #[must_use]
    pub fn query(&self) -> String {
        PROCESSLIST_QUERY.replace("{min_time}", &self.args.int("min_time").max(0).to_string())
    }

    /// Aggregate grouped rows. State metrics come first, then hosts, then
    /// users, each sorted by label.
    ///
    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let mut by_state: BTreeMap<(String, String), (f64, f64)> = BTreeMap::new();
        let mut by_host: BTreeMap<String, f64> = BTreeMap::new();
        let mut by_user: BTreeMap<String, f64> = BTreeMap::new();

        for row in rows.iter().filter_map(ProcessRow::from_row) {
            let command = row.command.to_lowercase();
            let state = sanitize_state(row.state);
            let entry = by_state.entry((command, state)).or_default();
            entry.0 += row.processes;
            entry.1 += row.seconds;

            let host = if row.host.is_empty() { UNKNOWN } else { row.host };
            *by_host.entry(host.to_string()).or_default() += row.processes;
            *by_user.entry(row.user.to_string()).or_default() += row.processes;
        }

        let mut samples = Vec::new();

        for ((command, state), (threads, seconds)) in &by_state {
            samples.push(Sample::new(&self.threads, *threads, &[command, state])?);
            samples.push(Sample::new(&self.seconds, *seconds, &[command, state])?);
        }

        if self.args.bool("processes_by_host") {
            for (host, count) in &by_host {
                samples.push(Sample::new(&self.by_host, *count, &[host])?);
            }
        }

        if self.args.bool("processes_by_user") {
            for (user, count) in &by_user {
                samples.push(Sample::new(&self.by_user, *count, &[user])?);
            }
        }

        Ok(samples)
    }
}

impl Scraper for Processlist {
    fn name(&self) -> &'static str {
        "info_schema.processlist"
    }

    fn help(&self) -> &'static str {
        "Collect current thread state counts from the information_schema.processlist"
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

    const COLUMNS: [&str; 6] = ["user", "host", "command", "state", "processes", "seconds"];

    fn row(user: &str, host: &str, command: &str, state: &str, processes: u32, seconds: u32) -> QueryRow {
        let processes = processes.to_string();
        let seconds = seconds.to_string();
        QueryRow::from_text(
            &COLUMNS,
            &[
                Some(user),
                Some(host),
                Some(command),
                Some(state),
                Some(processes.as_str()),
                Some(seconds.as_str()),
            ],
        )
    }

    fn fixture() -> Vec<QueryRow> {
        vec![
            row("manager", "10.0.7.234", "Sleep", "", 10, 87),
            row("feedback", "10.0.7.154", "Sleep", "", 8, 842),
            row("root", "10.0.7.253", "Sleep", "", 1, 20),
            row("feedback", "10.0.7.179", "Sleep", "", 2, 14),
            row("system user", "", "Connect", "waiting for handler commit", 1, 7_271_248),
            row("manager", "10.0.7.234", "Sleep", "", 4, 62),
            row(
                "system user",
                "",
                "Query",
                "Slave has read all relay log; waiting for more updates",
                1,
                7_271_248,
            ),
            row("event_scheduler", "localhost", "Daemon", "Waiting on empty queue", 1, 7_271_248),
        ]
    }

    fn flatten(samples: &[Sample]) -> Vec<(String, Vec<String>, f64)> {
        samples
            .iter()
            .map(|s| {
                (
                    s.desc().fq_name().to_string(),
                    s.label_values().to_vec(),
                    s.value(),
                )
            })
            .collect()
    }

    fn expect(name: &str, labels: &[&str], value: f64) -> (String, Vec<String>, f64) {
        (
            format!("mysql_info_schema_processlist_{name}"),
            labels.iter().map(|l| (*l).to_string()).collect(),
            value,
        )
    }

    #[test]
    fn test_processlist_aggregation() {
        let scraper = Processlist::new();
        let samples = scraper.samples(&fixture()).unwrap();

        let expected = vec![
            expect("threads", &["connect", "waiting_for_handler_commit"], 1.0),
            expect("seconds", &["connect", "waiting_for_handler_commit"], 7_271_248.0),
            expect("threads", &["daemon", "waiting_on_empty_queue"], 1.0),
            expect("seconds", &["daemon", "waiting_on_empty_queue"], 7_271_248.0),
            expect(
                "threads",
                &["query", "slave_has_read_all_relay_log_waiting_for_more_updates"],
                1.0,
            ),
            expect(
                "seconds",
                &["query", "slave_has_read_all_relay_log_waiting_for_more_updates"],
                7_271_248.0,
            ),
            expect("threads", &["sleep", "unknown"], 25.0),
            expect("seconds", &["sleep", "unknown"], 1025.0),
            expect("processes_by_host", &["10.0.7.154"], 8.0),
            expect("processes_by_host", &["10.0.7.179"], 2.0),
            expect("processes_by_host", &["10.0.7.234"], 14.0),
            expect("processes_by_host", &["10.0.7.253"], 1.0),
            expect("processes_by_host", &["localhost"], 1.0),
            expect("processes_by_host", &["unknown"], 2.0),
            expect("processes_by_user", &["event_scheduler"], 1.0),
            expect("processes_by_user", &["feedback"], 10.0),
            expect("processes_by_user", &["manager"], 14.0),
            expect("processes_by_user", &["root"], 1.0),
            expect("processes_by_user", &["system user"], 2.0),
        ];

        assert_eq!(samples.len(), 19);
        assert_eq!(flatten(&samples), expected);
        assert!(samples.iter().all(|s| s.desc().kind() == ValueKind::Gauge));
    }

    #[test]
    fn test_processlist_by_user_and_host_disabled() {
        let scraper = Processlist::new();
        scraper
            .args
            .configure(&[
                Arg::new("processes_by_user", ArgValue::Bool(false)),
                Arg::new("processes_by_host", ArgValue::Bool(false)),
            ])
            .unwrap();

        let samples = scraper.samples(&fixture()).unwrap();
        assert_eq!(samples.len(), 8);
    }

    #[test]
    fn test_processlist_query_min_time() {
        let scraper = Processlist::new();
        assert!(scraper.query().contains("TIME >= 0"));

        scraper
            .args
            .configure(&[Arg::new("min_time", ArgValue::Int(30))])
            .unwrap();
        assert!(scraper.query().contains("TIME >= 30"));
    }

    #[test]
    fn test_sanitize_state() {
        assert_eq!(sanitize_state(""), "unknown");
        assert_eq!(sanitize_state("Sending data"), "sending_data");
        assert_eq!(
            sanitize_state("Waiting for table metadata lock"),
            "waiting_for_table_metadata_lock"
        );
        assert_eq!(sanitize_state("init (2)"), "init_2");
        assert_eq!(sanitize_state("creating sort-index."), "creating_sort_index");
    }
}
