//! Query primitives shared by the scrapers.
//!
//! Rows are read through the text protocol into [`QueryRow`], a column-name
//! indexed bag of raw bytes, so that scrapers whose result shape depends on
//! the server (`SHOW ... STATUS`, `SELECT *`) do not need typed decoding.
//! Everything that turns rows into samples works on `QueryRow` and is
//! testable without a server.

use crate::collectors::metric::{MetricDesc, MetricError, Sample, ValueKind};
use crate::collectors::util::{fq_name, parse_status, sanitize_metric_fragment, sanitize_query};
use anyhow::Result;
use sqlx::mysql::{MySqlDatabaseError, MySqlPool};
use sqlx::{Column, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info_span};
use tracing_futures::Instrument as _;

/// Server error numbers meaning "this server does not have the feature":
/// missing table, missing privilege, unknown variable or database.
pub const FEATURE_ABSENT_CODES: &[u16] = &[
    1044, // ER_DBACCESS_DENIED_ERROR
    1049, // ER_BAD_DB_ERROR
    1109, // ER_UNKNOWN_TABLE
    1142, // ER_TABLEACCESS_DENIED_ERROR
    1146, // ER_NO_SUCH_TABLE
    1193, // ER_UNKNOWN_SYSTEM_VARIABLE
    1227, // ER_SPECIFIC_ACCESS_DENIED_ERROR
];

/// One result row: column names plus raw (possibly NULL) values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRow {
    columns: Arc<[String]>,
    values: Vec<Option<Vec<u8>>>,
}

impl QueryRow {
    #[must_use]
    pub const fn new(columns: Arc<[String]>, values: Vec<Option<Vec<u8>>>) -> Self {
        Self { columns, values }
    }

    /// Build a row from text values, mostly for tests.
    #[must_use]
    pub fn from_text(columns: &[&str], values: &[Option<&str>]) -> Self {
        Self {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            values: values
                .iter()
                .map(|v| v.map(|s| s.as_bytes().to_vec()))
                .collect(),
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a column, compared case-insensitively.
    #[must_use]
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    #[must_use]
    pub fn bytes(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index).and_then(Option::as_deref)
    }

    #[must_use]
    pub fn str(&self, index: usize) -> Option<&str> {
        self.bytes(index).and_then(|b| std::str::from_utf8(b).ok())
    }

    #[must_use]
    pub fn str_by_name(&self, column: &str) -> Option<&str> {
        self.index_of(column).and_then(|i| self.str(i))
    }

    #[must_use]
    pub fn f64(&self, index: usize) -> Option<f64> {
        self.bytes(index).and_then(parse_status)
    }

    #[must_use]
    pub fn f64_by_name(&self, column: &str) -> Option<f64> {
        self.index_of(column).and_then(|i| self.f64(i))
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&[u8]>)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_deref))
    }
}

/// Run `sql` over the text protocol and collect every row.
///
/// # Errors
///
/// Returns the driver error unchanged so callers can check
/// [`is_feature_absent`].
pub async fn fetch_rows(pool: &MySqlPool, sql: &str) -> Result<Vec<QueryRow>, sqlx::Error> {
    let statement = sanitize_query(sql);
    let operation = statement
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    let span = info_span!(
        "db.query",
        db.system = "mysql",
        db.operation = %operation,
        db.statement = %statement,
        otel.kind = "client"
    );

    let rows = sqlx::raw_sql(sql).fetch_all(pool).instrument(span).await?;

    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    rows.iter()
        .map(|row| {
            let values = (0..columns.len())
                .map(|i| row.try_get_unchecked::<Option<Vec<u8>>, _>(i))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(QueryRow::new(Arc::clone(&columns), values))
        })
        .collect()
}

/// Like [`fetch_rows`] but maps "feature absent" errors to `None`.
///
/// # Errors
///
/// Returns any other driver error.
pub async fn fetch_rows_or_absent(
    pool: &MySqlPool,
    sql: &str,
    scraper: &str,
) -> Result<Option<Vec<QueryRow>>> {
    match fetch_rows(pool, sql).await {
        Ok(rows) => Ok(Some(rows)),
        Err(err) if is_feature_absent(&err) => {
            debug!(scraper, error = %err, "feature not available on this server");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

#[must_use]
pub fn is_feature_absent(err: &sqlx::Error) -> bool {
    error_number(err).is_some_and(|n| FEATURE_ABSENT_CODES.contains(&n))
}

/// MySQL error number of a database error.
#[must_use]
pub fn error_number(err: &sqlx::Error) -> Option<u16> {
    match err {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(MySqlDatabaseError::number),
        _ => None,
    }
}

/// Quote a string literal for inclusion in SQL text.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Quote an identifier with backticks.
#[must_use]
pub fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

/// How one known column is exported.
#[derive(Clone, Debug)]
pub struct ColumnMetric {
    pub desc: Arc<MetricDesc>,
    pub scale: f64,
}

/// Maps column names to descriptors for row-shaped queries.
///
/// Label columns become variable labels on every metric; each other numeric
/// column becomes one sample. Columns without an entry are exported as
/// untyped under `<prefix>_<column>`.
#[derive(Clone, Debug)]
pub struct DispatchTable {
    prefix: String,
    label_columns: Vec<(String, String)>,
    columns: HashMap<String, ColumnMetric>,
}

impl DispatchTable {
    /// `label_columns` are `(column, label)` pairs.
    #[must_use]
    pub fn new(namespace: &str, subsystem: &str, label_columns: &[(&str, &str)]) -> Self {
        Self {
            prefix: fq_name(namespace, subsystem, ""),
            label_columns: label_columns
                .iter()
                .map(|(c, l)| (c.to_ascii_lowercase(), (*l).to_string()))
                .collect(),
            columns: HashMap::new(),
        }
    }

    fn label_names(&self) -> Vec<&str> {
        self.label_columns.iter().map(|(_, l)| l.as_str()).collect()
    }

    /// Register a known column. Values are divided by `scale`.
    #[must_use]
    pub fn column(
        mut self,
        column: &str,
        kind: ValueKind,
        stem: &str,
        help: &str,
        scale: f64,
    ) -> Self {
        let desc = MetricDesc::new(
            format!("{}_{stem}", self.prefix),
            help,
            kind,
            &self.label_names(),
        )
        .shared();
        self.columns
            .insert(column.to_ascii_lowercase(), ColumnMetric { desc, scale });
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&ColumnMetric> {
        self.columns.get(&column.to_ascii_lowercase())
    }

    fn is_label(&self, column: &str) -> bool {
        self.label_columns
            .iter()
            .any(|(c, _)| c.eq_ignore_ascii_case(column))
    }

    /// Turn one row into samples. NULL and non-numeric values are skipped.
    ///
    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples_for_row(&self, row: &QueryRow) -> Result<Vec<Sample>, MetricError> {
        let labels: Vec<&str> = self
            .label_columns
            .iter()
            .map(|(c, _)| row.str_by_name(c).unwrap_or_default())
            .collect();

        let mut samples = Vec::new();

        for (column, raw) in row.iter() {
            if self.is_label(column) {
                continue;
            }
            let Some(value) = raw.and_then(parse_status) else {
                continue;
            };

            let sample = if let Some(metric) = self.get(column) {
                Sample::new(&metric.desc, value / metric.scale, &labels)?
            } else {
                let desc = MetricDesc::new(
                    format!("{}_{}", self.prefix, sanitize_metric_fragment(column)),
                    format!("Generic metric from column {column}."),
                    ValueKind::Untyped,
                    &self.label_names(),
                )
                .shared();
                Sample::new(&desc, value, &labels)?
            };
            samples.push(sample);
        }

        Ok(samples)
    }
}

/// Splits status keys like `Com_select` into a labelled metric.
#[derive(Clone, Debug)]
pub struct LabelRule {
    prefix: &'static str,
    desc: Arc<MetricDesc>,
}

impl LabelRule {
    /// `prefix` is matched case-insensitively and must include the trailing
    /// separator, e.g. `com_`.
    #[must_use]
    pub const fn new(prefix: &'static str, desc: Arc<MetricDesc>) -> Self {
        Self { prefix, desc }
    }

    #[must_use]
    pub const fn desc(&self) -> &Arc<MetricDesc> {
        &self.desc
    }

    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        self.prefix
    }
}

/// Longest matching rule for `key` and the remainder used as label value.
#[must_use]
pub fn match_rule<'r>(rules: &'r [LabelRule], key: &str) -> Option<(&'r LabelRule, String)> {
    let key = key.to_ascii_lowercase();
    rules
        .iter()
        .filter(|rule| key.len() > rule.prefix.len() && key.starts_with(rule.prefix))
        .max_by_key(|rule| rule.prefix.len())
        .and_then(|rule| {
            key.get(rule.prefix.len()..)
                .map(|rest| (rule, rest.to_string()))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_query_row_access() {
        let row = QueryRow::from_text(
            &["TABLE_SCHEMA", "TABLE_NAME", "TABLE_ROWS"],
            &[Some("mysql"), Some("user"), None],
        );
        assert_eq!(row.len(), 3);
        assert_eq!(row.index_of("table_name"), Some(1));
        assert_eq!(row.str_by_name("table_schema"), Some("mysql"));
        assert_eq!(row.f64_by_name("TABLE_ROWS"), None);
        assert_eq!(row.bytes(9), None);
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("abc"), "'abc'");
        assert_eq!(quote_literal("o'neil"), "'o''neil'");
        assert_eq!(quote_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("heartbeat"), "`heartbeat`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_dispatch_table_known_and_unknown_columns() {
        let table = DispatchTable::new("mysql", "info_schema_innodb_cmp", &[("page_size", "page_size")])
            .column(
                "compress_ops",
                ValueKind::Counter,
                "compress_ops_total",
                "Number of times a B-tree page has been compressed.",
                1.0,
            )
            .column(
                "compress_time",
                ValueKind::Counter,
                "compress_time_seconds_total",
                "Total time spent compressing.",
                1.0,
            );

        let row = QueryRow::from_text(
            &["page_size", "compress_ops", "compress_time", "Brand New", "text"],
            &[Some("1024"), Some("10"), Some("20"), Some("5"), Some("abc")],
        );

        let samples = table.samples_for_row(&row).unwrap();
        assert_eq!(samples.len(), 3);

        let names: Vec<&str> = samples.iter().map(|s| s.desc().fq_name()).collect();
        assert_eq!(
            names,
            vec![
                "mysql_info_schema_innodb_cmp_compress_ops_total",
                "mysql_info_schema_innodb_cmp_compress_time_seconds_total",
                "mysql_info_schema_innodb_cmp_brand_new",
            ]
        );
        assert!(samples.iter().all(|s| s.label("page_size") == Some("1024")));
        assert_eq!(samples[2].desc().kind(), ValueKind::Untyped);
    }

    #[test]
    fn test_dispatch_table_scale() {
        let table = DispatchTable::new("mysql", "perf_schema", &[]).column(
            "SUM_TIMER_WAIT",
            ValueKind::Counter,
            "wait_seconds_total",
            "help",
            1e12,
        );
        let row = QueryRow::from_text(&["SUM_TIMER_WAIT"], &[Some("2500000000000")]);
        let samples = table.samples_for_row(&row).unwrap();
        assert!((samples[0].value() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_match_rule_prefers_longest_prefix() {
        let generic = MetricDesc::new("mysql_a", "a", ValueKind::Untyped, &["x"]).shared();
        let specific = MetricDesc::new("mysql_b", "b", ValueKind::Untyped, &["x"]).shared();
        let rules = vec![
            LabelRule::new("innodb_", generic),
            LabelRule::new("innodb_rows_", specific),
        ];

        let (rule, rest) = match_rule(&rules, "Innodb_rows_read").unwrap();
        assert_eq!(rule.desc().fq_name(), "mysql_b");
        assert_eq!(rest, "read");

        let (rule, rest) = match_rule(&rules, "Innodb_page_size").unwrap();
        assert_eq!(rule.desc().fq_name(), "mysql_a");
        assert_eq!(rest, "page_size");

        assert!(match_rule(&rules, "Uptime").is_none());
        assert!(match_rule(&rules, "innodb_").is_none());
    }

    #[test]
    fn test_feature_absent_for_non_database_errors() {
        assert!(!is_feature_absent(&sqlx::Error::RowNotFound));
        assert_eq!(error_number(&sqlx::Error::PoolTimedOut), None);
    }
}
