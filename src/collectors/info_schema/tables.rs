use super::SUBSYSTEM;
use crate::collectors::args::{ArgDefinition, ArgSet, Configurable};
use crate::collectors::metric::{MetricDesc, MetricError, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows_or_absent, quote_literal};
use crate::collectors::util::{NAMESPACE, fq_name};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

const TABLES_QUERY: &str = r"
    SELECT
        TABLE_SCHEMA,
        TABLE_NAME,
        TABLE_TYPE,
        IFNULL(ENGINE, 'NONE') AS ENGINE,
        IFNULL(VERSION, '0') AS VERSION,
        IFNULL(ROW_FORMAT, 'NONE') AS ROW_FORMAT,
        IFNULL(TABLE_ROWS, '0') AS TABLE_ROWS,
        IFNULL(DATA_LENGTH, '0') AS DATA_LENGTH,
        IFNULL(INDEX_LENGTH, '0') AS INDEX_LENGTH,
        IFNULL(DATA_FREE, '0') AS DATA_FREE,
        IFNULL(CREATE_OPTIONS, 'NONE') AS CREATE_OPTIONS
    FROM information_schema.tables
";

const SIZE_COMPONENTS: [(&str, &str); 3] = [
    ("DATA_LENGTH", "data_length"),
    ("INDEX_LENGTH", "index_length"),
    ("DATA_FREE", "data_free"),
];

/// Table sizes and row estimates from `information_schema.tables`.
pub struct Tables {
    args: ArgSet,
    version: Arc<MetricDesc>,
    rows: Arc<MetricDesc>,
    size: Arc<MetricDesc>,
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

impl Tables {
    #[must_use]
    pub fn new() -> Self {
        Self {
            args: ArgSet::new(
                "info_schema.tables",
                vec![ArgDefinition::string(
                    "databases",
                    "The list of databases to collect table stats for, or '*' for all",
                    "*",
                )],
            ),
            version: MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, "table_version"),
                "The version number of the table's .frm file.",
                ValueKind::Gauge,
                &[
                    "schema",
                    "table",
                    "type",
                    "engine",
                    "row_format",
                    "create_options",
                ],
            )
            .shared(),
            rows: MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, "table_rows"),
                "The estimated number of rows in the table from information_schema.tables.",
                ValueKind::Gauge,
                &["schema", "table"],
            )
            .shared(),
            size: MetricDesc::new(
                fq_name(NAMESPACE, SUBSYSTEM, "table_size"),
                "The size of the table components from information_schema.tables.",
                ValueKind::Gauge,
                &["schema", "table", "component"],
            )
            .shared(),
        }
    }

    /// `*` selects every database except the virtual schemas.
    #[must_use]
    pub fn query(&self) -> String {
        let databases = self.args.string("databases");
        let filter = if databases.trim() == "*" {
            "WHERE TABLE_SCHEMA NOT IN ('information_schema', 'performance_schema')".to_string()
        } else {
            let list: Vec<String> = databases
                .split(',')
                .map(str::trim)
                .filter(|db| !db.is_empty())
                .map(quote_literal)
                .collect();
            format!("WHERE TABLE_SCHEMA IN ({})", list.join(", "))
        };
        format!("{TABLES_QUERY} {filter}")
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let mut samples = Vec::new();

        for row in rows {
            let text = |column: &str| row.str_by_name(column).unwrap_or_default();
            let (schema, table) = (text("TABLE_SCHEMA"), text("TABLE_NAME"));

            if let Some(version) = row.f64_by_name("VERSION") {
                samples.push(Sample::new(
                    &self.version,
                    version,
                    &[
                        schema,
                        table,
                        text("TABLE_TYPE"),
                        text("ENGINE"),
                        text("ROW_FORMAT"),
                        text("CREATE_OPTIONS"),
                    ],
                )?);
            }

            if let Some(rows) = row.f64_by_name("TABLE_ROWS") {
                samples.push(Sample::new(&self.rows, rows, &[schema, table])?);
            }

            for (column, component) in SIZE_COMPONENTS {
                if let Some(bytes) = row.f64_by_name(column) {
                    samples.push(Sample::new(&self.size, bytes, &[schema, table, component])?);
                }
            }
        }

        Ok(samples)
    }
}

impl Scraper for Tables {
    fn name(&self) -> &'static str {
        "info_schema.tables"
    }

    fn help(&self) -> &'static str {
        "Collect metrics from information_schema.tables"
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
    fn test_query_filters() {
        let scraper = Tables::new();
        assert!(scraper.query().ends_with(
            "WHERE TABLE_SCHEMA NOT IN ('information_schema', 'performance_schema')"
        ));

        scraper
            .args
            .configure(&[Arg::new("databases", ArgValue::String("shop, o'neil".into()))])
            .unwrap();
        assert!(
            scraper
                .query()
                .ends_with("WHERE TABLE_SCHEMA IN ('shop', 'o''neil')")
        );
    }

    #[test]
    fn test_table_samples() {
        let row = QueryRow::from_text(
            &[
                "TABLE_SCHEMA",
                "TABLE_NAME",
                "TABLE_TYPE",
                "ENGINE",
                "VERSION",
                "ROW_FORMAT",
                "TABLE_ROWS",
                "DATA_LENGTH",
                "INDEX_LENGTH",
                "DATA_FREE",
                "CREATE_OPTIONS",
            ],
            &[
                Some("shop"),
                Some("orders"),
                Some("BASE TABLE"),
                Some("InnoDB"),
                Some("10"),
                Some("Dynamic"),
                Some("1200"),
                Some("16384"),
                Some("8192"),
                Some("0"),
                Some(""),
            ],
        );

        let samples = Tables::new().samples(&[row]).unwrap();
        assert_eq!(samples.len(), 5);

        let version = samples.first().unwrap();
        assert_eq!(version.desc().fq_name(), "mysql_info_schema_table_version");
        assert_eq!(version.label("engine"), Some("InnoDB"));

        let index = samples
            .iter()
            .find(|s| s.label("component") == Some("index_length"))
            .unwrap();
        assert!((index.value() - 8192.0).abs() < f64::EPSILON);
        assert_eq!(index.label("table"), Some("orders"));
    }
}
