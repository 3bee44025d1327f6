//! Scrapers reading tables in the `mysql` system schema.

mod innodb_table_stats;

pub use innodb_table_stats::InnodbTableStats;
