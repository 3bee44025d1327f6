//! Scrapers reading `information_schema` tables.

mod innodb_cmp;
mod processlist;
mod query_response_time;
mod tables;

pub use innodb_cmp::InnodbCmp;
pub use processlist::Processlist;
pub use query_response_time::QueryResponseTime;
pub use tables::Tables;

/// Subsystem shared by every scraper in this module.
pub(crate) const SUBSYSTEM: &str = "info_schema";
