use anyhow::Result;
use futures::future::BoxFuture;

#[macro_use]
mod register_macro;

pub mod args;
pub mod config;
pub mod exporter;
pub mod instance;
pub mod metric;
pub mod query;
pub mod registry;
pub mod util;

pub mod global;
pub mod info_schema;
pub mod mysql;
pub mod perf_schema;
pub mod replication;

pub use args::{Arg, ArgDefinition, ArgKind, ArgValue, Configurable};
pub use instance::{Instance, Version};
pub use metric::{MetricDesc, MetricSink, Sample, ValueKind};
pub use registry::ScraperRegistry;

/// One collector: a bounded set of related metrics read from the server.
///
/// Implementations are shared between concurrent scrapes and must not keep
/// per-scrape state. `scrape` is cancelled by dropping its future, which also
/// aborts any in-flight query.
pub trait Scraper: Send + Sync {
    /// Stable identifier, e.g. `info_schema.processlist`.
    fn name(&self) -> &'static str;

    fn help(&self) -> &'static str;

    /// Lowest server version the scraper works with.
    fn min_version(&self) -> Version {
        Version::ZERO
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        None
    }

    /// Write samples into `sink`. Must never close the sink.
    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>>;
}

// THIS IS THE ONLY PLACE YOU NEED TO ADD NEW SCRAPERS
register_scrapers! {
    global::GlobalStatus => true,
    global::GlobalVariables => true,
    global::BinlogSize => false,
    replication::SlaveStatus => true,
    replication::Heartbeat => false,
    info_schema::Processlist => false,
    info_schema::Tables => false,
    info_schema::InnodbCmp => true,
    info_schema::QueryResponseTime => true,
    mysql::InnodbTableStats => false,
    perf_schema::EventsStatements => false,
    perf_schema::FileEvents => false,
    perf_schema::ReplicationGroupMembers => false,
    exporter::ProcessScraper => true,
    exporter::RuntimeScraper => true,
}
