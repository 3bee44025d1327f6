//! Scrapers reading `performance_schema` summary tables.

mod events_statements;
mod file_events;
mod replication_group_members;

pub use events_statements::EventsStatements;
pub use file_events::FileEvents;
pub use replication_group_members::ReplicationGroupMembers;

pub(crate) const SUBSYSTEM: &str = "perf_schema";
