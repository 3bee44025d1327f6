use super::SUBSYSTEM;
use crate::collectors::metric::{MetricDesc, MetricError, Sample, ValueKind};
use crate::collectors::query::{QueryRow, fetch_rows_or_absent};
use crate::collectors::util::{NAMESPACE, fq_name};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

const GROUP_MEMBERS_QUERY: &str = "SELECT * FROM performance_schema.replication_group_members";

/// Group replication membership.
///
/// The column set differs between server versions (`MEMBER_ROLE` and
/// `MEMBER_VERSION` appeared in 8.0), so every returned column becomes a
/// label of a constant `1` info metric.
pub struct ReplicationGroupMembers {
    desc: parking_lot::Mutex<Option<Arc<MetricDesc>>>,
}

impl Default for ReplicationGroupMembers {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationGroupMembers {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            desc: parking_lot::Mutex::new(None),
        }
    }

    /// Descriptor for the given label set, rebuilt only when the server's
    /// columns change.
    fn desc(&self, labels: &[String]) -> Arc<MetricDesc> {
        let mut cached = self.desc.lock();
        if let Some(desc) = cached.as_ref().filter(|d| d.variable_labels() == labels) {
            return Arc::clone(desc);
        }

        let names: Vec<&str> = labels.iter().map(String::as_str).collect();
        let desc = MetricDesc::new(
            fq_name(NAMESPACE, SUBSYSTEM, "replication_group_member_info"),
            "Information about the replication group member: channel_name, member_id, member_host, member_port, member_state. (member_role and member_version where available)",
            ValueKind::Gauge,
            &names,
        )
        .shared();
        *cached = Some(Arc::clone(&desc));
        desc
    }

    /// # Errors
    ///
    /// Propagates [`MetricError`] from sample construction.
    pub fn samples(&self, rows: &[QueryRow]) -> Result<Vec<Sample>, MetricError> {
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };

        let labels: Vec<String> = first
            .columns()
            .iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let desc = self.desc(&labels);

        rows.iter()
            .map(|row| {
                let values: Vec<&str> = row
                    .iter()
                    .map(|(_, raw)| raw.and_then(|b| std::str::from_utf8(b).ok()).unwrap_or_default())
                    .collect();
                Sample::new(&desc, 1.0, &values)
            })
            .collect()
    }
}

impl Scraper for ReplicationGroupMembers {
    fn name(&self) -> &'static str {
        "perf_schema.replication_group_members"
    }

    fn help(&self) -> &'static str {
        "Collect metrics from performance_schema.replication_group_members"
    }

    fn scrape<'a>(
        &'a self,
        instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(rows) =
                fetch_rows_or_absent(instance.pool(), GROUP_MEMBERS_QUERY, self.name()).await?
            else {
                return Ok(());
            };
            sink.send_all(self.samples(&rows)?).await?;
            Ok(())
        })
    }
}
