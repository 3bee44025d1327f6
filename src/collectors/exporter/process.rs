use crate::collectors::metric::{MetricDesc, MetricError, NO_LABELS, Sample, ValueKind};
use crate::collectors::util::{EXPORTER, NAMESPACE, fq_name, u64_to_f64};
use crate::collectors::{Instance, MetricSink, Scraper};
use anyhow::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

/// Resource usage of the exporter process.
///
/// Exposes the usual `process_*` family under `mysql_exporter_process_`:
/// CPU seconds (cumulative across cores), RSS, VSZ, threads, open file
/// descriptors and start time. Threads and descriptors are read from
/// `/proc` and only reported on Linux.
pub struct ProcessScraper {
    system: Mutex<System>,
    pid: Pid,
    descs: ProcessDescs,
}

struct ProcessDescs {
    cpu_seconds_total: Arc<MetricDesc>,
    cpu_cores: Arc<MetricDesc>,
    resident_memory_bytes: Arc<MetricDesc>,
    virtual_memory_bytes: Arc<MetricDesc>,
    open_fds: Arc<MetricDesc>,
    threads: Arc<MetricDesc>,
    start_time_seconds: Arc<MetricDesc>,
}

impl ProcessDescs {
    fn new() -> Self {
        let desc = |stem: &str, help: &str, kind: ValueKind| {
            MetricDesc::new(
                fq_name(NAMESPACE, EXPORTER, &format!("process_{stem}")),
                help,
                kind,
                &[],
            )
            .shared()
        };

        Self {
            cpu_seconds_total: desc(
                "cpu_seconds_total",
                "Total user and system CPU time spent in seconds.",
                ValueKind::Counter,
            ),
            cpu_cores: desc(
                "cpu_cores",
                "Number of CPU cores available to the system.",
                ValueKind::Gauge,
            ),
            resident_memory_bytes: desc(
                "resident_memory_bytes",
                "Resident memory size in bytes.",
                ValueKind::Gauge,
            ),
            virtual_memory_bytes: desc(
                "virtual_memory_bytes",
                "Virtual memory size in bytes.",
                ValueKind::Gauge,
            ),
            open_fds: desc(
                "open_fds",
                "Number of open file descriptors.",
                ValueKind::Gauge,
            ),
            threads: desc(
                "threads",
                "Number of OS threads in the process.",
                ValueKind::Gauge,
            ),
            start_time_seconds: desc(
                "start_time_seconds",
                "Start time of the process since unix epoch in seconds.",
                ValueKind::Gauge,
            ),
        }
    }
}

/// One reading of the process counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessStats {
    pub cpu_seconds: f64,
    pub cpu_cores: usize,
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub threads: Option<u64>,
    pub open_fds: Option<u64>,
    pub start_time: u64,
}

impl Default for ProcessScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessScraper {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
            descs: ProcessDescs::new(),
        }
    }

    /// Refresh the process entry and read it. `None` if the OS did not
    /// report the process.
    #[must_use]
    pub fn read_stats(&self) -> Option<ProcessStats> {
        let mut system = self.system.lock();

        system.refresh_cpu_list(sysinfo::CpuRefreshKind::nothing());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );

        let process = system.process(self.pid)?;

        Some(ProcessStats {
            cpu_seconds: u64_to_f64(process.accumulated_cpu_time()) / 1000.0,
            cpu_cores: system.cpus().len().max(1),
            resident_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
            threads: count_proc_entries(self.pid, "task"),
            open_fds: count_proc_entries(self.pid, "fd"),
            start_time: process.start_time(),
        })
    }

    fn samples(&self, stats: &ProcessStats) -> Result<Vec<Sample>, MetricError> {
        let d = &self.descs;
        let mut samples = vec![
            Sample::new(&d.cpu_seconds_total, stats.cpu_seconds, &NO_LABELS)?,
            Sample::new(
                &d.cpu_cores,
                u64_to_f64(stats.cpu_cores as u64),
                &NO_LABELS,
            )?,
            Sample::new(
                &d.resident_memory_bytes,
                u64_to_f64(stats.resident_bytes),
                &NO_LABELS,
            )?,
            Sample::new(
                &d.virtual_memory_bytes,
                u64_to_f64(stats.virtual_bytes),
                &NO_LABELS,
            )?,
            Sample::new(
                &d.start_time_seconds,
                u64_to_f64(stats.start_time),
                &NO_LABELS,
            )?,
        ];

        if let Some(threads) = stats.threads {
            samples.push(Sample::new(&d.threads, u64_to_f64(threads), &NO_LABELS)?);
        }
        if let Some(fds) = stats.open_fds {
            samples.push(Sample::new(&d.open_fds, u64_to_f64(fds), &NO_LABELS)?);
        }

        Ok(samples)
    }
}

#[cfg(target_os = "linux")]
fn count_proc_entries(pid: Pid, dir: &str) -> Option<u64> {
    std::fs::read_dir(format!("/proc/{pid}/{dir}"))
        .ok()
        .map(|entries| entries.count() as u64)
}

#[cfg(not(target_os = "linux"))]
fn count_proc_entries(_pid: Pid, _dir: &str) -> Option<u64> {
    None
}

impl Scraper for ProcessScraper {
    fn name(&self) -> &'static str {
        "exporter.process"
    }

    fn help(&self) -> &'static str {
        "Collect resource usage of the exporter process"
    }

    fn scrape<'a>(
        &'a self,
        _instance: &'a Instance,
        sink: &'a MetricSink,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(stats) = self.read_stats() else {
                debug!(pid = %self.pid, "process not reported by the OS");
                return Ok(());
            };

            debug!(
                rss_mb = stats.resident_bytes / 1024 / 1024,
                vsz_mb = stats.virtual_bytes / 1024 / 1024,
                cpu_seconds_total = stats.cpu_seconds,
                threads = ?stats.threads,
                fds = ?stats.open_fds,
                "collected process metrics"
            );

            for sample in self.samples(&stats)? {
                sink.send(sample).await?;
            }

            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_read_stats() {
        let scraper = ProcessScraper::new();
        let stats = scraper.read_stats().unwrap();

        assert!(stats.resident_bytes > 0);
        assert!(stats.virtual_bytes >= stats.resident_bytes);
        assert!(stats.cpu_cores >= 1);
        assert!(stats.start_time > 0);
        assert!(stats.cpu_seconds >= 0.0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_linux_proc_counts() {
        let stats = ProcessScraper::new().read_stats().unwrap();
        assert!(stats.threads.unwrap() >= 1);
        // stdin, stdout, stderr at minimum
        assert!(stats.open_fds.unwrap() >= 3);
    }

    #[test]
    fn test_samples_from_stats() {
        let scraper = ProcessScraper::new();
        let stats = ProcessStats {
            cpu_seconds: 1.5,
            cpu_cores: 4,
            resident_bytes: 1024,
            virtual_bytes: 4096,
            threads: Some(8),
            open_fds: None,
            start_time: 1_700_000_000,
        };

        let samples = scraper.samples(&stats).unwrap();
        let names: Vec<&str> = samples.iter().map(|s| s.desc().fq_name()).collect();

        assert_eq!(samples.len(), 6);
        assert!(names.contains(&"mysql_exporter_process_cpu_seconds_total"));
        assert!(names.contains(&"mysql_exporter_process_threads"));
        assert!(!names.contains(&"mysql_exporter_process_open_fds"));

        let cpu = samples
            .iter()
            .find(|s| s.desc().fq_name() == "mysql_exporter_process_cpu_seconds_total")
            .unwrap();
        assert_eq!(cpu.desc().kind(), ValueKind::Counter);
        assert!((cpu.value() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_is_always_eligible() {
        let scraper = ProcessScraper::new();
        assert_eq!(scraper.min_version(), crate::collectors::Version::ZERO);
        assert!(scraper.as_configurable().is_none());
    }
}
