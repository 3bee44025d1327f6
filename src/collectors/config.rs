use crate::collectors::args::Arg;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDRESS: &str = ":9104";
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub const DEFAULT_MY_CNF: &str = "~/.my.cnf";

/// Process-wide exporter options, fixed after command line parsing.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalOptions {
    pub scrape_timeout: Duration,
    /// Subtracted from the Prometheus supplied scrape timeout.
    pub timeout_offset: Duration,
    pub connect_timeout: Duration,
    pub lock_wait_timeout: u64,
    pub log_slow_filter: bool,
    pub max_connections: u32,
    pub listen_address: String,
    pub telemetry_path: String,
    pub my_cnf: PathBuf,
    pub config_file: Option<PathBuf>,
    pub web_config_file: Option<PathBuf>,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            scrape_timeout: Duration::from_secs(10),
            timeout_offset: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(5),
            lock_wait_timeout: 2,
            log_slow_filter: false,
            max_connections: 3,
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
            my_cnf: PathBuf::from(DEFAULT_MY_CNF),
            config_file: None,
            web_config_file: None,
        }
    }
}

impl GlobalOptions {
    /// Effective deadline for one scrape.
    ///
    /// A Prometheus supplied timeout has the offset subtracted; when that
    /// leaves nothing, the supplied value is used as is.
    #[must_use]
    pub fn effective_timeout(&self, prometheus_timeout: Option<f64>) -> Duration {
        let Some(supplied) = prometheus_timeout
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
        else {
            return self.scrape_timeout;
        };

        match supplied.checked_sub(self.timeout_offset) {
            Some(rest) if !rest.is_zero() => rest,
            _ => supplied,
        }
    }
}

/// Result of command line parsing handed to the exporter.
#[derive(Clone, Debug, Default)]
pub struct CollectorConfig {
    pub enabled_collectors: BTreeSet<String>,
    pub arg_overrides: BTreeMap<String, Vec<Arg>>,
    pub options: GlobalOptions,
}

impl CollectorConfig {
    /// Create an empty config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable collectors by name
    #[must_use]
    pub fn with_enabled<I, S>(mut self, collectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_collectors = collectors.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_arg_overrides(mut self, overrides: BTreeMap<String, Vec<Arg>>) -> Self {
        self.arg_overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: GlobalOptions) -> Self {
        self.options = options;
        self
    }

    /// Check if a collector is enabled
    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled_collectors.contains(name)
    }
}
