use crate::{
    cli::actions::Action,
    collectors::{
        config::{DEFAULT_LISTEN_ADDRESS, DEFAULT_MY_CNF, DEFAULT_TELEMETRY_PATH, GlobalOptions},
        registry::ScraperRegistry,
    },
    exporter::web_config::WebConfig,
};
use anyhow::{Result, anyhow};
use clap::ArgMatches;
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Turn parsed matches into the run action. Completes the registry
/// lifecycle: scraper flags are applied and the registry becomes ready.
///
/// # Errors
///
/// Returns an error for invalid durations, a missing or invalid
/// `--web.config-file`, or scraper arguments the scraper rejects.
pub fn handler(matches: &ArgMatches, registry: Arc<ScraperRegistry>) -> Result<Action> {
    let options = global_options(matches)?;

    let web_config = options
        .web_config_file
        .as_deref()
        .map(WebConfig::load)
        .transpose()?;

    if !options.telemetry_path.starts_with('/') || options.telemetry_path == "/health" {
        return Err(anyhow!(
            "invalid telemetry path {:?}: must start with '/' and not be /health",
            options.telemetry_path
        ));
    }

    let config = registry.on_parsed(matches)?.with_options(options);

    info!(
        enabled = config.enabled_collectors.len(),
        "scraper flags applied"
    );

    let dsn = matches
        .get_one::<String>("dsn")
        .filter(|s| !s.trim().is_empty())
        .map(|s| SecretString::from(s.clone()));

    Ok(Action::Run {
        config,
        dsn,
        web_config,
        registry,
    })
}

fn seconds(matches: &ArgMatches, id: &str) -> Result<Option<Duration>> {
    matches
        .get_one::<f64>(id)
        .map(|s| {
            Duration::try_from_secs_f64(*s)
                .map_err(|err| anyhow!("invalid duration for --{id}: {s} ({err})"))
        })
        .transpose()
}

/// Collect the exporter-wide options.
///
/// # Errors
///
/// Returns an error for negative or non-finite durations.
pub fn global_options(matches: &ArgMatches) -> Result<GlobalOptions> {
    let defaults = GlobalOptions::default();

    Ok(GlobalOptions {
        scrape_timeout: seconds(matches, "scrape-timeout")?.unwrap_or(defaults.scrape_timeout),
        timeout_offset: seconds(matches, "timeout-offset")?.unwrap_or(defaults.timeout_offset),
        connect_timeout: seconds(matches, "connect-timeout")?
            .unwrap_or(defaults.connect_timeout),
        lock_wait_timeout: matches
            .get_one::<u64>("exporter.lock_wait_timeout")
            .copied()
            .unwrap_or(defaults.lock_wait_timeout),
        log_slow_filter: matches.get_flag("exporter.log_slow_filter"),
        max_connections: matches
            .get_one::<u32>("exporter.max-connections")
            .copied()
            .unwrap_or(defaults.max_connections),
        listen_address: matches
            .get_one::<String>("web.listen-address")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string()),
        telemetry_path: matches
            .get_one::<String>("web.telemetry-path")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TELEMETRY_PATH.to_string()),
        my_cnf: PathBuf::from(
            matches
                .get_one::<String>("config.my-cnf")
                .map_or(DEFAULT_MY_CNF, String::as_str),
        ),
        config_file: matches.get_one::<PathBuf>("config.file").cloned(),
        web_config_file: matches.get_one::<PathBuf>("web.config-file").cloned(),
    })
}
