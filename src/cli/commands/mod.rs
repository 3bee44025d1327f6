use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

mod collectors;

pub use self::collectors::add_scraper_args;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Global flags. Per-scraper flags are added by [`add_scraper_args`].
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("mysqld_exporter")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(built_info::GIT_COMMIT_HASH.unwrap_or(env!("CARGO_PKG_VERSION")))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("web.listen-address")
                .long("web.listen-address")
                .help("Address on which to expose metrics and web interface")
                .default_value(":9104")
                .env("MYSQLD_EXPORTER_LISTEN_ADDRESS")
                .value_name("ADDRESS"),
        )
        .arg(
            Arg::new("web.telemetry-path")
                .long("web.telemetry-path")
                .help("Path under which to expose metrics")
                .default_value("/metrics")
                .env("MYSQLD_EXPORTER_TELEMETRY_PATH")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("web.config-file")
                .long("web.config-file")
                .help("Path to a web configuration file with basic auth users and response headers (TLS is not supported)")
                .env("MYSQLD_EXPORTER_WEB_CONFIG_FILE")
                .value_name("FILE")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("config.my-cnf")
                .long("config.my-cnf")
                .help("Path to .my.cnf file to read MySQL credentials from")
                .default_value("~/.my.cnf")
                .env("MYSQLD_EXPORTER_MY_CNF")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("config.file")
                .long("config.file")
                .help("Path to a YAML file describing named instances for multi-target scraping")
                .env("MYSQLD_EXPORTER_CONFIG_FILE")
                .value_name("FILE")
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("dsn")
                .long("dsn")
                .help("MySQL connection string, overrides the credentials of --config.my-cnf")
                .env("MYSQLD_EXPORTER_DSN")
                .hide_env_values(true)
                .value_name("DSN"),
        )
        .arg(
            Arg::new("scrape-timeout")
                .long("scrape-timeout")
                .help("Scrape deadline in seconds when Prometheus does not send one")
                .default_value("10")
                .env("MYSQLD_EXPORTER_SCRAPE_TIMEOUT")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new("timeout-offset")
                .long("timeout-offset")
                .help("Seconds subtracted from the Prometheus scrape timeout")
                .default_value("0.25")
                .env("MYSQLD_EXPORTER_TIMEOUT_OFFSET")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .help("Seconds to wait for a database connection")
                .default_value("5")
                .env("MYSQLD_EXPORTER_CONNECT_TIMEOUT")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new("exporter.lock_wait_timeout")
                .long("exporter.lock_wait_timeout")
                .help("Set a lock_wait_timeout (in seconds) on the connection to avoid long metadata locking")
                .default_value("2")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("exporter.log_slow_filter")
                .long("exporter.log_slow_filter")
                .help("Add a log_slow_filter to avoid slow query logging of scrapes (MariaDB and Percona only)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("exporter.max-connections")
                .long("exporter.max-connections")
                .help("Maximum number of open connections to the database per instance")
                .default_value("3")
                .env("MYSQLD_EXPORTER_MAX_CONNECTIONS")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("log.format")
                .long("log.format")
                .help("Output format of log messages")
                .default_value("text")
                .env("MYSQLD_EXPORTER_LOG_FORMAT")
                .value_parser(["text", "json"]),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity, -vv for debug")
                .action(ArgAction::Count),
        )
}
