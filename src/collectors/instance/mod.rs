//! Connection-bearing handle to one MySQL-compatible server.
//!
//! An [`Instance`] pairs a pool with the server flavor and version, which are
//! discovered once per pool and cached. The [`Connector`] trait is the seam
//! between the orchestrator and the database: [`InstanceFactory`] is the real
//! implementation backed by sqlx, tests provide their own.

pub mod mycnf;
pub mod targets;

use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, info_span};
use tracing_futures::Instrument as _;

const VERSION_QUERY: &str = "SELECT @@version";

/// Pool key used when no `target` is requested.
const DEFAULT_TARGET: &str = "";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Flavor {
    MySql,
    MariaDb,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MySql => f.write_str("mysql"),
            Self::MariaDb => f.write_str("mariadb"),
        }
    }
}

/// `major.minor.patch`; missing components are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Always eligible.
    pub const ZERO: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse the numeric prefix of a version string. Anything after the
    /// first non `[0-9.]` character is ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let numeric = raw
            .trim()
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or_default();

        let mut parts = numeric
            .split('.')
            .map(|p| p.parse::<u64>().unwrap_or_default());

        Self {
            major: parts.next().unwrap_or_default(),
            minor: parts.next().unwrap_or_default(),
            patch: parts.next().unwrap_or_default(),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Flavor and version of one server, as reported by `@@version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    pub flavor: Flavor,
    pub version: Version,
    pub version_string: String,
}

impl ServerInfo {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let version_string = raw.trim().to_string();
        let flavor = if version_string.to_ascii_lowercase().contains("mariadb") {
            Flavor::MariaDb
        } else {
            Flavor::MySql
        };

        // MariaDB may announce itself as "5.5.5-10.x.y-MariaDB" to old clients.
        let numeric = match flavor {
            Flavor::MariaDb => version_string
                .strip_prefix("5.5.5-")
                .unwrap_or(&version_string),
            Flavor::MySql => &version_string,
        };

        Self {
            flavor,
            version: Version::parse(numeric),
            version_string,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Instance {
    pool: MySqlPool,
    server: Arc<ServerInfo>,
}

impl Instance {
    #[must_use]
    pub const fn new(pool: MySqlPool, server: Arc<ServerInfo>) -> Self {
        Self { pool, server }
    }

    #[must_use]
    pub const fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    #[must_use]
    pub fn flavor(&self) -> Flavor {
        self.server.flavor
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.server.version
    }

    #[must_use]
    pub fn version_string(&self) -> &str {
        &self.server.version_string
    }

    #[must_use]
    pub fn is_mariadb(&self) -> bool {
        self.server.flavor == Flavor::MariaDb
    }

    #[must_use]
    pub fn at_least(&self, version: Version) -> bool {
        self.server.version >= version
    }
}

/// Hands out instances to the orchestrator.
pub trait Connector: Send + Sync {
    /// Acquire an instance for `target`, or for the default connection when
    /// `target` is `None`. Fails when the server is unreachable.
    fn acquire<'a>(&'a self, target: Option<&'a str>) -> BoxFuture<'a, Result<Instance>>;

    /// Whether `target` names a configured instance.
    fn has_target(&self, target: &str) -> bool;
}

#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub lock_wait_timeout: u64,
    pub log_slow_filter: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 3,
            connect_timeout: Duration::from_secs(5),
            lock_wait_timeout: 2,
            log_slow_filter: false,
        }
    }
}

impl PoolSettings {
    /// Session statements run on every new connection.
    #[must_use]
    pub fn session_sql(&self) -> String {
        let mut sql = format!("SET SESSION lock_wait_timeout = {}", self.lock_wait_timeout);
        if self.log_slow_filter {
            sql.push_str("; SET SESSION log_slow_filter = 'tmp_table_on_disk,filesort_on_disk'");
        }
        sql
    }
}

struct PoolEntry {
    pool: MySqlPool,
    server: OnceCell<Arc<ServerInfo>>,
}

/// Lazily creates and caches one pool per target.
pub struct InstanceFactory {
    default: Option<MySqlConnectOptions>,
    targets: HashMap<String, MySqlConnectOptions>,
    settings: PoolSettings,
    pools: RwLock<HashMap<String, Arc<PoolEntry>>>,
}

impl InstanceFactory {
    #[must_use]
    pub fn new(
        default: Option<MySqlConnectOptions>,
        targets: HashMap<String, MySqlConnectOptions>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            default,
            targets,
            settings,
            pools: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Whether scrapes without `target` have somewhere to go.
    #[must_use]
    pub const fn has_default(&self) -> bool {
        self.default.is_some()
    }

    #[must_use]
    pub fn target_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn options_for(&self, target: Option<&str>) -> Result<&MySqlConnectOptions> {
        match target {
            Some(name) => self
                .targets
                .get(name)
                .ok_or_else(|| anyhow!("unknown target: {name}")),
            None => self
                .default
                .as_ref()
                .ok_or_else(|| anyhow!("no default connection configured, a target is required")),
        }
    }

    fn build_pool(&self, options: &MySqlConnectOptions) -> MySqlPool {
        let session: Arc<str> = Arc::from(self.settings.session_sql());

        MySqlPoolOptions::new()
            .min_connections(0)
            .max_connections(self.settings.max_connections.max(1))
            .acquire_timeout(self.settings.connect_timeout)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                let session = Arc::clone(&session);
                Box::pin(async move {
                    sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&session)).await?;
                    Ok(())
                })
            })
            .connect_lazy_with(options.clone())
    }

    async fn entry(&self, target: Option<&str>) -> Result<Arc<PoolEntry>> {
        let key = target.unwrap_or(DEFAULT_TARGET);

        if let Some(entry) = self.pools.read().await.get(key) {
            return Ok(Arc::clone(entry));
        }

        let options = self.options_for(target)?;
        let mut pools = self.pools.write().await;
        let entry = pools.entry(key.to_string()).or_insert_with(|| {
            debug!(target = key, "creating connection pool");
            Arc::new(PoolEntry {
                pool: self.build_pool(options),
                server: OnceCell::new(),
            })
        });

        Ok(Arc::clone(entry))
    }

    /// Close every cached pool.
    pub async fn close(&self) {
        let pools: Vec<Arc<PoolEntry>> = self.pools.write().await.drain().map(|(_, e)| e).collect();
        for entry in pools {
            entry.pool.close().await;
        }
    }
}

async fn discover_server(pool: &MySqlPool) -> Result<Arc<ServerInfo>> {
    let span = info_span!(
        "db.query",
        db.system = "mysql",
        db.operation = "SELECT",
        db.statement = VERSION_QUERY,
        otel.kind = "client"
    );

    let raw: String = sqlx::query_scalar(VERSION_QUERY)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to read server version")?;

    let server = ServerInfo::parse(&raw);
    info!(
        flavor = %server.flavor,
        version = %server.version,
        "discovered server version"
    );

    Ok(Arc::new(server))
}

impl Connector for InstanceFactory {
    fn acquire<'a>(&'a self, target: Option<&'a str>) -> BoxFuture<'a, Result<Instance>> {
        Box::pin(async move {
            let entry = self.entry(target).await?;

            // Up check: a live connection must be obtainable for every scrape.
            let conn = entry
                .pool
                .acquire()
                .await
                .context("failed to connect to database")?;
            drop(conn);

            let server = entry
                .server
                .get_or_try_init(|| discover_server(&entry.pool))
                .await?;

            Ok(Instance::new(entry.pool.clone(), Arc::clone(server)))
        })
    }

    fn has_target(&self, target: &str) -> bool {
        self.targets.contains_key(target)
    }
}
