//! Credentials from a MySQL option file (`[client]` section) and the standard
//! client environment variables.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use std::env;
use std::path::{Path, PathBuf};

const SECTION: &str = "client";
const DEFAULT_PORT: u16 = 3306;

#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    pub user: Option<String>,
    pub password: Option<SecretString>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<String>,
    pub ssl_ca: Option<PathBuf>,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
}

impl ClientConfig {
    /// Parse the `[client]` section of an option file.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed `port` value.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut in_section = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_section = name.trim().eq_ignore_ascii_case(SECTION);
                continue;
            }

            if !in_section {
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), unquote(v.trim())),
                None => (line, ""),
            };

            // option files treat '-' and '_' as the same character
            match key.replace('_', "-").as_str() {
                "user" => config.user = Some(value.to_string()),
                "password" => config.password = Some(SecretString::from(value.to_string())),
                "host" => config.host = Some(value.to_string()),
                "port" => {
                    config.port = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid port in option file: {value}"))?,
                    );
                }
                "socket" => config.socket = Some(value.to_string()),
                "ssl-ca" => config.ssl_ca = Some(PathBuf::from(value)),
                "ssl-cert" => config.ssl_cert = Some(PathBuf::from(value)),
                "ssl-key" => config.ssl_key = Some(PathBuf::from(value)),
                _ => {}
            }
        }

        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if the file can not be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Fill fields the file left empty from `MYSQL_USER`, `MYSQL_PWD`,
    /// `MYSQL_HOST`, `MYSQL_TCP_PORT` and `MYSQL_UNIX_PORT`.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if self.user.is_none() {
            self.user = env::var("MYSQL_USER").ok();
        }
        if self.password.is_none() {
            self.password = env::var("MYSQL_PWD").ok().map(SecretString::from);
        }
        if self.host.is_none() {
            self.host = env::var("MYSQL_HOST").ok();
        }
        if self.port.is_none() {
            self.port = env::var("MYSQL_TCP_PORT").ok().and_then(|p| p.parse().ok());
        }
        if self.socket.is_none() {
            self.socket = env::var("MYSQL_UNIX_PORT").ok();
        }
        self
    }

    /// A user is the minimum needed to log in.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.user.is_some()
    }

    #[must_use]
    pub fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new();

        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        // a socket wins over host/port, like the mysql client
        if let Some(socket) = &self.socket {
            options = options.socket(socket);
        } else {
            options = options
                .host(self.host.as_deref().unwrap_or("localhost"))
                .port(self.port.unwrap_or(DEFAULT_PORT));
        }

        if let Some(ca) = &self.ssl_ca {
            options = options.ssl_mode(MySqlSslMode::VerifyCa).ssl_ca(ca);
        }
        if let Some(cert) = &self.ssl_cert {
            options = options.ssl_client_cert(cert);
        }
        if let Some(key) = &self.ssl_key {
            options = options.ssl_client_key(key);
        }

        options
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

/// Expand a leading `~/` using `HOME`.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Ok(home) = env::var("HOME")
    {
        return Path::new(&home).join(rest);
    }
    PathBuf::from(path)
}
