//! `--web.config-file`: basic auth users and extra response headers.
//!
//! The file uses the Prometheus exporter web configuration layout:
//!
//! ```yaml
//! basic_auth_users:
//!   prometheus: $2y$10$...
//! http_server_config:
//!   headers:
//!     X-Frame-Options: deny
//! ```
//!
//! TLS is not served by this binary. A file with `tls_server_config` is
//! rejected instead of silently serving plain HTTP.

use anyhow::{Context, Result, anyhow};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Verified against when the user is unknown, so both cases cost the same.
const UNKNOWN_USER_HASH: &str = "$2y$10$QOauhQNbBCuQDKes6eFzPeMqBSjb7Mr5DUmpZ/VcEd00UAV/LDeSi";

/// Headers that may be set from the file, with their allowed values (empty
/// means any value).
const ALLOWED_HEADERS: &[(&str, &[&str])] = &[
    ("Strict-Transport-Security", &[]),
    ("X-Content-Type-Options", &["nosniff"]),
    ("X-Frame-Options", &["deny", "sameorigin"]),
    ("X-XSS-Protection", &[]),
    ("Content-Security-Policy", &[]),
];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebConfig {
    #[serde(default)]
    tls_server_config: Option<serde_yaml::Value>,
    #[serde(default)]
    http_server_config: HttpServerConfig,
    /// User name to bcrypt hash.
    #[serde(default)]
    basic_auth_users: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpServerConfig {
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl WebConfig {
    /// Read and validate a web configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or malformed, configures
    /// TLS, holds a password that is not a bcrypt hash, or sets a header
    /// outside the allowed list.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(anyhow!("web config file {} does not exist", path.display()));
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        Self::parse(&raw).with_context(|| format!("invalid web config file {}", path.display()))
    }

    /// Parse and validate YAML content.
    ///
    /// # Errors
    ///
    /// See [`WebConfig::load`].
    pub fn parse(raw: &str) -> Result<Self> {
        // an empty file is a valid, empty config
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };

        if config
            .tls_server_config
            .as_ref()
            .is_some_and(|tls| !tls.is_null())
        {
            return Err(anyhow!(
                "tls_server_config is not supported, terminate TLS in front of the exporter"
            ));
        }

        for (user, hash) in &config.basic_auth_users {
            bcrypt::verify("", hash)
                .map_err(|e| anyhow!("password of user {user:?} is not a bcrypt hash: {e}"))?;
        }

        config.response_headers()?;

        Ok(config)
    }

    #[must_use]
    pub fn has_users(&self) -> bool {
        !self.basic_auth_users.is_empty()
    }

    fn response_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.http_server_config.headers {
            let Some((_, allowed)) = ALLOWED_HEADERS
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(name))
            else {
                return Err(anyhow!("HTTP header {name} can not be configured"));
            };

            if !allowed.is_empty() && !allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
                return Err(anyhow!(
                    "invalid value for {name}, expected one of {allowed:?}, got {value}"
                ));
            }

            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        Ok(headers)
    }
}

/// State of the web middleware: users, headers and the credentials that
/// already passed bcrypt.
pub struct WebGuard {
    users: BTreeMap<String, String>,
    headers: HeaderMap,
    verified: Mutex<HashSet<String>>,
    bcrypt: tokio::sync::Mutex<()>,
}

impl WebGuard {
    /// # Errors
    ///
    /// Returns an error when a configured header is invalid.
    pub fn new(config: &WebConfig) -> Result<Self> {
        Ok(Self {
            users: config.basic_auth_users.clone(),
            headers: config.response_headers()?,
            verified: Mutex::new(HashSet::new()),
            bcrypt: tokio::sync::Mutex::new(()),
        })
    }

    async fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.users.is_empty() {
            return true;
        }

        let Some(encoded) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
        else {
            return false;
        };

        if self.verified.lock().contains(encoded) {
            return true;
        }

        let Some((user, password)) = decode_basic(encoded) else {
            return false;
        };

        let hash = self
            .users
            .get(&user)
            .map_or_else(|| UNKNOWN_USER_HASH.to_string(), Clone::clone);

        // one bcrypt at a time
        let _guard = self.bcrypt.lock().await;
        let valid = tokio::task::spawn_blocking(move || {
            bcrypt::verify(password, &hash).unwrap_or(false)
        })
        .await
        .unwrap_or(false);

        let ok = valid && self.users.contains_key(&user);
        if ok {
            self.verified.lock().insert(encoded.to_string());
        }

        ok
    }
}

fn decode_basic(encoded: &str) -> Option<(String, String)> {
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Middleware enforcing basic auth and adding the configured headers.
pub async fn guard(
    State(web): State<Arc<WebGuard>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = if web.authorized(request.headers()).await {
        next.run(request).await
    } else {
        debug!(path = request.uri().path(), "basic auth rejected");
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic")],
            "Unauthorized\n",
        )
            .into_response()
    };

    for (name, value) in &web.headers {
        response.headers_mut().insert(name.clone(), value.clone());
    }

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = WebConfig::parse("").unwrap();
        assert!(!config.has_users());

        let config = WebConfig::parse("basic_auth_users: {}\n").unwrap();
        assert!(!config.has_users());
    }

    #[test]
    fn test_basic_auth_users() {
        let hash = bcrypt::hash("secret", 4).unwrap();
        let config = WebConfig::parse(&format!("basic_auth_users:\n  prometheus: '{hash}'\n")).unwrap();
        assert!(config.has_users());
    }

    #[test]
    fn test_plaintext_password_rejected() {
        let err = WebConfig::parse("basic_auth_users:\n  prometheus: secret\n").unwrap_err();
        assert!(err.to_string().contains("not a bcrypt hash"));
    }

    #[test]
    fn test_tls_rejected() {
        let err = WebConfig::parse(
            "tls_server_config:\n  cert_file: server.crt\n  key_file: server.key\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("tls_server_config"));

        assert!(WebConfig::parse("tls_server_config:\n").is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(WebConfig::parse("basic_auth: {}\n").is_err());
        assert!(WebConfig::parse("http_server_config:\n  http2: true\n").is_err());
    }

    #[test]
    fn test_headers() {
        let config = WebConfig::parse(
            "http_server_config:\n  headers:\n    X-Frame-Options: deny\n    Strict-Transport-Security: max-age=31536000\n",
        )
        .unwrap();
        let headers = config.response_headers().unwrap();
        assert_eq!(headers.get("x-frame-options").unwrap(), "deny");

        assert!(
            WebConfig::parse("http_server_config:\n  headers:\n    X-Frame-Options: allow\n")
                .is_err()
        );
        assert!(
            WebConfig::parse("http_server_config:\n  headers:\n    Server: nginx\n").is_err()
        );
    }

    #[test]
    fn test_decode_basic() {
        let encoded = general_purpose::STANDARD.encode("prometheus:pa:ss");
        assert_eq!(
            decode_basic(&encoded),
            Some(("prometheus".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(decode_basic("not base64!"), None);
    }
}
