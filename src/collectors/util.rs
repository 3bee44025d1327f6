//! Shared utilities for scrapers:
//! - Namespace constants and metric name composition.
//! - Tolerant parsing of raw status values returned by the server.
//! - Sanitizers for metric name fragments and SQL text used in logs.
//! - Time unit conversion factors (everything is exported in seconds).

/// Every metric exported by this crate starts with this token.
pub const NAMESPACE: &str = "mysql";

/// Subsystem used by the orchestrator's meta metrics.
pub const SCRAPE: &str = "scrape";

/// Subsystem used by the exporter's own process/runtime metrics.
pub const EXPORTER: &str = "exporter";

/// Divide a picosecond value by this to get seconds.
pub const PICO_SECONDS: f64 = 1e12;

/// Divide a microsecond value by this to get seconds.
pub const MICRO_SECONDS: f64 = 1e6;

/// Divide a millisecond value by this to get seconds.
pub const MILLI_SECONDS: f64 = 1e3;

/// Parse a raw column value into a float sample.
///
/// Surrounding whitespace is ignored. `ON`/`YES` map to 1 and `OFF`/`NO` to 0
/// (case-insensitive); anything else must parse as a float or `None` is
/// returned.
#[must_use]
pub fn parse_status(raw: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(raw).ok()?.trim();

    if text.eq_ignore_ascii_case("on") || text.eq_ignore_ascii_case("yes") {
        return Some(1.0);
    }
    if text.eq_ignore_ascii_case("off") || text.eq_ignore_ascii_case("no") {
        return Some(0.0);
    }

    text.parse::<f64>().ok()
}

/// Parse a slash separated composite value such as `0/1/2/3/4`.
///
/// Every field must be numeric, otherwise `None` is returned.
#[must_use]
pub fn parse_composite_status(raw: &[u8]) -> Option<Vec<f64>> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if text.is_empty() {
        return None;
    }

    text.split('/')
        .map(|field| field.trim().parse::<f64>().ok())
        .collect()
}

/// Build a fully qualified metric name: `namespace_subsystem_stem`.
///
/// Empty parts are skipped so `fq_name("mysql", "", "up")` is `mysql_up`.
#[must_use]
pub fn fq_name(namespace: &str, subsystem: &str, stem: &str) -> String {
    [namespace, subsystem, stem]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Map a free-form string (status key, column name, event name) to a form
/// that is safe inside a metric name.
///
/// The output only contains `[a-z0-9_]`; applying it twice is a no-op.
/// Input that sanitizes to nothing becomes `unknown`.
#[must_use]
pub fn sanitize_metric_fragment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());

    for c in s.chars().flat_map(char::to_lowercase) {
        match c {
            'a'..='z' | '0'..='9' | '_' => out.push(c),
            '/' | '+' => out.push_str("_and_"),
            '>' | ',' | ':' | '(' | ')' => {}
            // ' ', '-' and everything else outside the metric alphabet
            _ => out.push('_'),
        }
    }

    if out.is_empty() {
        return "unknown".to_string();
    }

    out
}

/// Collapse whitespace runs into single spaces and trim both ends.
///
/// Used for logging and span attributes only, never for execution.
#[must_use]
pub fn sanitize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Convert an i64 counter to f64 for Prometheus.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub const fn i64_to_f64(v: i64) -> f64 {
    v as f64
}

/// Convert a u64 counter to f64 for Prometheus.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub const fn u64_to_f64(v: u64) -> f64 {
    v as f64
}
