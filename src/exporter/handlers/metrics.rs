use crate::collectors::config::GlobalOptions;
use crate::collectors::exporter::{Exporter, ScrapeRequest};
use crate::collectors::metric::encode_text;
use axum::{
    extract::{Extension, RawQuery},
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Sent by Prometheus with every scrape.
pub const SCRAPE_TIMEOUT_HEADER: &str = "x-prometheus-scrape-timeout-seconds";

/// Query parameters of a scrape: repeated `collect[]` and an optional
/// `target`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScrapeParams {
    pub collect: Vec<String>,
    pub target: Option<String>,
}

impl ScrapeParams {
    /// `collect[]` repeats, so this can not go through a serde struct.
    #[must_use]
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = Self::default();

        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            match key.as_ref() {
                "collect[]" => params.collect.push(value.into_owned()),
                "target" if !value.is_empty() => params.target = Some(value.into_owned()),
                _ => {}
            }
        }

        params
    }
}

fn prometheus_timeout(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
}

pub async fn metrics(
    Extension(exporter): Extension<Arc<Exporter>>,
    Extension(options): Extension<Arc<GlobalOptions>>,
    request_headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));

    let params = ScrapeParams::parse(query.as_deref());
    let timeout = options.effective_timeout(prometheus_timeout(&request_headers));

    let mut request = ScrapeRequest::new(timeout).with_collect(params.collect);
    if let Some(target) = params.target {
        request = request.with_target(target);
    }

    let families = match exporter.scrape(&request).await {
        Ok(families) => families,
        Err(e) if e.is_client_error() => {
            warn!(error = %e, "rejected scrape request");
            return (StatusCode::BAD_REQUEST, headers, format!("{e}\n"));
        }
        Err(e) => {
            error!(error = %e, "failed to scrape");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                headers,
                format!("Error collecting metrics: {e}\n"),
            );
        }
    };

    match encode_text(&families) {
        Ok(body) => {
            debug!(families = families.len(), "successfully collected metrics");
            (StatusCode::OK, headers, body)
        }
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                headers,
                format!("Error encoding metrics: {e}\n"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let params = ScrapeParams::parse(Some(
            "collect[]=global_status&collect[]=info_schema.processlist,binlog_size&target=replica",
        ));
        assert_eq!(
            params.collect,
            vec!["global_status", "info_schema.processlist,binlog_size"]
        );
        assert_eq!(params.target.as_deref(), Some("replica"));
    }

    #[test]
    fn test_parse_encoded_brackets() {
        let params = ScrapeParams::parse(Some("collect%5B%5D=slave_status&target="));
        assert_eq!(params.collect, vec!["slave_status"]);
        assert_eq!(params.target, None);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(ScrapeParams::parse(None), ScrapeParams::default());
    }

    #[test]
    fn test_prometheus_timeout_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(prometheus_timeout(&headers), None);

        headers.insert(SCRAPE_TIMEOUT_HEADER, HeaderValue::from_static("4.5"));
        assert_eq!(prometheus_timeout(&headers), Some(4.5));

        headers.insert(SCRAPE_TIMEOUT_HEADER, HeaderValue::from_static("soon"));
        assert_eq!(prometheus_timeout(&headers), None);
    }
}
