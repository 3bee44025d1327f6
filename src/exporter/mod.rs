use crate::{
    cli::telemetry::shutdown_tracer,
    collectors::{
        config::{CollectorConfig, GlobalOptions},
        exporter::Exporter,
        instance::{
            Connector, InstanceFactory, PoolSettings,
            mycnf::{ClientConfig, expand_home},
            targets::TargetsFile,
        },
        registry::ScraperRegistry,
    },
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::{Next, from_fn, from_fn_with_state},
    response::Response,
    routing::get,
};
use opentelemetry::global;
use opentelemetry::trace::{TraceContextExt, TraceId};
use opentelemetry_http::HeaderExtractor;
use secrecy::{ExposeSecret, SecretString};
use sqlx::mysql::MySqlConnectOptions;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, time::timeout};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use ulid::Ulid;
use web_config::{WebConfig, WebGuard};

mod handlers;
mod shutdown;
pub mod web_config;

pub use self::handlers::ScrapeParams;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = if let Some(hash) = built_info::GIT_COMMIT_HASH {
    hash
} else {
    ":-("
};

/// Default connection options: `--dsn` wins, otherwise the `[client]`
/// section of the option file filled up from the `MYSQL_*` variables.
///
/// # Errors
///
/// Returns an error for an unparsable DSN or option file.
pub fn default_connect_options(
    options: &GlobalOptions,
    dsn: Option<&SecretString>,
) -> Result<Option<MySqlConnectOptions>> {
    if let Some(dsn) = dsn {
        let options = MySqlConnectOptions::from_str(dsn.expose_secret())
            .context("invalid --dsn / MYSQLD_EXPORTER_DSN")?;
        return Ok(Some(options));
    }

    let path = expand_home(&options.my_cnf.to_string_lossy());
    let file = if path.is_file() {
        ClientConfig::from_file(&path)?
    } else {
        info!(path = %path.display(), "option file not found, using environment");
        ClientConfig::default()
    };
    let client = file.with_env();

    Ok(client.is_usable().then(|| client.connect_options()))
}

/// Build the connection factory for the default instance and every target
/// of `--config.file`.
///
/// # Errors
///
/// Returns an error when no credentials are configured at all, or when a
/// configuration source is invalid.
pub fn instance_factory(
    options: &GlobalOptions,
    dsn: Option<&SecretString>,
) -> Result<InstanceFactory> {
    let default = default_connect_options(options, dsn)?;

    let targets: HashMap<String, MySqlConnectOptions> = match &options.config_file {
        Some(path) => TargetsFile::load(path)?.connect_options()?,
        None => HashMap::new(),
    };

    if default.is_none() && targets.is_empty() {
        return Err(anyhow!(
            "no MySQL credentials: use --dsn, MYSQLD_EXPORTER_DSN, --config.my-cnf or --config.file"
        ));
    }

    let settings = PoolSettings {
        max_connections: options.max_connections,
        connect_timeout: options.connect_timeout,
        lock_wait_timeout: options.lock_wait_timeout,
        log_slow_filter: options.log_slow_filter,
    };

    Ok(InstanceFactory::new(default, targets, settings))
}

/// HTTP routes: the telemetry path, `/health` and the landing page. With a
/// `web` guard every route requires its basic auth users.
pub fn router(
    exporter: Arc<Exporter>,
    options: Arc<GlobalOptions>,
    web: Option<Arc<WebGuard>>,
) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(make_span)
        .on_response(on_response);

    let mut app = Router::new()
        .route(&options.telemetry_path, get(handlers::metrics))
        .route("/health", get(handlers::health).options(handlers::health));

    if options.telemetry_path != "/" {
        app = app.route("/", get(handlers::landing));
    }

    if let Some(web) = web {
        app = app.layer(from_fn_with_state(web, web_config::guard));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(trace_layer)
            .layer(from_fn(add_trace_headers))
            .layer(Extension(exporter))
            .layer(Extension(options)),
    )
}

/// Bind `--web.listen-address`. A bare `:port` listens on every interface,
/// IPv6 first with an IPv4 fallback.
///
/// # Errors
///
/// Returns an error if the address can not be bound.
pub async fn bind(listen_address: &str) -> Result<(TcpListener, String)> {
    if let Some(port) = listen_address.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid listen address {listen_address}"))?;

        return match TcpListener::bind(format!("[::]:{port}")).await {
            Ok(listener) => Ok((listener, format!("[::]:{port}"))),
            Err(_) => Ok((
                TcpListener::bind(format!("0.0.0.0:{port}"))
                    .await
                    .with_context(|| format!("Failed to bind to 0.0.0.0:{port}"))?,
                format!("0.0.0.0:{port}"),
            )),
        };
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("Failed to bind to {listen_address}"))?;
    let bound = listener
        .local_addr()
        .map_or_else(|_| listen_address.to_string(), |addr| addr.to_string());

    Ok((listener, bound))
}

/// Run the exporter until SIGINT/SIGTERM.
///
/// # Errors
///
/// Returns an error when credentials are missing or the listen address can
/// not be bound.
pub async fn new(
    config: CollectorConfig,
    dsn: Option<SecretString>,
    web_config: Option<WebConfig>,
    registry: Arc<ScraperRegistry>,
) -> Result<()> {
    let options = Arc::new(config.options.clone());

    let web = match &web_config {
        Some(web_config) => {
            if web_config.has_users() {
                info!("basic auth enabled");
            }
            Some(Arc::new(WebGuard::new(web_config)?))
        }
        None => None,
    };
    let factory = Arc::new(instance_factory(&options, dsn.as_ref())?);

    let exporter = Arc::new(Exporter::new(
        Arc::clone(&registry),
        Arc::clone(&factory) as Arc<dyn Connector>,
    ));

    // Startup check only, scrapes report mysql_up.
    if factory.has_default() {
        match timeout(options.connect_timeout, factory.acquire(None)).await {
            Ok(Ok(instance)) => info!(
                version = instance.version_string(),
                "Connected to database"
            ),
            Ok(Err(err)) => warn!(error = %format!("{err:#}"), "database not reachable yet"),
            Err(_) => warn!("database not reachable yet: timed out"),
        }
    } else {
        info!(targets = ?factory.target_names(), "multi-target mode");
    }

    let app = router(exporter, Arc::clone(&options), web);

    let (listener, bind_addr) = bind(&options.listen_address).await?;

    let collectors: Vec<&String> = config.enabled_collectors.iter().collect();

    println!(
        "{} {} - Listening on {bind_addr}{}\n\nEnabled collectors:\n{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        options.telemetry_path,
        format_list(&collectors),
    );

    let targets = factory.target_names();
    if !targets.is_empty() {
        println!("\nTargets:\n{}", format_list(&targets));
    }

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
    {
        error!(error=%e, "server error");
    }

    info!("shutting down");

    registry.teardown();
    factory.close().await;

    shutdown_tracer();

    Ok(())
}

// Helper to format a list of items with a leading dash and indentation for the
// start up message
fn format_list<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("  - {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn make_span(request: &Request<Body>) -> Span {
    let parent_cx =
        global::get_text_map_propagator(|prop| prop.extract(&HeaderExtractor(request.headers())));

    let method = request.method().as_str();

    let path = request.uri().path();

    let target = request.uri().to_string();

    let scheme = request.uri().scheme_str().unwrap_or("http");

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");

    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let span = info_span!(
        "http.server.request",
        otel.kind = "server",
        otel.status_code = tracing::field::Empty,
        http.method = method,
        http.route = path,
        http.target = target,
        http.scheme = scheme,
        http.user_agent = user_agent,
        request_id = request_id,
    );

    let _ = span.set_parent(parent_cx);

    span
}

fn on_response<B>(response: &axum::http::Response<B>, latency: Duration, span: &Span) {
    if response.status().is_server_error() {
        span.record("otel.status_code", "ERROR");
    } else {
        span.record("otel.status_code", "OK");
    }

    let elapsed_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

    let cx = span.context();
    let trace_id = cx.span().span_context().trace_id();

    if trace_id == TraceId::INVALID {
        info!(
            parent: span,
            status = response.status().as_u16(),
            elapsed_ms,
            "request completed"
        );
    } else {
        info!(
            parent: span,
            status = response.status().as_u16(),
            elapsed_ms,
            trace_id = %trace_id,
            "request completed"
        );
    }
}

async fn add_trace_headers(req: Request<Body>, next: Next) -> Response {
    let mut res = next.run(req).await;

    let span = Span::current();

    let cx = span.context();

    // clone to avoid borrowing a temporary
    let span_context = cx.span().span_context().clone();

    if span_context.is_valid()
        && let Ok(val) = HeaderValue::from_str(&span_context.trace_id().to_string())
    {
        res.headers_mut()
            .insert(HeaderName::from_static("x-trace-id"), val);
    }

    res
}
