use crate::collectors::config::GlobalOptions;
use crate::collectors::exporter::Exporter;
use axum::{extract::Extension, response::Html};
use std::fmt::Write as _;
use std::sync::Arc;

/// Index page linking to the metrics endpoint and listing every scraper.
pub async fn landing(
    Extension(exporter): Extension<Arc<Exporter>>,
    Extension(options): Extension<Arc<GlobalOptions>>,
) -> Html<String> {
    Html(render(
        &options.telemetry_path,
        &exporter.registry().describe(),
    ))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render(telemetry_path: &str, scrapers: &[(&'static str, bool, bool)]) -> String {
    let path = escape(telemetry_path);
    let mut rows = String::new();
    for (name, default, enabled) in scrapers {
        let _ = writeln!(
            rows,
            "<tr><td>{name}</td><td>{}</td><td>{}</td></tr>",
            if *default { "enabled" } else { "disabled" },
            if *enabled { "yes" } else { "no" },
        );
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>MySQLd Exporter</title></head>
<body>
<h1>MySQLd Exporter</h1>
<p>{name} {version}</p>
<p><a href="{path}">Metrics</a></p>
<h2>Collectors</h2>
<table>
<tr><th>Name</th><th>Default</th><th>Enabled</th></tr>
{rows}</table>
</body>
</html>
"#,
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let page = render(
            "/metrics",
            &[("global_status", true, true), ("binlog_size", false, true)],
        );
        assert!(page.contains(r#"<a href="/metrics">"#));
        assert!(page.contains("<tr><td>global_status</td><td>enabled</td><td>yes</td></tr>"));
        assert!(page.contains("<tr><td>binlog_size</td><td>disabled</td><td>yes</td></tr>"));
    }

    #[test]
    fn test_render_escapes_path() {
        let page = render("/m?a=<b>", &[]);
        assert!(page.contains("/m?a=&lt;b&gt;"));
    }
}
