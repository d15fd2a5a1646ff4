//! HTTP handlers: Prometheus exposition, landing page and health check.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::error;

pub(crate) struct AppState {
    pub registry: Registry,
    /// Job names, for the landing page.
    pub jobs: Vec<String>,
}

pub(crate) type SharedState = Arc<AppState>;

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

pub(crate) async fn handle_index(State(state): State<SharedState>) -> Html<String> {
    Html(render_index(&state.jobs))
}

pub(crate) async fn handle_metrics(State(state): State<SharedState>) -> Response {
    match encode_metrics(&state.registry) {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn encode_metrics(registry: &Registry) -> prometheus::Result<Vec<u8>> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    Ok(buf)
}

fn render_index(jobs: &[String]) -> String {
    let mut items = String::new();
    for job in jobs {
        items.push_str("<li>");
        items.push_str(&escape_html(job));
        items.push_str("</li>");
    }
    format!(
        "<html><head><title>SQL Exporter</title></head><body>\
         <h1>SQL Exporter {}</h1>\
         <p><a href=\"/metrics\">Metrics</a></p>\
         <h2>Jobs</h2><ul>{}</ul>\
         </body></html>",
        sql_exporter_core::VERSION,
        items
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
