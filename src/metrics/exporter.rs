use std::{io, sync::Arc};

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
};

use super::{ExpositionFormat, HttpMetrics};
use crate::{error::AppError, handler::AppState};

/// 经典 prometheus 文本格式
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

impl ExpositionFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExpositionFormat::Text => TEXT_CONTENT_TYPE,
            ExpositionFormat::OpenMetrics => OPENMETRICS_CONTENT_TYPE,
        }
    }
}

pub fn encode_metrics(metrics: &HttpMetrics, format: ExpositionFormat) -> Result<String, AppError> {
    let mut buffer = String::new();
    if let Err(e) = metrics.encode(&mut buffer, format) {
        log::error!("Failed to encode metrics: {e:?}");
        return Err(AppError::new(io::Error::other(e)));
    }
    Ok(buffer)
}

/// Picks the exposition format from the scraper's `Accept` header.
pub fn negotiate_format(headers: &HeaderMap) -> ExpositionFormat {
    let wants_openmetrics = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("application/openmetrics-text"));
    if wants_openmetrics { ExpositionFormat::OpenMetrics } else { ExpositionFormat::Text }
}

/// Prometheus 指标处理器
///
/// 这个路由不经过 `track_metrics`，抓取本身不会产生新的指标。
/// 响应体和 `Content-Type` 总是同一种格式。
pub async fn metrics_handler(
    State(state): State<Arc<AppState>>, headers: HeaderMap,
) -> Result<(StatusCode, [(header::HeaderName, HeaderValue); 1], String), AppError> {
    let format = negotiate_format(&headers);
    let body = encode_metrics(&state.metrics, format)?;
    let content_type = HeaderValue::from_static(format.content_type());
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Method;

    use super::*;
    use crate::metrics::{PathLabel, tests::sample};

    #[test]
    fn plain_scrapers_get_text_format() {
        let mut headers = HeaderMap::new();
        assert_eq!(negotiate_format(&headers), ExpositionFormat::Text);
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain;version=0.0.4;q=0.5,*/*;q=0.1"));
        assert_eq!(negotiate_format(&headers), ExpositionFormat::Text);
        assert_eq!(ExpositionFormat::Text.content_type(), TEXT_CONTENT_TYPE);
    }

    #[test]
    fn openmetrics_is_negotiated() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/openmetrics-text;version=1.0.0,text/plain;version=0.0.4;q=0.5"),
        );
        assert_eq!(negotiate_format(&headers), ExpositionFormat::OpenMetrics);
        assert_eq!(ExpositionFormat::OpenMetrics.content_type(), OPENMETRICS_CONTENT_TYPE);
    }

    #[test]
    fn every_registered_metric_is_described() {
        let metrics = HttpMetrics::new("exp", PathLabel::Raw).unwrap();
        metrics.observe_request(&Method::GET, "/", 200, Duration::from_millis(200));
        let _guard = metrics.in_progress_guard();

        let text = encode_metrics(&metrics, ExpositionFormat::Text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        for (name, kind, help, series) in [
            ("exp_requests_total", "counter", "Total number of HTTP requests", "exp_requests_total{"),
            ("exp_request_latency_seconds", "histogram", "Latency of HTTP requests in seconds", "exp_request_latency_seconds_bucket{"),
            ("exp_inprogress_requests", "gauge", "In-progress requests", "exp_inprogress_requests "),
        ] {
            let help_line = format!("# HELP {name} {help}");
            let type_line = format!("# TYPE {name} {kind}");
            assert!(lines.contains(&help_line.as_str()), "missing HELP for {name}");
            assert!(lines.contains(&type_line.as_str()), "missing TYPE for {name}");
            assert!(lines.iter().any(|line| line.starts_with(series)), "no samples for {name}");
        }
        assert_eq!(sample(&text, r#"exp_requests_total{method="GET",endpoint="/",http_status="200"}"#), Some(1.0));
        assert_eq!(sample(&text, r#"exp_request_latency_seconds_count{endpoint="/"}"#), Some(1.0));
        assert_eq!(sample(&text, "exp_inprogress_requests"), Some(1.0));
        assert!(!text.contains("# EOF"));
    }

    #[test]
    fn openmetrics_body_matches_its_content_type() {
        let metrics = HttpMetrics::new("exp", PathLabel::Raw).unwrap();
        metrics.observe_request(&Method::GET, "/", 200, Duration::from_millis(5));

        let text = encode_metrics(&metrics, ExpositionFormat::OpenMetrics).unwrap();
        assert!(text.lines().any(|line| line == "# TYPE exp_requests counter"));
        assert_eq!(sample(&text, r#"exp_requests_total{method="GET",endpoint="/",http_status="200"}"#), Some(1.0));
        assert!(text.ends_with("# EOF\n"));
    }
}
