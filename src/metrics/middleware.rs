use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{MatchedPath, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use prometheus_client::metrics::gauge::Gauge;

use super::{HttpMetrics, PathLabel};

const UNMATCHED_ENDPOINT: &str = "unmatched";

/// 客户端在响应完成前断开 (nginx 的 499 约定)
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// 单个请求的指标上下文
///
/// 在请求开始时创建，正常完成时由 [`RequestContext::finish`] 记录真实状态码。
/// 如果请求 future 在完成前被丢弃 (客户端断开)，`Drop` 以 499 记录，每个请求恰好记录一次。
#[derive(Debug)]
pub struct RequestContext {
    metrics: Arc<HttpMetrics>,
    start: Instant,
    method: Method,
    endpoint: String,
    recorded: bool,
}

impl RequestContext {
    pub fn start(req: &Request, metrics: Arc<HttpMetrics>) -> Self {
        let endpoint = match metrics.path_label() {
            PathLabel::Raw => req.uri().path().to_string(),
            PathLabel::Template => req
                .extensions()
                .get::<MatchedPath>()
                .map_or_else(|| UNMATCHED_ENDPOINT.to_string(), |matched| matched.as_str().to_string()),
        };
        Self {
            metrics,
            start: Instant::now(),
            method: req.method().clone(),
            endpoint,
            recorded: false,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn finish(mut self, status: StatusCode) -> Duration {
        self.record(status.as_u16())
    }

    fn record(&mut self, status: u16) -> Duration {
        self.recorded = true;
        let elapsed = self.start.elapsed();
        self.metrics.observe_request(&self.method, &self.endpoint, status, elapsed);
        log::debug!("{} {} => {} in {:?}", self.method, self.endpoint, status, elapsed);
        elapsed
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if !self.recorded {
            self.record(CLIENT_CLOSED_REQUEST);
        }
    }
}

/// In-flight marker: the gauge goes up on creation and back down on drop,
/// whichever way the handler exits.
#[derive(Debug)]
pub struct InProgressGuard {
    gauge: Gauge,
}

impl InProgressGuard {
    pub(crate) fn new(gauge: Gauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// 记录请求计数和耗时，挂在所有业务路由上 (不包括 `/metrics`)
pub async fn track_metrics(State(metrics): State<Arc<HttpMetrics>>, req: Request, next: Next) -> Response {
    let ctx = RequestContext::start(&req, metrics);
    let response = next.run(req).await;
    ctx.finish(response.status());
    response
}

/// 按路由挂载，处理期间 in-progress gauge +1
pub async fn track_in_progress(State(metrics): State<Arc<HttpMetrics>>, req: Request, next: Next) -> Response {
    let _guard = metrics.in_progress_guard();
    next.run(req).await
}
