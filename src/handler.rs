use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{MatchedPath, Path, State},
    http::{self, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
};
use axum_macros::debug_handler;
use serde::Serialize;
use tokio::time::sleep;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::metrics::{HttpMetrics, exporter::metrics_handler, track_in_progress, track_metrics};

/// `GET /` 的模拟延迟，用于观察耗时直方图
pub const DEFAULT_HOME_DELAY: Duration = Duration::from_millis(200);

pub const HOME_BODY: &str = "Welcome to the Axum App!";

/// 应用状态 (跨请求共享)
pub struct AppState {
    pub metrics: Arc<HttpMetrics>,
    pub home_delay: Duration,
}

impl AppState {
    pub fn new(metrics: Arc<HttpMetrics>) -> Self {
        Self {
            metrics,
            home_delay: DEFAULT_HOME_DELAY,
        }
    }

    pub fn with_home_delay(mut self, home_delay: Duration) -> Self {
        self.home_delay = home_delay;
        self
    }
}

/// 构建 Axum 路由和中间件栈
///
/// # 路由列表
/// - `GET /`: 延迟后返回欢迎语 (计入 in-progress)
/// - `GET /api/greet/{name}`: JSON 问候 (计入 in-progress)
/// - `GET /health`: 健康检查
/// - `GET /metrics`: Prometheus 指标，不经过 `track_metrics`
///
/// # 中间件栈 (从外到内)
/// 1. TraceLayer: 请求追踪
/// 2. track_metrics: 请求计数和耗时
/// 3. CatchPanicLayer: handler panic 转成 500
pub fn build_router(app_state: AppState) -> Router {
    let metrics = app_state.metrics.clone();
    Router::new()
        .route("/", get(home).layer(from_fn_with_state(metrics.clone(), track_in_progress)))
        .route("/api/greet/{name}", get(greet).layer(from_fn_with_state(metrics.clone(), track_in_progress)))
        .route("/health", get(health))
        .layer((from_fn_with_state(metrics, track_metrics), CatchPanicLayer::new()))
        // 在 layer 之后注册，不会被统计
        .route("/metrics", get(metrics_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_span)
                // 5xx 已经由 AppError 记录
                .on_failure(()),
        )
        .with_state(Arc::new(app_state))
}

fn make_span(req: &http::Request<axum::body::Body>) -> tracing::Span {
    let method = req.method();
    let path = req.uri().path();

    let matched_path = req.extensions().get::<MatchedPath>().map(|matched_path| matched_path.as_str());

    tracing::debug_span!("recv request", %method, %path, matched_path)
}

#[debug_handler]
pub(crate) async fn home(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    sleep(state.home_delay).await;
    (StatusCode::OK, HOME_BODY)
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct GreetResponse {
    pub message: String,
}

pub(crate) async fn greet(Path(name): Path<String>) -> Json<GreetResponse> {
    Json(GreetResponse {
        message: format!("Hello, {name}!"),
    })
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}
