//! # Prometheus 指标模块
//!
//! 进程内唯一的指标注册表，以及 HTTP 请求相关的三个指标:
//! - `<prefix>_requests_total`: 请求计数 (method, endpoint, http_status)
//! - `<prefix>_request_latency_seconds`: 请求耗时直方图 (endpoint)
//! - `<prefix>_inprogress_requests`: 正在处理中的请求数

pub mod exporter;
pub mod middleware;

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Write},
    time::Duration,
};

use axum::http::Method;
use prometheus_client::{
    encoding::{EncodeLabelSet, text::encode},
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::{Metric, Registry},
};
use thiserror::Error;

pub use middleware::{CLIENT_CLOSED_REQUEST, InProgressGuard, RequestContext, track_in_progress, track_metrics};

pub const DEFAULT_PREFIX: &str = "metered_web";

const REQUESTS: &str = "requests";
const REQUEST_LATENCY: &str = "request_latency_seconds";
const IN_PROGRESS: &str = "inprogress_requests";

/// Latency bucket upper bounds in seconds, `+Inf` is appended by the histogram.
pub const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("duplicate metric name: {0}")]
    DuplicateMetricName(String),
}

/// 输出格式
///
/// `Text` 是经典 prometheus 文本格式 (version 0.0.4): 计数器的 HELP/TYPE 行使用带 `_total`
/// 的完整名字，没有 `# EOF`。`OpenMetrics` 保持 `prometheus_client` 的原始输出。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpositionFormat {
    #[default]
    Text,
    OpenMetrics,
}

/// Prometheus 注册表包装
///
/// `prometheus_client::registry::Registry` 不会拒绝重名指标，这里额外记录已注册的名字。
/// 指标一旦注册就伴随进程整个生命周期，没有删除操作。
#[derive(Debug, Default)]
pub struct MetricRegistry {
    inner: Registry,
    prefix: Option<String>,
    names: HashSet<String>,
    // 带前缀的完整名字 -> 注册时的 help
    help: HashMap<String, String>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有指标名都会带上 `<prefix>_` 前缀，空前缀等同于 [`MetricRegistry::new`]
    pub fn with_prefix(prefix: &str) -> Self {
        if prefix.is_empty() {
            return Self::new();
        }
        Self {
            inner: Registry::with_prefix(prefix),
            prefix: Some(prefix.to_string()),
            ..Self::default()
        }
    }

    pub fn register(&mut self, name: &str, help: &str, metric: impl Metric) -> Result<(), MetricsError> {
        if !self.names.insert(name.to_string()) {
            return Err(MetricsError::DuplicateMetricName(name.to_string()));
        }
        self.help.insert(self.full_name(name), help.to_string());
        self.inner.register(name, help, metric);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn full_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{name}"),
            None => name.to_string(),
        }
    }

    /// 按指定格式输出全部指标
    pub fn encode(&self, buffer: &mut String, format: ExpositionFormat) -> fmt::Result {
        let mut openmetrics = String::new();
        encode(&mut openmetrics, &self.inner)?;
        self.rewrite(&openmetrics, buffer, format)
    }

    /// `prometheus_client` 只输出 OpenMetrics: help 末尾会补 `.`，计数器的 TYPE 行不带 `_total`，
    /// 结尾有 `# EOF`。这里恢复注册时的 help，纯文本格式下再改写计数器名字并去掉 `# EOF`。
    fn rewrite(&self, openmetrics: &str, out: &mut String, format: ExpositionFormat) -> fmt::Result {
        let counters: HashSet<&str> = openmetrics
            .lines()
            .filter_map(|line| line.strip_prefix("# TYPE ")?.strip_suffix(" counter"))
            .collect();
        let exposed = |name: &str| match format {
            ExpositionFormat::Text if counters.contains(name) => format!("{name}_total"),
            _ => name.to_string(),
        };

        for line in openmetrics.lines() {
            if let Some(rest) = line.strip_prefix("# HELP ") {
                let (name, encoded_help) = rest.split_once(' ').unwrap_or((rest, ""));
                match self.help.get(name) {
                    Some(help) => writeln!(out, "# HELP {} {}", exposed(name), escape_help(help))?,
                    None => writeln!(out, "# HELP {} {encoded_help}", exposed(name))?,
                }
                continue;
            }
            if format == ExpositionFormat::Text {
                if line == "# EOF" || line.starts_with("# UNIT ") {
                    continue;
                }
                if let Some((name, kind)) = line.strip_prefix("# TYPE ").and_then(|rest| rest.split_once(' ')) {
                    writeln!(out, "# TYPE {} {kind}", exposed(name))?;
                    continue;
                }
            }
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// 请求计数器的标签
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub method: String,
    pub endpoint: String,
    pub http_status: String,
}

/// 耗时直方图的标签
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: String,
}

/// How the `endpoint` label is derived from a request.
///
/// `Raw` keeps the concrete request path, so `/api/greet/alice` and `/api/greet/bob`
/// are separate series and cardinality grows with the set of distinct paths.
/// `Template` uses the matched route (`/api/greet/{name}`) and bounds it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PathLabel {
    #[default]
    Raw,
    Template,
}

fn latency_histogram() -> Histogram {
    Histogram::new(LATENCY_BUCKETS.iter().copied())
}

/// HTTP 指标集合
///
/// 启动时创建一次，通过 `Arc<HttpMetrics>` 交给中间件和 `/metrics` 处理器。
#[derive(Debug)]
pub struct HttpMetrics {
    registry: MetricRegistry,
    requests: Family<RequestLabels, Counter>,
    latency: Family<EndpointLabels, Histogram>,
    in_progress: Gauge,
    path_label: PathLabel,
}

impl HttpMetrics {
    pub fn new(prefix: &str, path_label: PathLabel) -> Result<Self, MetricsError> {
        let mut registry = MetricRegistry::with_prefix(prefix);
        let requests = Family::<RequestLabels, Counter>::default();
        let latency: Family<EndpointLabels, Histogram> = Family::new_with_constructor(latency_histogram as fn() -> Histogram);
        let in_progress = Gauge::default();

        registry.register(REQUESTS, "Total number of HTTP requests", requests.clone())?;
        registry.register(REQUEST_LATENCY, "Latency of HTTP requests in seconds", latency.clone())?;
        registry.register(IN_PROGRESS, "In-progress requests", in_progress.clone())?;

        Ok(Self {
            registry,
            requests,
            latency,
            in_progress,
            path_label,
        })
    }

    pub fn path_label(&self) -> PathLabel {
        self.path_label
    }

    /// 记录一次已完成的请求: 计数器 +1，耗时计入直方图
    pub fn observe_request(&self, method: &Method, endpoint: &str, status: u16, elapsed: Duration) {
        self.requests
            .get_or_create(&RequestLabels {
                method: method.as_str().to_string(),
                endpoint: endpoint.to_string(),
                http_status: status.to_string(),
            })
            .inc();
        self.latency
            .get_or_create(&EndpointLabels {
                endpoint: endpoint.to_string(),
            })
            .observe(elapsed.as_secs_f64());
    }

    pub fn in_progress_guard(&self) -> InProgressGuard {
        InProgressGuard::new(self.in_progress.clone())
    }

    pub fn in_progress(&self) -> i64 {
        self.in_progress.get()
    }

    pub fn encode(&self, buffer: &mut String, format: ExpositionFormat) -> fmt::Result {
        self.registry.encode(buffer, format)
    }
}
