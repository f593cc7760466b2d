use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;

use crate::metrics::{DEFAULT_PREFIX, PathLabel};

/// 带 prometheus 指标的 axum 服务
#[derive(Parser, Debug)]
#[command(author, version=None, about, long_about = None)]
pub struct Param {
    /// 监听地址
    #[arg(long, value_name = "host", default_value = "0.0.0.0")]
    pub host: String,
    /// 监听端口
    #[arg(long, short, value_name = "port", default_value = "5000")]
    pub port: u16,
    /// `GET /` 的模拟延迟 (毫秒)
    #[arg(long, value_name = "ms", default_value = "200")]
    pub home_delay_ms: u64,
    /// 指标名前缀
    #[arg(long, value_name = "prefix", default_value = DEFAULT_PREFIX)]
    pub metrics_prefix: String,
    /// endpoint 标签取原始路径还是路由模板
    #[arg(long, value_enum, default_value_t = PathLabel::Raw)]
    pub path_label: PathLabel,
    /// 连接空闲超时 (秒)
    #[arg(long, value_name = "secs", default_value = "120")]
    pub idle_timeout_secs: u64,
}

impl Param {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self.host.parse().with_context(|| format!("invalid host: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn home_delay(&self) -> Duration {
        Duration::from_millis(self.home_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
