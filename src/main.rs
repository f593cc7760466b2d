#![deny(warnings)]

use std::sync::{Arc, LazyLock};

use clap::Parser;
use metered_web::{
    DynError,
    config::Param,
    handler::{AppState, build_router},
    metrics::HttpMetrics,
};

// 可以在这里进行一些预处理
static PARAM: LazyLock<Param> = LazyLock::new(Param::parse);

#[tokio::main]
pub async fn main() -> Result<(), DynError> {
    #[cfg(feature = "use_tracing_subscriber")]
    metered_web::init_log::tracing::init(env!("CARGO_CRATE_NAME"))?;

    let addr = PARAM.socket_addr()?;
    // 重名指标属于编程错误，直接退出
    let metrics = Arc::new(HttpMetrics::new(&PARAM.metrics_prefix, PARAM.path_label)?);
    log::info!("metrics prefix: {}, endpoint label: {:?}", PARAM.metrics_prefix, PARAM.path_label);

    let router = build_router(AppState::new(metrics).with_home_delay(PARAM.home_delay()));
    let (server, shutdown_tx) = metered_web::new_server(addr, router);

    tokio::spawn(async move {
        match metered_web::wait_signal().await {
            Ok(()) => {
                if shutdown_tx.send(()).await.is_err() {
                    log::warn!("server already stopped");
                }
            }
            Err(e) => {
                // sender 被 drop 也会触发关闭，这里一直持有
                log::error!("failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    });

    server.with_timeout(PARAM.idle_timeout()).run().await?;
    Ok(())
}
