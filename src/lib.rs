use std::{net::SocketAddr, time::Duration};

pub mod config;
pub mod error;
pub mod handler;
pub mod init_log;
pub mod metrics;
pub mod util;
pub type DynError = Box<dyn std::error::Error + Send + Sync>;
use crate::util::io::{self, create_listener};

use axum::{Router, extract::Request, response::Response};

use hyper::body::Incoming;
use hyper_util::rt::TokioExecutor;
use log::{info, warn};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceExt;
use util::format::SocketAddrFormat;

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Server {
    pub addr: SocketAddr,
    router: Router,
    pub idle_timeout: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// 创建服务器，返回的 sender 发送一条消息即开始优雅关闭
pub fn new_server(addr: SocketAddr, router: Router) -> (Server, mpsc::Sender<()>) {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let server = Server {
        addr,
        router,
        idle_timeout: DEFAULT_IDLE_TIMEOUT,
        shutdown_rx,
    };
    (server, shutdown_tx)
}

impl Server {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = create_listener(self.addr).await?;
        self.run_with_listener(listener).await
    }

    /// 使用已经绑定好的 listener 运行，测试里可以先绑定 `127.0.0.1:0`
    pub async fn run_with_listener(mut self, listener: TcpListener) -> Result<(), std::io::Error> {
        log::info!("listening on {}", SocketAddrFormat(&listener.local_addr()?));
        let server = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("start graceful shutdown!");
                    drop(listener);
                    break;
                }
                conn = listener.accept() => {
                    match conn {
                        Ok((conn, client_socket_addr)) => {
                            handle_connection(conn, client_socket_addr, self.router.clone(), server.clone(), &graceful, self.idle_timeout).await;
                        }
                        Err(e) => {
                            warn!("accept error:{e}");
                        }
                    }
                }
            }
        }
        tokio::select! {
            _ = graceful.shutdown() => {
                info!("Gracefully shutdown!");
            },
            _ = tokio::time::sleep(GRACEFUL_SHUTDOWN_TIMEOUT) => {
                info!("Waited {GRACEFUL_SHUTDOWN_TIMEOUT:?} for graceful shutdown, aborting...");
            }
        }
        Ok(())
    }
}

async fn handle(request: Request<Incoming>, app: Router) -> std::result::Result<Response, std::io::Error> {
    app.oneshot(request)
        .await
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Interrupted, err))
}

async fn handle_connection<C>(
    conn: C, client_socket_addr: SocketAddr, app: Router, server: hyper_util::server::conn::auto::Builder<TokioExecutor>,
    graceful: &hyper_util::server::graceful::GracefulShutdown, timeout: Duration,
) where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + 'static + Send + Sync,
{
    let timeout_io = Box::pin(io::TimeoutIO::new(conn, timeout));
    use hyper_util::rt::TokioIo;
    let stream = TokioIo::new(timeout_io);
    // https://github.com/tokio-rs/axum/blob/main/examples/serve-with-hyper/src/main.rs#L81
    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| handle(request, app.clone()));

    let conn = server.serve_connection_with_upgrades(stream, hyper_service);
    let conn = graceful.watch(conn.into_owned());

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            handle_hyper_error(client_socket_addr, err);
        }
        log::debug!("connection dropped: {}", SocketAddrFormat(&client_socket_addr));
    });
}

fn handle_hyper_error(client_socket_addr: SocketAddr, http_err: DynError) {
    use std::error::Error;
    match http_err.downcast_ref::<hyper::Error>() {
        Some(hyper_err) => {
            let level = if hyper_err.is_user() { log::Level::Warn } else { log::Level::Debug };
            let source = hyper_err.source().unwrap_or(hyper_err);
            log::log!(
                level,
                "[hyper {}]: {:?} from {}",
                if hyper_err.is_user() { "user" } else { "system" },
                source,
                SocketAddrFormat(&client_socket_addr)
            );
        }
        None => match http_err.downcast_ref::<std::io::Error>() {
            Some(io_err) => {
                warn!("[hyper io]: [{}] {} from {}", io_err.kind(), io_err, SocketAddrFormat(&client_socket_addr));
            }
            None => {
                warn!("[hyper]: {} from {}", http_err, SocketAddrFormat(&client_socket_addr));
            }
        },
    }
}

#[cfg(unix)]
pub async fn wait_signal() -> Result<(), DynError> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate_signal = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = terminate_signal.recv() => {
            info!("receive terminate signal");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("receive ctrl_c signal");
        },
    };
    Ok(())
}

#[cfg(windows)]
pub async fn wait_signal() -> Result<(), DynError> {
    let _ = tokio::signal::ctrl_c().await;
    info!("receive ctrl_c signal");
    Ok(())
}
