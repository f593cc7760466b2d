use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpListener,
    time::{Instant, Sleep, sleep},
};

/// 创建监听 socket
///
/// 绑定 `::` 时同时接受 IPv4 和 IPv6 连接
pub(crate) async fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?; // 设置reuse_address以支持快速重启

    if addr.is_ipv6() && addr.ip().is_unspecified() {
        socket.set_only_v6(false)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(1024)?; // 1024为backlog的大小

    let std_listener = std::net::TcpListener::from(socket);
    std_listener.set_nonblocking(true)?;

    TcpListener::from_std(std_listener)
}

pin_project! {
    /// 连接空闲超过 `timeout` 后读写返回 `TimedOut`
    #[derive(Debug)]
    pub struct TimeoutIO<T>
    where
    T: AsyncWrite,
    T: AsyncRead,
    {
        #[pin]
        inner: T,
        timeout: Duration,
        #[pin]
        idle_future: Sleep,
    }
}

impl<T> TimeoutIO<T>
where
    T: AsyncWrite + AsyncRead,
{
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            idle_future: sleep(timeout),
        }
    }
}

/// 有进展就重置计时，没有进展且已超时则返回错误
fn check_idle<R>(poll: Poll<io::Result<R>>, mut idle: Pin<&mut Sleep>, timeout: Duration, cx: &mut Context<'_>, op: &str) -> Poll<io::Result<R>> {
    if poll.is_ready() {
        idle.as_mut().reset(Instant::now() + timeout);
    } else if idle.as_mut().poll(cx).is_ready() {
        return Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, format!("{op} idle for {timeout:?}"))));
    }
    poll
}

impl<T> AsyncRead for TimeoutIO<T>
where
    T: AsyncWrite + AsyncRead,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let poll = pro.inner.poll_read(cx, buf);
        check_idle(poll, pro.idle_future, *pro.timeout, cx, "read")
    }
}

impl<T> AsyncWrite for TimeoutIO<T>
where
    T: AsyncWrite + AsyncRead,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let pro = self.project();
        let poll = pro.inner.poll_write(cx, buf);
        check_idle(poll, pro.idle_future, *pro.timeout, cx, "write")
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let poll = pro.inner.poll_flush(cx);
        check_idle(poll, pro.idle_future, *pro.timeout, cx, "write")
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let poll = pro.inner.poll_shutdown(cx);
        check_idle(poll, pro.idle_future, *pro.timeout, cx, "write")
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[io::IoSlice<'_>]) -> Poll<io::Result<usize>> {
        let pro = self.project();
        let poll = pro.inner.poll_write_vectored(cx, bufs);
        check_idle(poll, pro.idle_future, *pro.timeout, cx, "write")
    }
}
