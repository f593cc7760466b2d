//! # 格式化工具模块

/// Socket 地址格式化包装器
///
/// - IPv4: `192.168.1.1 8080`
/// - IPv6 映射的 IPv4 地址会还原成 IPv4: `::ffff:10.0.0.1` => `10.0.0.1 8080`
///
/// ```
/// use metered_web::util::format::SocketAddrFormat;
/// use std::net::SocketAddr;
///
/// let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
/// assert_eq!(SocketAddrFormat(&addr).to_string(), "127.0.0.1 8080");
/// ```
pub struct SocketAddrFormat<'a>(pub &'a std::net::SocketAddr);

impl std::fmt::Display for SocketAddrFormat<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0.ip().to_canonical(), self.0.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_ipv6_is_shown_as_ipv4() {
        let addr: std::net::SocketAddr = "[::ffff:10.0.0.1]:5000".parse().unwrap();
        assert_eq!(SocketAddrFormat(&addr).to_string(), "10.0.0.1 5000");
    }
}
