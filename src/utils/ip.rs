//! IP 地址处理工具
//!
//! 提供统一的客户端 IP 提取，以及富化路径用的地址分类

use std::net::IpAddr;

use actix_web::HttpRequest;

/// 检查 IP 是否为私有地址、环回、链路本地或未指定地址
///
/// 这些地址不做 GeoIP 富化，也不告警。
pub fn is_private_or_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            // IPv6 私有地址：
            // - fc00::/7 (ULA, RFC 4193)
            // - fe80::/10 (Link-local)
            // - ::1 (Loopback), :: (Unspecified)
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// 从 HttpRequest 提取真实客户端 IP
///
/// 连接来自私有地址（反向代理场景）时信任 X-Forwarded-For / X-Real-IP，
/// 公网直连时使用对端地址，防止伪造。
pub fn extract_client_ip(req: &HttpRequest) -> Option<IpAddr> {
    let peer = req.peer_addr().map(|addr| addr.ip());

    match peer {
        Some(peer_ip) if is_private_or_local(&peer_ip) => {
            if let Some(forwarded) = extract_forwarded_ip(req) {
                return Some(forwarded);
            }
            Some(peer_ip)
        }
        Some(peer_ip) => Some(peer_ip),
        None => extract_forwarded_ip(req),
    }
}

/// 从请求头提取转发的 IP（X-Forwarded-For 优先，取第一跳）
fn extract_forwarded_ip(req: &HttpRequest) -> Option<IpAddr> {
    let headers = req.headers();

    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_private_or_local_ipv4() {
        assert!(is_private_or_local(&"10.0.0.1".parse().unwrap()));
        assert!(is_private_or_local(&"172.16.0.1".parse().unwrap()));
        assert!(is_private_or_local(&"192.168.1.1".parse().unwrap()));
        assert!(is_private_or_local(&"127.0.0.1".parse().unwrap()));
        assert!(is_private_or_local(&"169.254.1.1".parse().unwrap()));
        assert!(is_private_or_local(&"0.0.0.0".parse().unwrap()));

        assert!(!is_private_or_local(&"8.8.8.8".parse().unwrap()));
        assert!(!is_private_or_local(&"203.0.113.1".parse().unwrap()));
    }

    #[test]
    fn test_is_private_or_local_ipv6() {
        assert!(is_private_or_local(&"::1".parse().unwrap()));
        assert!(is_private_or_local(&"::".parse().unwrap()));
        assert!(is_private_or_local(&"fd00::1".parse().unwrap()));
        assert!(is_private_or_local(&"fc00::1".parse().unwrap()));
        assert!(is_private_or_local(&"fe80::1".parse().unwrap()));

        assert!(!is_private_or_local(&"2001:4860:4860::8888".parse().unwrap()));
    }
}
