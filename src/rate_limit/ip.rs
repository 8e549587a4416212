//! Client address extraction for per-client limits

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// IPv6 addresses are bucketed by their /64 prefix
const IPV6_PREFIX_SEGMENTS: usize = 4;

/// Client IP from proxy headers (when trusted) or the socket peer,
/// defaulting to 127.0.0.1.
pub fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|first| first.trim().parse().ok());
        if let Some(ip) = forwarded {
            return ip;
        }

        let real_ip = headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        if let Some(ip) = real_ip {
            return ip;
        }
    }

    connect_info
        .map(|c| c.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Stable limiter identity: IPv4 as-is, IPv6 collapsed to its /64
pub fn normalize_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            let prefix: Vec<String> = v6.segments()[..IPV6_PREFIX_SEGMENTS]
                .iter()
                .map(|seg| format!("{:x}", seg))
                .collect();
            format!("{}::/64", prefix.join(":"))
        }
    }
}
