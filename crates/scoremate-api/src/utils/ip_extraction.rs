//! Client address resolution for rate limiting.
//!
//! `X-Forwarded-For` is only trusted as far as the configured number of proxies
//! in front of the service: with `n` trusted proxies the client is the entry
//! `n` places from the right of the chain.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Resolve the caller's address from proxy headers, then the socket.
///
/// Returns `"unknown"` when nothing usable is available, so every such
/// request shares one rate limit bucket.
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: Option<&SocketAddr>,
    trusted_proxy_count: usize,
) -> String {
    header_str(headers, "x-forwarded-for")
        .and_then(|chain| from_forwarded_chain(chain, trusted_proxy_count))
        .or_else(|| header_str(headers, "x-real-ip").and_then(parse_ip))
        .or_else(|| socket_addr.map(SocketAddr::ip))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

fn from_forwarded_chain(chain: &str, trusted_proxy_count: usize) -> Option<IpAddr> {
    let hops: Vec<&str> = chain
        .split(',')
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();

    // A chain no longer than the proxy count was not written by our proxies
    // alone; only the hop nearest to us is trustworthy then.
    let pick = if trusted_proxy_count == 0 || hops.len() <= trusted_proxy_count {
        hops.last()
    } else {
        hops.get(hops.len() - trusted_proxy_count - 1)
    };

    pick.copied().and_then(parse_ip)
}

/// Number of proxies in front of the API, from `TRUSTED_PROXY_COUNT` (default 1).
pub fn trusted_proxy_count() -> usize {
    std::env::var("TRUSTED_PROXY_COUNT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1)
}
