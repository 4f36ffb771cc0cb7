use std::collections::HashSet;
use std::net::IpAddr;

use axum::http::HeaderMap;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Source IP of a request: the first `X-Forwarded-For` entry when present,
/// otherwise the transport peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string);

    forwarded.or_else(|| peer.map(|ip| ip.to_canonical().to_string()))
}

#[derive(Debug, Clone, Default)]
pub struct AdminAllowlist {
    ips: HashSet<String>,
}

impl AdminAllowlist {
    pub fn new<I, S>(ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ips = ips
            .into_iter()
            .map(|ip| ip.as_ref().trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();
        Self { ips }
    }

    /// Exact string match against the allowlist.
    pub fn is_admin(&self, ip: Option<&str>) -> bool {
        ip.map(|ip| self.ips.contains(ip)).unwrap_or(false)
    }
}
