//! Origin classification for CORS decisions.
//!
//! [`classify`] is a pure function: it maps the request's `Origin` header,
//! the request's own `Host` header and the configured [`OriginPolicy`] to an
//! [`OriginDecision`]. It is evaluated fresh for every request.
//!
//! # Decision Order
//!
//! 1. Empty origin → same-origin request, implicitly allowed, nothing echoed
//! 2. Exact match in the allow-set → allowed, origin echoed
//! 3. Private-network host (`localhost`, `127.0.0.1`, `10/8`, `172.16/12`,
//!    `192.168/16`) → allowed, origin echoed
//! 4. Host (with or without port) equal to the request's `Host` → allowed
//! 5. Anything else → denied
//!
//! # Trust Model
//!
//! Steps 3 and 4 trust every LAN origin. This suits a management UI that is
//! reached over a private network and is deliberately permissive. Private
//! ranges are only matched for IPv4 literals: `10.example.com` is a DNS name
//! and is not trusted.

use std::net::Ipv4Addr;

/// Origins trusted when no override list is configured.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:8080", "http://127.0.0.1:8080"];

/// Static part of the CORS trust configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginPolicy {
    overrides: Option<Vec<String>>,
}

impl OriginPolicy {
    /// Create a policy.
    ///
    /// `overrides`, when present, replaces the loopback defaults. Entries are
    /// trimmed and empty ones dropped.
    pub fn new(overrides: Option<Vec<String>>) -> Self {
        let overrides = overrides.map(|list| {
            list.into_iter()
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect()
        });
        Self { overrides }
    }

    /// Compute the exact-match allow-set for a request addressed to `server_host`.
    pub fn allow_set(&self, server_host: &str) -> Vec<String> {
        let mut set: Vec<String> = match &self.overrides {
            Some(list) => list.clone(),
            None => DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| (*origin).to_string())
                .collect(),
        };

        let host = server_host.trim();
        if !host.is_empty() {
            set.push(format!("http://{host}"));
            set.push(format!("https://{host}"));
        }
        set
    }
}

/// Outcome of classifying one request origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginDecision {
    pub allowed: bool,
    /// Value for `Access-Control-Allow-Origin`, when one must be emitted.
    pub echoed_origin: Option<String>,
}

impl OriginDecision {
    /// No `Origin` header: allowed, nothing to echo.
    pub fn same_origin() -> Self {
        Self {
            allowed: true,
            echoed_origin: None,
        }
    }

    pub fn allow(origin: &str) -> Self {
        Self {
            allowed: true,
            echoed_origin: Some(origin.to_string()),
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            echoed_origin: None,
        }
    }
}

/// Classify `request_origin` for a request whose `Host` header is `server_host`.
pub fn classify(request_origin: &str, server_host: &str, policy: &OriginPolicy) -> OriginDecision {
    let origin = request_origin.trim();
    if origin.is_empty() {
        return OriginDecision::same_origin();
    }

    if policy.allow_set(server_host).iter().any(|allowed| allowed == origin) {
        return OriginDecision::allow(origin);
    }

    if !has_web_scheme(origin) {
        return OriginDecision::deny();
    }

    let host_port = authority(origin);
    let host = strip_port(host_port);

    if is_private_host(host) || matches_server_host(host_port, server_host) {
        return OriginDecision::allow(origin);
    }

    OriginDecision::deny()
}

/// True for `localhost`, `127.0.0.1` and IPv4 literals in RFC 1918 ranges.
pub fn is_private_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" {
        return true;
    }
    host.parse::<Ipv4Addr>().is_ok_and(|ip| ip.is_private())
}

fn has_web_scheme(origin: &str) -> bool {
    origin
        .split_once("://")
        .is_some_and(|(scheme, _)| scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
}

/// `host[:port]` part of an origin: scheme, userinfo and path removed.
fn authority(origin: &str) -> &str {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    authority
        .rsplit_once('@')
        .map_or(authority, |(_, host_port)| host_port)
}

/// Drop a trailing `:port`, handling bracketed IPv6 literals.
fn strip_port(host_port: &str) -> &str {
    if let Some(rest) = host_port.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => host_port,
    }
}

fn matches_server_host(host_port: &str, server_host: &str) -> bool {
    let server_host = server_host.trim();
    if server_host.is_empty() || host_port.is_empty() {
        return false;
    }
    host_port.eq_ignore_ascii_case(server_host)
        || strip_port(host_port).eq_ignore_ascii_case(strip_port(server_host))
}
