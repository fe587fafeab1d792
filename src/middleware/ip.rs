//! Client IP resolution shared by the rate limiter, the CORS enforcer and
//! the activity logger.
//!
//! # Sources
//!
//! Checked in order:
//! 1. `X-Forwarded-For` (first entry) or `X-Real-IP`, when the connection
//!    comes from a trusted proxy
//! 2. The socket peer address (`ConnectInfo<SocketAddr>`), when the server
//!    was started with connect info
//! 3. [`UNKNOWN_IP`]
//!
//! # IP Spoofing
//!
//! Forwarding headers are client-controlled. With `TRUSTED_PROXIES` empty
//! every forwarding header is believed, which is only safe when the service
//! is reachable exclusively through a proxy that overwrites those headers.
//! With ranges configured, headers are ignored unless the socket peer is
//! inside one of them.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap, Request};
use tracing::{debug, warn};

/// Fallback key when no client IP can be determined.
///
/// All such requests share one rate-limit bucket.
pub const UNKNOWN_IP: &str = "unknown";

// =============================================================================
// CIDR Matching
// =============================================================================

/// Parsed CIDR network range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"` or a bare address (implicit /32 or /128).
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(prefix) => prefix.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if `ip` falls inside this range. IPv4 never matches IPv6.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix_len)).unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix_len)).unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Parse a list of CIDR strings, logging and skipping invalid entries.
pub fn parse_cidr_list(entries: &[String], setting: &str) -> Vec<CidrRange> {
    entries
        .iter()
        .filter_map(|entry| {
            let parsed = CidrRange::parse(entry);
            if parsed.is_none() {
                warn!(entry = %entry, setting, "Invalid IP/CIDR entry, skipping");
            }
            parsed
        })
        .collect()
}

/// Trusted reverse-proxy ranges.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    pub fn new(cidrs: &[String]) -> Self {
        let ranges = parse_cidr_list(cidrs, "TRUSTED_PROXIES");
        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy validation enabled");
        }
        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip` belongs to a trusted proxy. With no ranges configured
    /// every source is trusted.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(ip))
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// First `X-Forwarded-For` entry, else `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap) -> Option<&str> {
    let from_xff = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    from_xff.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    })
}

fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Resolve the client IP for `req`.
///
/// Returns a borrowed [`UNKNOWN_IP`] when nothing is available.
pub fn client_ip<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    resolve_client_ip(req.headers(), req.extensions(), trusted_proxies)
}

/// Resolve the client IP from already-split request parts (extractors).
pub fn resolve_client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let peer = peer_ip(extensions);

    if let Some(forwarded) = forwarded_ip(headers) {
        match peer {
            Some(peer) if !trusted_proxies.is_trusted(&peer) => {
                debug!(
                    peer = %peer,
                    forwarded = %forwarded,
                    "Ignoring forwarding header from untrusted peer"
                );
                return Cow::Owned(peer.to_string());
            }
            _ => return Cow::Owned(forwarded.to_string()),
        }
    }

    match peer {
        Some(peer) => Cow::Owned(peer.to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}
