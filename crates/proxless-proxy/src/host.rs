//! Host extraction.

use http::Request;
use http::header::HOST;

/// Host of an inbound request: the `Host` header, else the URI authority.
/// `None` when neither is present.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(value) = req.headers().get(HOST)
        && let Ok(raw) = value.to_str()
    {
        return Some(parse_host(raw));
    }
    req.uri().authority().map(|a| parse_host(a.as_str()))
}

/// Strip an optional `:port` from `raw`.
///
/// `a.io:8080` gives `a.io`, `[::1]:80` gives `::1`. Input without a port
/// (or that does not split cleanly) is returned as-is, trimmed.
pub fn parse_host(raw: &str) -> String {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((inner, "")) => inner.to_string(),
            Some((inner, port)) if is_port(port.strip_prefix(':')) => inner.to_string(),
            _ => raw.to_string(),
        };
    }

    match raw.split_once(':') {
        // More than one colon is a bare IPv6 literal.
        Some((host, port)) if !port.contains(':') && is_port(Some(port)) => host.to_string(),
        _ => raw.to_string(),
    }
}

fn is_port(port: Option<&str>) -> bool {
    matches!(port, Some(p) if p.chars().all(|c| c.is_ascii_digit()))
}
