use http::HeaderMap;
use thiserror::Error;
use tracing::warn;

pub const UNKNOWN_PORT: u16 = 0;

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const REAL_IP_HEADER: &str = "x-real-ip";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerAddressError {
    #[error("missing port in address `{0}`")]
    MissingPort(String),
    #[error("too many colons in address `{0}`")]
    TooManyColons(String),
    #[error("missing `]` in address `{0}`")]
    MissingBracket(String),
    #[error("invalid port `{port}` in address `{addr}`")]
    InvalidPort { addr: String, port: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub source: String,
    pub source_port: u16,
    pub destination: String,
    pub destination_port: u16,
}

pub fn split_host_port(addr: &str) -> Result<(&str, &str), PeerAddressError> {
    if let Some(rest) = addr.strip_prefix('[') {
        let Some((host, tail)) = rest.split_once(']') else {
            return Err(PeerAddressError::MissingBracket(addr.to_string()));
        };
        let Some(port) = tail.strip_prefix(':') else {
            return Err(PeerAddressError::MissingPort(addr.to_string()));
        };
        return Ok((host, port));
    }

    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(PeerAddressError::MissingPort(addr.to_string()));
    };
    if host.contains(':') {
        return Err(PeerAddressError::TooManyColons(addr.to_string()));
    }
    Ok((host, port))
}

pub fn parse_port(addr: &str, port: &str) -> Result<u16, PeerAddressError> {
    port.parse::<u16>().map_err(|_| PeerAddressError::InvalidPort {
        addr: addr.to_string(),
        port: port.to_string(),
    })
}

/// Never fails: a malformed peer address logs a warning and yields [`UNKNOWN_PORT`].
pub fn resolve_source(
    peer_addr: Option<&str>,
    headers: &HeaderMap,
    trust_forwarded_headers: bool,
) -> (String, u16) {
    let raw = peer_addr.unwrap_or_default();
    let (peer_host, port) = match split_host_port(raw) {
        Ok((host, port_text)) => match parse_port(raw, port_text) {
            Ok(port) => (host, port),
            Err(err) => {
                warn!(
                    peer_addr = raw,
                    error = %err,
                    "couldn't find source port for incoming request"
                );
                (host, UNKNOWN_PORT)
            }
        },
        Err(err) => {
            warn!(
                peer_addr = raw,
                error = %err,
                "couldn't find source port for incoming request"
            );
            ("", UNKNOWN_PORT)
        }
    };

    let host = trust_forwarded_headers
        .then(|| forwarded_client_ip(headers))
        .flatten()
        .unwrap_or_else(|| peer_host.to_string());
    (host, port)
}

pub fn resolve_endpoints(
    peer_addr: Option<&str>,
    headers: &HeaderMap,
    trust_forwarded_headers: bool,
    destination: &Destination,
) -> ResolvedEndpoints {
    let (source, source_port) = resolve_source(peer_addr, headers, trust_forwarded_headers);
    ResolvedEndpoints {
        source,
        source_port,
        destination: destination.host.clone(),
        destination_port: destination.port,
    }
}

fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded_for = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded_for {
        return Some(ip.to_string());
    }

    headers
        .get(REAL_IP_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::{
        Destination, PeerAddressError, UNKNOWN_PORT, resolve_endpoints, resolve_source,
        split_host_port,
    };
    use http::{HeaderMap, HeaderValue};

    #[test]
    fn valid_ipv4_peer() {
        let (host, port) = resolve_source(Some("1.2.3.4:5678"), &HeaderMap::new(), false);
        assert_eq!(host, "1.2.3.4");
        assert_eq!(port, 5678);
    }

    #[test]
    fn bracketed_ipv6_peer() {
        let (host, port) = resolve_source(Some("[::1]:8443"), &HeaderMap::new(), false);
        assert_eq!(host, "::1");
        assert_eq!(port, 8443);
    }

    #[test]
    fn malformed_peer_defaults_port() {
        let (host, port) = resolve_source(Some("malformed"), &HeaderMap::new(), false);
        assert_eq!(host, "");
        assert_eq!(port, UNKNOWN_PORT);
    }

    #[test]
    fn non_numeric_port_keeps_host() {
        let (host, port) = resolve_source(Some("10.0.0.1:http"), &HeaderMap::new(), false);
        assert_eq!(host, "10.0.0.1");
        assert_eq!(port, UNKNOWN_PORT);
    }

    #[test]
    fn missing_peer_defaults_port() {
        let (_, port) = resolve_source(None, &HeaderMap::new(), false);
        assert_eq!(port, UNKNOWN_PORT);
    }

    #[test]
    fn split_rejects_bare_ipv6() {
        assert_eq!(
            split_host_port("::1"),
            Err(PeerAddressError::TooManyColons("::1".to_string()))
        );
        assert_eq!(
            split_host_port("[::1"),
            Err(PeerAddressError::MissingBracket("[::1".to_string()))
        );
    }

    #[test]
    fn forwarded_headers_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        let (untrusted, _) = resolve_source(Some("10.0.0.1:4000"), &headers, false);
        assert_eq!(untrusted, "10.0.0.1");

        let (trusted, port) = resolve_source(Some("10.0.0.1:4000"), &headers, true);
        assert_eq!(trusted, "203.0.113.7");
        assert_eq!(port, 4000);
    }

    #[test]
    fn real_ip_is_used_without_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));

        let (host, _) = resolve_source(Some("10.0.0.1:4000"), &headers, true);
        assert_eq!(host, "198.51.100.2");
    }

    #[test]
    fn destination_is_passed_through() {
        let destination = Destination {
            host: "api.internal".to_string(),
            port: 8080,
        };
        let endpoints =
            resolve_endpoints(Some("1.2.3.4:5678"), &HeaderMap::new(), false, &destination);
        assert_eq!(endpoints.destination, "api.internal");
        assert_eq!(endpoints.destination_port, 8080);
        assert_eq!(endpoints.source_port, 5678);
    }
}
