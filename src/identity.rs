//! Client identity resolution
//!
//! Derives the quota attribution key for a request from transport
//! metadata. This is a pure function: it cannot fail, only produce a
//! possibly-empty identifier.

use std::net::SocketAddr;

/// Resolve the client identifier for a request.
///
/// A reverse proxy or load balancer replaces the peer address with its
/// own, so a non-empty forwarded header wins: its first comma-separated
/// entry, trimmed, is the original caller. Otherwise the direct peer IP
/// is used. When neither is available the identifier is empty; all
/// unidentified callers then share a single quota bucket, which is
/// accepted behavior.
pub fn resolve_client_id(peer: Option<SocketAddr>, forwarded: Option<&str>) -> String {
    if let Some(header) = forwarded {
        if !header.trim().is_empty() {
            return header
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::resolve_client_id;
    use std::net::SocketAddr;

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().expect("valid socket address"))
    }

    #[test]
    fn forwarded_header_takes_precedence_over_peer() {
        let id = resolve_client_id(peer("10.0.0.1:443"), Some("203.0.113.7"));
        assert_eq!(id, "203.0.113.7");
    }

    #[test]
    fn first_forwarded_entry_wins() {
        let id = resolve_client_id(
            peer("10.0.0.1:443"),
            Some("203.0.113.7, 198.51.100.2, 10.0.0.1"),
        );
        assert_eq!(id, "203.0.113.7");
    }

    #[test]
    fn forwarded_entries_are_trimmed() {
        let id = resolve_client_id(None, Some("  203.0.113.7 , 198.51.100.2"));
        assert_eq!(id, "203.0.113.7");
    }

    #[test]
    fn missing_header_falls_back_to_peer_ip_without_port() {
        let id = resolve_client_id(peer("192.0.2.10:8080"), None);
        assert_eq!(id, "192.0.2.10");
    }

    #[test]
    fn blank_header_falls_back_to_peer() {
        let id = resolve_client_id(peer("192.0.2.10:8080"), Some("   "));
        assert_eq!(id, "192.0.2.10");
    }

    #[test]
    fn nothing_available_yields_empty_identifier() {
        assert_eq!(resolve_client_id(None, None), "");
        assert_eq!(resolve_client_id(None, Some("")), "");
    }

    #[test]
    fn ipv6_peer_is_preserved() {
        let id = resolve_client_id(peer("[2001:db8::1]:443"), None);
        assert_eq!(id, "2001:db8::1");
    }
}
