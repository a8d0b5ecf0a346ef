//! IP address filtering for the private-address gate.
//!
//! Detects loopback, private, link-local and otherwise non-routable
//! destinations so sessions cannot be pointed back into the server's network.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Check any IP address, unwrapping IPv4-mapped IPv6 first
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_ipv4(&v4),
            None => is_private_ipv6(v6),
        },
    }
}

/// Check if an IPv4 address is private/loopback/link-local/reserved
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()                   // 127.0.0.0/8
        || ip.is_private()             // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
        || ip.is_link_local()          // 169.254.0.0/16
        || octets[0] == 0             // 0.0.0.0/8
        || (octets[0] == 100 && (octets[1] & 0xC0) == 64)  // 100.64.0.0/10 (CGN)
        || ip.is_broadcast()
        || ip.is_multicast()
}

/// Check if an IPv6 address is loopback/unspecified/ULA/link-local/multicast
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (first & 0xfe00) == 0xfc00  // fc00::/7
        || (first & 0xffc0) == 0xfe80 // fe80::/10
}
