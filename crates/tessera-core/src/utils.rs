//! Network helpers

use if_addrs::IfAddr;

/// First non-loopback IPv4 address of this host, or "127.0.0.1" as fallback.
///
/// Used as the advertised host when none is configured.
pub fn local_ip() -> String {
    if_addrs::get_if_addrs()
        .ok()
        .and_then(|addrs| {
            addrs.into_iter().find_map(|iface| match iface.addr {
                IfAddr::V4(addr) if !iface.is_loopback() => Some(addr.ip.to_string()),
                _ => None,
            })
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}
