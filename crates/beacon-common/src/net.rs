//! Small network helpers shared by the roles.

use std::net::UdpSocket;

/// Best-effort LAN address of this host.
///
/// Opens a UDP socket toward a public address (no packet is sent) and reads
/// the local address the OS picked for the route. Falls back to loopback
/// when the host has no route.
pub fn local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    match probe() {
        Ok(ip) => ip,
        Err(e) => {
            tracing::warn!("LAN address detection failed ({e}), using 127.0.0.1");
            "127.0.0.1".to_string()
        }
    }
}

/// Whether this host owns `ip` on any interface, checked by attempting to
/// bind an ephemeral UDP port on it.
pub fn is_local_address(ip: &str) -> bool {
    let Ok(parsed) = ip.parse::<std::net::IpAddr>() else {
        return false;
    };
    UdpSocket::bind((parsed, 0)).is_ok()
}

/// Joins a host and port into the canonical `host:port` address form.
pub fn build_address(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// The host part of a `host:port` address, or the whole string when no
/// port separator is present.
pub fn host_of(address: &str) -> &str {
    match address.rsplit_once(':') {
        Some((host, _)) => host,
        None => address,
    }
}

/// The port part of a `host:port` address, or `default` when absent or
/// unparseable.
pub fn port_of(address: &str, default: u16) -> u16 {
    match address.rsplit_once(':') {
        Some((_, port)) => port.parse().unwrap_or_else(|_| {
            tracing::warn!(address, "invalid port in address, using {default}");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trip() {
        let addr = build_address("10.0.0.1", 9000);
        assert_eq!(addr, "10.0.0.1:9000");
        assert_eq!(host_of(&addr), "10.0.0.1");
        assert_eq!(port_of(&addr, 8000), 9000);
    }

    #[test]
    fn missing_or_bad_port_uses_default() {
        assert_eq!(port_of("justhost", 8000), 8000);
        assert_eq!(port_of("host:xyz", 8000), 8000);
        assert_eq!(host_of("justhost"), "justhost");
    }

    #[test]
    fn local_ip_is_parseable() {
        let ip = local_ip();
        assert!(ip.parse::<std::net::IpAddr>().is_ok());
    }

    #[test]
    fn loopback_is_local_and_garbage_is_not() {
        assert!(is_local_address("127.0.0.1"));
        assert!(!is_local_address("not-an-ip"));
        // A TEST-NET address never belongs to this host.
        assert!(!is_local_address("192.0.2.1"));
    }
}
