//! Outbound address discovery

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::warn;

/// Connecting a UDP socket sends no packets but makes the OS pick the
/// interface it would route through.
pub fn outbound_ip() -> IpAddr {
    match probe() {
        Ok(ip) => ip,
        Err(e) => {
            warn!(error = %e, "Could not determine outbound IP, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn probe() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_ip_is_not_unspecified() {
        assert!(!outbound_ip().is_unspecified());
    }
}
