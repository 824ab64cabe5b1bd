//! Socket utilities for embedders.
//!
//! The engine itself never touches the network; this module is a
//! convenience for the event loop that drives it. The resulting socket is
//! bound to the mDNS port with address reuse, set non-blocking and joined
//! to the IPv4 multicast group.
//!
//! ```rust,ignore
//! let std_socket = MulticastSocket::new().into_std()?;
//! let socket = tokio::net::UdpSocket::from_std(std_socket)?;
//! ```

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::proto::{MDNS_MULTICAST_IPV4, MDNS_PORT};
use socket2::{Domain, Protocol, Socket, Type};

/// A builder for multicast UDP sockets suitable for mDNS.
#[derive(Debug, Clone, Default)]
pub struct MulticastSocket {
    local_ip: Option<Ipv4Addr>,
    local_port: Option<u16>,
    interface: Option<Ipv4Addr>,
}

impl MulticastSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a specific local address instead of the platform default.
    pub fn with_local_ip(mut self, local_ip: Ipv4Addr) -> Self {
        self.local_ip = Some(local_ip);
        self
    }

    /// Bind to a non-standard port, e.g. for tests that must not collide
    /// with a running mDNS daemon.
    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = Some(local_port);
        self
    }

    /// Join the multicast group on one interface instead of all of them.
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Build the configured `std::net::UdpSocket`.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be created, configured, bound, or joined
    /// to the multicast group.
    pub fn into_std(self) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        socket.set_reuse_address(true)?;

        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuse_port(true)?;

        socket.set_nonblocking(true)?;

        let local_ip = if let Some(local_ip) = self.local_ip {
            IpAddr::V4(local_ip)
        } else if cfg!(target_os = "linux") {
            IpAddr::V4(MDNS_MULTICAST_IPV4)
        } else {
            // Binding the group address only works on Linux; elsewhere the
            // wildcard is the only address that receives the group.
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };

        let local_port = self.local_port.unwrap_or(MDNS_PORT);

        socket.bind(&SocketAddr::new(local_ip, local_port).into())?;

        let interface = self.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket.join_multicast_v4(&MDNS_MULTICAST_IPV4, &interface)?;

        Ok(socket.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multicast_constants() {
        assert_eq!(MDNS_MULTICAST_IPV4, Ipv4Addr::new(224, 0, 0, 251));
        assert_eq!(MDNS_PORT, 5353);
    }

    #[test]
    fn test_multicast_socket_builder() {
        let builder = MulticastSocket::new()
            .with_local_ip(Ipv4Addr::UNSPECIFIED)
            .with_local_port(5353);
        assert!(builder.local_ip.is_some());
        assert_eq!(builder.local_port, Some(5353));
        assert!(builder.interface.is_none());
    }

    // Socket creation needs real network access and may collide with a
    // running mDNS daemon, so it is not exercised here.
}
