//! # zc-mdns
//!
//! A sans-I/O implementation of Multicast DNS (RFC 6762) and DNS-based
//! Service Discovery (RFC 6763) for Rust.
//!
//! The engine announces services under a locally unique name, browses for
//! services offered by peers, and resolves a specific instance to its
//! address and connection metadata - without ever touching a socket. It
//! implements the [`sansio::Protocol`] trait, so it plugs into any I/O
//! framework (tokio, async-std, smol, or blocking I/O).
//!
//! ## Sans-I/O design
//!
//! The caller is responsible for:
//!
//! 1. Reading datagrams from the multicast socket and calling
//!    `handle_read()`
//! 2. Sending datagrams returned by `poll_write()` to `224.0.0.251:5353`
//! 3. Calling `handle_timeout()` when `poll_timeout()` expires
//! 4. Processing events from `poll_event()`
//!
//! Everything the protocol needs - the probe/announce state machine for
//! owned names, the record cache with TTL expiry, conflict tie-breaking,
//! known-answer suppression, delayed and coalesced responses, goodbye
//! bursts - runs inside those four calls.
//!
//! ## Publish a service
//!
//! ```rust
//! use std::net::{IpAddr, Ipv4Addr};
//! use sansio::Protocol;
//! use zc_mdns::{ServiceInfo, Zeroconf, ZeroconfConfig};
//!
//! let config = ZeroconfConfig::default()
//!     .with_host_name("machine.local.")
//!     .with_host_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
//! let mut conn = Zeroconf::new(config);
//!
//! let service = ServiceInfo::new("_http._tcp.local.", "my website", 8080)
//!     .with_properties(&[("path", Some(b"/index.html".as_slice()))]);
//! conn.register_service(service).unwrap();
//!
//! // Probing is now scheduled; drive it with handle_timeout() and send
//! // whatever poll_write() yields.
//! assert!(conn.poll_timeout().is_some());
//! ```
//!
//! ## Browse for services
//!
//! ```rust
//! use sansio::Protocol;
//! use zc_mdns::{Zeroconf, ZeroconfConfig, ZeroconfEvent};
//!
//! let mut conn = Zeroconf::new(ZeroconfConfig::default());
//! conn.add_service_listener("_printer._tcp.local.");
//!
//! // ... feed received datagrams to handle_read(), then:
//! while let Some(event) = conn.poll_event() {
//!     match event {
//!         ZeroconfEvent::ServiceAdded { service_type, name } => {
//!             println!("found {name} ({service_type})");
//!         }
//!         ZeroconfEvent::ServiceResolved(info) => {
//!             println!("{} -> {:?}:{}", info.name(), info.address(), info.port());
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Event loop pattern
//!
//! ```text
//! loop {
//!     while let Some(packet) = conn.poll_write() {
//!         socket.send_to(&packet.message, packet.transport.peer_addr);
//!     }
//!     select! {
//!         packet = socket.recv_from() => conn.handle_read(packet),
//!         _ = sleep_until(conn.poll_timeout()) => conn.handle_timeout(Instant::now()),
//!     }
//!     while let Some(event) = conn.poll_event() { /* handle */ }
//! }
//! ```

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub(crate) mod cache;
pub(crate) mod config;
pub(crate) mod host;
pub(crate) mod message;
pub(crate) mod proto;
pub(crate) mod record;
pub(crate) mod service;
pub(crate) mod socket;
pub(crate) mod state;

pub use config::ZeroconfConfig;
pub use proto::{
    MDNS_DEST_ADDR, MDNS_DEST_ADDR_V6, MDNS_MULTICAST_IPV4, MDNS_MULTICAST_IPV6, MDNS_PORT,
    META_QUERY_NAME, Zeroconf, ZeroconfEvent,
};
pub use service::{ServiceInfo, properties_from_text, text_from_properties};
pub use socket::MulticastSocket;
pub use state::DnsState;
