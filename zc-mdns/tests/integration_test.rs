//! Integration tests for zc-mdns
//!
//! Two engines share a simulated multicast link: every packet one queues
//! is handed to the other, and both clocks advance through the same
//! simulated timeline. No sockets are involved.

use bytes::BytesMut;
use sansio::Protocol;
use shared::{TaggedBytesMut, TransportContext, TransportProtocol};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use zc_mdns::{ServiceInfo, Zeroconf, ZeroconfConfig, ZeroconfEvent};

fn addr(last: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 5353)
}

fn publisher(host: &str, last: u8) -> Zeroconf {
    Zeroconf::new(
        ZeroconfConfig::default()
            .with_host_name(host)
            .with_host_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))),
    )
}

fn deliver(packets: Vec<TaggedBytesMut>, to: &mut Zeroconf, from: SocketAddr, now: Instant) {
    for packet in packets {
        let msg = TaggedBytesMut {
            now,
            transport: TransportContext {
                local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5353),
                peer_addr: from,
                transport_protocol: TransportProtocol::UDP,
                ecn: None,
            },
            message: BytesMut::from(&packet.message[..]),
        };
        let _ = to.handle_read(msg);
    }
}

fn drain(conn: &mut Zeroconf) -> Vec<TaggedBytesMut> {
    let mut packets = Vec::new();
    while let Some(packet) = conn.poll_write() {
        packets.push(packet);
    }
    packets
}

// Exchange queued packets both ways until the link is quiet.
fn pump(
    a: &mut Zeroconf,
    b: &mut Zeroconf,
    a_addr: SocketAddr,
    b_addr: SocketAddr,
    now: Instant,
) {
    for _ in 0..16 {
        let from_a = drain(a);
        let from_b = drain(b);
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        deliver(from_a, b, a_addr, now);
        deliver(from_b, a, b_addr, now);
    }
    panic!("link never went quiet");
}

// Advance both engines through the shared timeline up to `until`,
// exchanging packets after every timer step.
fn advance(
    a: &mut Zeroconf,
    b: &mut Zeroconf,
    a_addr: SocketAddr,
    b_addr: SocketAddr,
    until: Instant,
) {
    pump(a, b, a_addr, b_addr, Instant::now());
    for _ in 0..10_000 {
        let next = [a.poll_timeout(), b.poll_timeout()]
            .into_iter()
            .flatten()
            .filter(|t| *t <= until)
            .min();
        let Some(t) = next else {
            return;
        };
        let _ = a.handle_timeout(t);
        let _ = b.handle_timeout(t);
        pump(a, b, a_addr, b_addr, t);
    }
    panic!("timeline never converged");
}

fn events(conn: &mut Zeroconf) -> Vec<ZeroconfEvent> {
    let mut out = Vec::new();
    while let Some(event) = conn.poll_event() {
        out.push(event);
    }
    out
}

#[test]
fn test_publish_and_browse() {
    let a_addr = addr(1);
    let b_addr = addr(2);

    let mut a = publisher("machine-a.local.", 1);
    a.register_service(
        ServiceInfo::new("_demo._tcp.local.", "alpha", 9000)
            .with_properties(&[("version", Some(b"1".as_slice()))]),
    )
    .unwrap();

    let mut b = Zeroconf::new(ZeroconfConfig::default());
    b.add_service_listener("_demo._tcp.local.");

    let start = Instant::now();
    advance(&mut a, &mut b, a_addr, b_addr, start + Duration::from_secs(12));

    let seen = events(&mut b);
    assert!(seen.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceAdded { service_type, name }
            if service_type == "_demo._tcp.local." && name == "alpha"
    )));
    let resolved = seen.iter().find_map(|e| match e {
        ZeroconfEvent::ServiceResolved(info) => Some(info),
        _ => None,
    });
    let info = resolved.expect("browser should resolve the published instance");
    assert_eq!(info.port(), 9000);
    assert_eq!(info.server(), "machine-a.local.");
    assert_eq!(info.address(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    assert_eq!(info.property("version"), Some(Some(b"1".to_vec())));

    // The browser can also enumerate the type afterwards.
    let list = b.services_of_type("_demo._tcp.local.");
    assert_eq!(list.len(), 1);
}

#[test]
fn test_same_host_name_one_side_renames() {
    let a_addr = addr(1);
    let b_addr = addr(2);

    let mut a = publisher("same.local.", 1);
    let mut b = publisher("same.local.", 2);

    let start = Instant::now();
    advance(&mut a, &mut b, a_addr, b_addr, start + Duration::from_secs(12));

    // Exactly one side kept the name; the loser picked "same-1.local.".
    assert_ne!(a.host_name(), b.host_name());
    let mut names = [a.host_name().to_owned(), b.host_name().to_owned()];
    names.sort();
    assert_eq!(names[0], "same-1.local.");
    assert_eq!(names[1], "same.local.");
}

#[test]
fn test_unregister_reaches_browser_as_removal() {
    let a_addr = addr(1);
    let b_addr = addr(2);

    let mut a = publisher("machine-a.local.", 1);
    a.register_service(ServiceInfo::new("_demo._tcp.local.", "alpha", 9000))
        .unwrap();
    let mut b = Zeroconf::new(ZeroconfConfig::default());
    b.add_service_listener("_demo._tcp.local.");

    let start = Instant::now();
    advance(&mut a, &mut b, a_addr, b_addr, start + Duration::from_secs(12));
    events(&mut b);

    a.unregister_service("_demo._tcp.local.", "alpha").unwrap();
    advance(
        &mut a,
        &mut b,
        a_addr,
        b_addr,
        start + Duration::from_secs(14),
    );

    let seen = events(&mut b);
    assert!(seen.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceRemoved { name, .. } if name == "alpha"
    )));
}

#[test]
fn test_type_listener_discovers_published_type() {
    let a_addr = addr(1);
    let b_addr = addr(2);

    let mut a = publisher("machine-a.local.", 1);
    a.register_service(ServiceInfo::new("_demo._tcp.local.", "alpha", 9000))
        .unwrap();
    let mut b = Zeroconf::new(ZeroconfConfig::default());

    // Let the publisher reach ANNOUNCED first, then ask for types: the
    // meta-query is only answered by established instances.
    let start = Instant::now();
    advance(&mut a, &mut b, a_addr, b_addr, start + Duration::from_secs(6));

    b.add_service_type_listener();
    advance(&mut a, &mut b, a_addr, b_addr, start + Duration::from_secs(10));

    let seen = events(&mut b);
    assert!(seen.iter().any(|e| matches!(
        e,
        ZeroconfEvent::ServiceTypeAdded(ty) if ty == "_demo._tcp.local."
    )));
}
